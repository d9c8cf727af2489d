//! Process-wide set of exported endpoint identities.
//!
//! An identity goes through two states: *reserved* while an export is in
//! flight and *live* once its Export Handle exists. [`IdentitySet::reserve`]
//! claims a key atomically, so the duplicate check and the publish step can
//! not be interleaved by two exporters of the same endpoint. Dropping an
//! unconfirmed [`Reservation`] gives the key back.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Reserved,
    Live,
}

#[derive(Default)]
pub struct IdentitySet {
    entries: DashMap<String, Slot>,
}

impl std::fmt::Debug for IdentitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySet")
            .field("live", &self.len())
            .field("total", &self.entries.len())
            .finish()
    }
}

impl IdentitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` if it is neither reserved nor live.
    ///
    /// Returns `None` when another export already holds the key.
    #[must_use]
    pub fn reserve(&self, key: &str) -> Option<Reservation<'_>> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Slot::Reserved);
                Some(Reservation {
                    set: self,
                    key: key.to_owned(),
                    confirmed: false,
                })
            }
        }
    }

    /// Removes a live key. Reserved keys are left to their owner.
    pub fn release(&self, key: &str) -> bool {
        self.entries
            .remove_if(key, |_, slot| *slot == Slot::Live)
            .is_some()
    }

    /// Whether the key is reserved or live.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn is_live(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|slot| *slot == Slot::Live)
    }

    /// Sorted live keys.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| *e.value() == Slot::Live)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| *e.value() == Slot::Live)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A claimed identity key, published by [`Reservation::confirm`].
#[must_use = "dropping a reservation releases the key"]
pub struct Reservation<'a> {
    set: &'a IdentitySet,
    key: String,
    confirmed: bool,
}

impl Reservation<'_> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Marks the key live; it stays in the set until [`IdentitySet::release`].
    pub fn confirm(mut self) {
        if let Some(mut slot) = self.set.entries.get_mut(&self.key) {
            *slot = Slot::Live;
        }
        self.confirmed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.confirmed {
            self.set
                .entries
                .remove_if(&self.key, |_, slot| *slot == Slot::Reserved);
        }
    }
}

impl std::fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("key", &self.key)
            .field("confirmed", &self.confirmed)
            .finish_non_exhaustive()
    }
}
