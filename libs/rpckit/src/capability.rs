//! Name-keyed capability hub.
//!
//! Pluggable roles (orchestrator, protocol, registry factory, proxy factory,
//! filter factory) are resolved by *(trait type, name)* without the caller
//! knowing the concrete type.
//!
//! Implementation details:
//! - Key = (type name, capability name). `type_name::<T>()` works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - A capability is registered either as a ready instance or as a factory.
//!   Factories run outside the lock; when two threads race on the same
//!   name, the first stored instance wins and every caller gets that one.
//!
//! Notes:
//! - Resolved instances are cached for the lifetime of the hub.
//! - `register` replaces any previous instance or factory under the same key.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Stable type key for trait objects, from `type_name::<T>()`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability not found: kind={kind}, name={name}")]
    NotFound { kind: TypeKey, name: String },

    #[error("type mismatch in capability hub for kind={kind}, name={name}")]
    TypeMismatch { kind: TypeKey, name: String },
}

type Boxed = Box<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> Boxed + Send + Sync>;
type Key = (TypeKey, Arc<str>);

/// Registry of capabilities keyed by (trait type, name).
pub struct CapabilityHub {
    instances: RwLock<HashMap<Key, Boxed>>,
    factories: RwLock<HashMap<Key, Factory>>,
}

impl CapabilityHub {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for CapabilityHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CapabilityHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .instances
            .read()
            .keys()
            .chain(self.factories.read().keys())
            .map(|(kind, name)| format!("{kind}/{name}"))
            .collect();
        names.sort();
        names.dedup();
        f.debug_struct("CapabilityHub").field("entries", &names).finish()
    }
}

impl CapabilityHub {
    fn key<T: ?Sized + 'static>(name: &str) -> Key {
        (TypeKey::of::<T>(), Arc::from(name))
    }

    /// Register a ready instance of capability `T` under `name`.
    pub fn register<T>(&self, name: &str, capability: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = Self::key::<T>(name);
        self.factories.write().remove(&key);
        self.instances.write().insert(key, Box::new(capability));
    }

    /// Register a factory for capability `T` under `name`; it runs on first resolution.
    pub fn register_factory<T, F>(&self, name: &str, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let key = Self::key::<T>(name);
        self.instances.write().remove(&key);
        let boxed: Factory = Arc::new(move || Box::new(factory()) as Boxed);
        self.factories.write().insert(key, boxed);
    }

    /// Resolve capability `T` by `name`.
    ///
    /// # Errors
    /// [`CapabilityError::NotFound`] when nothing is registered under that name.
    pub fn resolve<T>(&self, name: &str) -> Result<Arc<T>, CapabilityError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = Self::key::<T>(name);
        if let Some(boxed) = self.instances.read().get(&key) {
            return downcast::<T>(boxed, &key);
        }

        let factory = self
            .factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound {
                kind: key.0.clone(),
                name: name.to_owned(),
            })?;
        let produced = factory();

        let mut w = self.instances.write();
        let stored = w.entry(key.clone()).or_insert(produced);
        downcast::<T>(stored, &key)
    }

    /// Whether a capability `T` is registered under `name`.
    #[must_use]
    pub fn contains<T>(&self, name: &str) -> bool
    where
        T: ?Sized + 'static,
    {
        let key = Self::key::<T>(name);
        self.instances.read().contains_key(&key) || self.factories.read().contains_key(&key)
    }

    /// Sorted names registered for capability `T`.
    #[must_use]
    pub fn names<T>(&self) -> Vec<String>
    where
        T: ?Sized + 'static,
    {
        let kind = TypeKey::of::<T>();
        let mut names: Vec<String> = self
            .instances
            .read()
            .keys()
            .chain(self.factories.read().keys())
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Introspection: total number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let instances = self.instances.read();
        let factories = self.factories.read();
        instances.len()
            + factories
                .keys()
                .filter(|k| !instances.contains_key(*k))
                .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast<T>(boxed: &Boxed, key: &Key) -> Result<Arc<T>, CapabilityError>
where
    T: ?Sized + Send + Sync + 'static,
{
    // Stored value is exactly `Arc<T>`.
    boxed
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or_else(|| CapabilityError::TypeMismatch {
            kind: key.0.clone(),
            name: key.1.to_string(),
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);
    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_owned()
        }
    }

    #[test]
    fn register_and_resolve_dyn_trait() {
        let hub = CapabilityHub::new();
        let greeter: Arc<dyn Greeter> = Arc::new(Fixed("hi"));
        hub.register::<dyn Greeter>("default", greeter.clone());

        let got = hub.resolve::<dyn Greeter>("default").unwrap();
        assert_eq!(got.greet(), "hi");
        assert!(Arc::ptr_eq(&greeter, &got));
    }

    #[test]
    fn names_are_independent() {
        let hub = CapabilityHub::new();
        hub.register::<dyn Greeter>("a", Arc::new(Fixed("a")));
        hub.register::<dyn Greeter>("b", Arc::new(Fixed("b")));

        assert_eq!(hub.resolve::<dyn Greeter>("a").unwrap().greet(), "a");
        assert_eq!(hub.resolve::<dyn Greeter>("b").unwrap().greet(), "b");
        assert_eq!(hub.names::<dyn Greeter>(), vec!["a", "b"]);
    }

    #[test]
    fn missing_capability_is_not_found() {
        let hub = CapabilityHub::new();
        match hub.resolve::<dyn Greeter>("nope") {
            Err(CapabilityError::NotFound { name, .. }) => assert_eq!(name, "nope"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("resolution must fail"),
        }
    }

    #[test]
    fn factory_runs_once_and_result_is_cached() {
        let hub = CapabilityHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        hub.register_factory::<dyn Greeter, _>("lazy", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Fixed("lazy"))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0, "factory must be lazy");
        let first = hub.resolve::<dyn Greeter>("lazy").unwrap();
        let second = hub.resolve::<dyn Greeter>("lazy").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn concurrent_resolution_yields_one_singleton() {
        let hub = Arc::new(CapabilityHub::new());
        hub.register_factory::<dyn Greeter, _>("shared", || Arc::new(Fixed("x")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = hub.clone();
                std::thread::spawn(move || hub.resolve::<dyn Greeter>("shared").unwrap())
            })
            .collect();
        let resolved: Vec<Arc<dyn Greeter>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        for r in &resolved[1..] {
            assert!(Arc::ptr_eq(&resolved[0], r), "all callers must share one instance");
        }
    }

    #[test]
    fn register_replaces_factory() {
        let hub = CapabilityHub::new();
        hub.register_factory::<dyn Greeter, _>("x", || Arc::new(Fixed("factory")));
        hub.register::<dyn Greeter>("x", Arc::new(Fixed("instance")));
        assert_eq!(hub.resolve::<dyn Greeter>("x").unwrap().greet(), "instance");
        assert_eq!(hub.len(), 1);
    }
}
