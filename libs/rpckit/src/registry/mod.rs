//! Registry boundary and the built-in registries.
//!
//! A registry is reached through a registry Address; its factory is the
//! `dyn RegistryFactory` capability named by the Address's scheme. Factories
//! keep one registry per registry URI via [`RegistryCache`].

mod direct;
mod local;

pub use direct::{ADDRESS_PARAM as DIRECT_ADDRESS_PARAM, DirectRegistry, DirectRegistryFactory};
pub use local::{LocalRegistry, LocalRegistryFactory};

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::address::{Address, param};
use crate::error::RpcError;

pub const LOCAL: &str = "local";
pub const DIRECT: &str = "direct";

/// Host and port of the synthesized in-process registry target.
pub const LOCAL_HOST: &str = "127.0.0.1";

/// `local://127.0.0.1:0`, the target used for in-process bindings.
#[must_use]
pub fn local_registry_address() -> Address {
    Address::new(LOCAL, LOCAL_HOST, 0, "", BTreeMap::new())
}

/// Receives the full provider list of a subscribed service.
pub trait NotifyListener: Send + Sync {
    fn notify(&self, registry: &Address, providers: &[Address]);
}

pub trait Registry: Send + Sync {
    fn address(&self) -> &Address;

    /// # Errors
    /// When the registry refuses the registration and strict checking applies.
    fn register(&self, service: &Address) -> Result<(), RpcError>;

    /// # Errors
    /// When the registry cannot be reached; callers treat it as best-effort.
    fn unregister(&self, service: &Address) -> Result<(), RpcError>;

    /// Subscribes `listener` to providers of the service `reference` points at.
    ///
    /// # Errors
    /// When the registry cannot be reached.
    fn subscribe(&self, reference: &Address, listener: Arc<dyn NotifyListener>)
    -> Result<(), RpcError>;

    /// # Errors
    /// When the registry cannot be reached.
    fn unsubscribe(
        &self,
        reference: &Address,
        listener: &Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError>;

    /// Current providers of the service `reference` points at.
    ///
    /// # Errors
    /// When the registry cannot be reached.
    fn discover(&self, reference: &Address) -> Result<Vec<Address>, RpcError>;
}

pub trait RegistryFactory: Send + Sync {
    /// Returns the registry behind `address`, creating it on first use.
    ///
    /// # Errors
    /// When the registry cannot be created for this Address.
    fn get_registry(&self, address: &Address) -> Result<Arc<dyn Registry>, RpcError>;
}

/// One registry instance per registry URI.
#[derive(Default)]
pub struct RegistryCache {
    registries: DashMap<String, Arc<dyn Registry>>,
}

impl std::fmt::Debug for RegistryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let uris: Vec<String> = self.registries.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("RegistryCache").field("uris", &uris).finish()
    }
}

impl RegistryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached registry for `address.uri()`, or creates it from
    /// `address` with the embedded service stripped.
    ///
    /// # Errors
    /// Whatever `create` reports.
    pub fn get_or_create<F>(&self, address: &Address, create: F) -> Result<Arc<dyn Registry>, RpcError>
    where
        F: FnOnce(Address) -> Result<Arc<dyn Registry>, RpcError>,
    {
        let uri = address.uri();
        if let Some(existing) = self.registries.get(&uri) {
            return Ok(existing.value().clone());
        }
        let created = create(address.without_parameter(param::EMBED))?;
        Ok(self.registries.entry(uri).or_insert(created).value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}
