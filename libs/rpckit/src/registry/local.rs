use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use super::{NotifyListener, Registry, RegistryCache, RegistryFactory};
use crate::address::Address;
use crate::error::RpcError;

/// In-process provider table keyed by service key (`group/path/version`).
///
/// Listeners get the full provider list on subscribe and after every change.
/// Snapshot and delivery happen under one notify lock, so listeners see lists
/// in the order the changes were made. The table locks are released before
/// delivery and the notify lock is reentrant, so a listener may call back
/// into the registry.
pub struct LocalRegistry {
    address: Address,
    providers: RwLock<HashMap<String, Vec<Address>>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn NotifyListener>>>>,
    notify: ReentrantMutex<()>,
}

impl LocalRegistry {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            providers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            notify: ReentrantMutex::new(()),
        }
    }

    fn providers_of(&self, service_key: &str) -> Vec<Address> {
        self.providers
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default()
    }

    fn notify_all(&self, service_key: &str) {
        let _ordered = self.notify.lock();
        let providers = self.providers_of(service_key);
        let listeners = self
            .listeners
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.notify(&self.address, &providers);
        }
    }
}

impl Registry for LocalRegistry {
    fn address(&self) -> &Address {
        &self.address
    }

    fn register(&self, service: &Address) -> Result<(), RpcError> {
        let key = service.service_key();
        {
            let mut providers = self.providers.write();
            let list = providers.entry(key.clone()).or_default();
            list.retain(|p| !p.same_target(service));
            list.push(service.clone());
        }
        tracing::debug!(registry = %self.address.uri(), identity = %service.identity_key(), "registered");
        self.notify_all(&key);
        Ok(())
    }

    fn unregister(&self, service: &Address) -> Result<(), RpcError> {
        let key = service.service_key();
        let removed = {
            let mut providers = self.providers.write();
            providers.get_mut(&key).is_some_and(|list| {
                let before = list.len();
                list.retain(|p| !p.same_target(service));
                list.len() != before
            })
        };
        if removed {
            tracing::debug!(registry = %self.address.uri(), identity = %service.identity_key(), "unregistered");
            self.notify_all(&key);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        reference: &Address,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError> {
        let key = reference.service_key();
        let _ordered = self.notify.lock();
        self.listeners
            .write()
            .entry(key.clone())
            .or_default()
            .push(listener.clone());
        listener.notify(&self.address, &self.providers_of(&key));
        Ok(())
    }

    fn unsubscribe(
        &self,
        reference: &Address,
        listener: &Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError> {
        let key = reference.service_key();
        if let Some(list) = self.listeners.write().get_mut(&key) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
        Ok(())
    }

    fn discover(&self, reference: &Address) -> Result<Vec<Address>, RpcError> {
        Ok(self.providers_of(&reference.service_key()))
    }
}

/// Factory for `local://` registries.
#[derive(Debug, Default)]
pub struct LocalRegistryFactory {
    cache: RegistryCache,
}

impl LocalRegistryFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryFactory for LocalRegistryFactory {
    fn get_registry(&self, address: &Address) -> Result<Arc<dyn Registry>, RpcError> {
        self.cache
            .get_or_create(address, |addr| {
                Ok(Arc::new(LocalRegistry::new(addr)) as Arc<dyn Registry>)
            })
    }
}
