use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use super::{Exporter, Invoker, Protocol, Provider, Referer};
use crate::address::Address;
use crate::contract::{InterfaceContract, Request};
use crate::error::RpcError;

type ProviderTable = Arc<DashMap<String, Arc<dyn Provider>>>;

/// Loopback transport: referers call straight into the exported provider.
///
/// Registered as `injvm` by default; any other name can be used to serve
/// a protocol in-process (tests, single-binary deployments).
pub struct InProcessProtocol {
    name: String,
    providers: ProviderTable,
}

impl InProcessProtocol {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Arc::new(DashMap::new()),
        }
    }

    /// Identity keys of every provider currently bound.
    #[must_use]
    pub fn bound(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl Protocol for InProcessProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn export(
        &self,
        provider: Arc<dyn Provider>,
        address: &Address,
    ) -> Result<Arc<dyn Exporter>, RpcError> {
        let key = address.identity_key();
        match self.providers.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(RpcError::DuplicateServiceExport {
                    interface: address.path().to_owned(),
                    identity: key,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(provider.clone());
            }
        }
        tracing::debug!(protocol = %self.name, identity = %key, "in-process provider bound");
        Ok(Arc::new(InProcessExporter {
            address: address.clone(),
            key,
            provider,
            providers: self.providers.clone(),
            available: AtomicBool::new(true),
        }))
    }

    fn refer(
        &self,
        _contract: &InterfaceContract,
        provider: &Address,
    ) -> Result<Arc<dyn Referer>, RpcError> {
        Ok(Arc::new(InProcessReferer {
            address: provider.clone(),
            key: provider.identity_key(),
            providers: self.providers.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct InProcessExporter {
    address: Address,
    key: String,
    provider: Arc<dyn Provider>,
    providers: ProviderTable,
    available: AtomicBool,
}

impl Exporter for InProcessExporter {
    fn address(&self) -> &Address {
        &self.address
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn unexport(&self) -> Result<(), RpcError> {
        if self.available.swap(false, Ordering::AcqRel) {
            self.providers
                .remove_if(&self.key, |_, bound| Arc::ptr_eq(bound, &self.provider));
            tracing::debug!(identity = %self.key, "in-process provider released");
        }
        Ok(())
    }
}

struct InProcessReferer {
    address: Address,
    key: String,
    providers: ProviderTable,
    destroyed: AtomicBool,
}

impl Invoker for InProcessReferer {
    fn address(&self) -> &Address {
        &self.address
    }

    fn call(&self, request: &Request) -> Result<Value, RpcError> {
        let provider = if self.destroyed.load(Ordering::Acquire) {
            None
        } else {
            // Clone out of the map so the shard lock is not held during the call.
            self.providers.get(&self.key).map(|p| p.value().clone())
        };
        match provider {
            Some(provider) => provider.call(request),
            None => Err(RpcError::NoAvailableProvider {
                interface: request.interface().to_owned(),
            }),
        }
    }
}

impl Referer for InProcessReferer {
    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.providers.contains_key(&self.key)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::contract::ServiceHandler;
    use crate::protocol::DefaultProvider;
    use serde_json::json;

    fn provider(address: &Address) -> Arc<dyn Provider> {
        let handler: Arc<dyn ServiceHandler> =
            Arc::new(|m: &str, _: &[Value]| -> anyhow::Result<Value> { Ok(json!(m)) });
        Arc::new(DefaultProvider::new(
            handler,
            address.clone(),
            InterfaceContract::new("X").with_method("hello", Vec::<String>::new()),
        ))
    }

    #[test]
    fn referer_reaches_exported_provider_until_unexport() {
        let protocol = InProcessProtocol::new("injvm");
        let addr = Address::parse("injvm://127.0.0.1:0/X").unwrap();
        let exporter = protocol.export(provider(&addr), &addr).unwrap();
        let referer = protocol.refer(&InterfaceContract::new("X"), &addr).unwrap();

        assert!(referer.is_available());
        assert_eq!(
            referer.call(&Request::new("X", "hello", vec![])).unwrap(),
            json!("hello")
        );

        exporter.unexport().unwrap();
        assert!(!exporter.is_available());
        assert!(!referer.is_available());
        assert!(matches!(
            referer.call(&Request::new("X", "hello", vec![])),
            Err(RpcError::NoAvailableProvider { .. })
        ));
        assert!(protocol.bound().is_empty());
    }

    #[test]
    fn binding_same_identity_twice_fails() {
        let protocol = InProcessProtocol::new("injvm");
        let addr = Address::parse("injvm://127.0.0.1:0/X").unwrap();
        let _first = protocol.export(provider(&addr), &addr).unwrap();
        let second = protocol.export(provider(&addr), &addr);
        assert!(matches!(second, Err(RpcError::DuplicateServiceExport { .. })));
    }

    #[test]
    fn stale_exporter_does_not_remove_newer_binding() {
        let protocol = InProcessProtocol::new("injvm");
        let addr = Address::parse("injvm://127.0.0.1:0/X").unwrap();
        let old = protocol.export(provider(&addr), &addr).unwrap();
        old.unexport().unwrap();
        let _new = protocol.export(provider(&addr), &addr).unwrap();

        old.unexport().unwrap();
        assert_eq!(protocol.bound(), vec![addr.identity_key()]);
    }
}
