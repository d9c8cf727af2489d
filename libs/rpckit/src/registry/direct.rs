use std::sync::Arc;

use super::{NotifyListener, Registry, RegistryCache, RegistryFactory};
use crate::address::{Address, param};
use crate::error::RpcError;
use crate::net::split_host_port;

/// Parameter listing extra `host:port` providers of a direct registry.
pub const ADDRESS_PARAM: &str = "address";

/// Static provider list taken from the registry Address itself.
///
/// Providers are the Address's own host:port plus every `host:port` in its
/// `address` parameter. Registration is accepted and ignored.
pub struct DirectRegistry {
    address: Address,
    targets: Vec<(String, u16)>,
}

impl DirectRegistry {
    /// # Errors
    /// [`RpcError::MalformedAddress`] when an entry of `address` is not `host:port`.
    pub fn new(address: Address) -> Result<Self, RpcError> {
        let mut targets = vec![(address.host().to_owned(), address.port())];
        for entry in address
            .parameter(ADDRESS_PARAM)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let target = split_host_port(entry).ok_or_else(|| RpcError::MalformedAddress {
                input: entry.to_owned(),
                reason: "direct provider must be host:port".to_owned(),
            })?;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        Ok(Self { address, targets })
    }

    fn providers_for(&self, reference: &Address) -> Vec<Address> {
        let mut parameters = reference.parameters().clone();
        parameters.insert(param::NODE_TYPE.to_owned(), param::NODE_TYPE_SERVICE.to_owned());
        parameters.remove(param::REFRESH_TIMESTAMP);
        parameters.remove(param::FILTER);
        self.targets
            .iter()
            .map(|(host, port)| {
                Address::new(
                    reference.scheme(),
                    host.clone(),
                    *port,
                    reference.path(),
                    parameters.clone(),
                )
            })
            .collect()
    }
}

impl Registry for DirectRegistry {
    fn address(&self) -> &Address {
        &self.address
    }

    fn register(&self, service: &Address) -> Result<(), RpcError> {
        tracing::debug!(identity = %service.identity_key(), "direct registry ignores register");
        Ok(())
    }

    fn unregister(&self, _service: &Address) -> Result<(), RpcError> {
        Ok(())
    }

    fn subscribe(
        &self,
        reference: &Address,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError> {
        listener.notify(&self.address, &self.providers_for(reference));
        Ok(())
    }

    fn unsubscribe(
        &self,
        _reference: &Address,
        _listener: &Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError> {
        Ok(())
    }

    fn discover(&self, reference: &Address) -> Result<Vec<Address>, RpcError> {
        Ok(self.providers_for(reference))
    }
}

#[derive(Debug, Default)]
pub struct DirectRegistryFactory {
    cache: RegistryCache,
}

impl DirectRegistryFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryFactory for DirectRegistryFactory {
    fn get_registry(&self, address: &Address) -> Result<Arc<dyn Registry>, RpcError> {
        self.cache.get_or_create(address, |addr| {
            Ok(Arc::new(DirectRegistry::new(addr)?) as Arc<dyn Registry>)
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn discovers_own_and_listed_targets() {
        let registry = DirectRegistry::new(
            Address::parse("direct://10.0.0.1:9000?address=10.0.0.2%3A9001%2C10.0.0.1%3A9000").unwrap(),
        )
        .unwrap();
        let reference = Address::parse(
            "rpc://10.0.0.9:0/X?group=g&nodeType=referer&refreshTimestamp=1&filter=access_log",
        )
        .unwrap();

        let providers = registry.discover(&reference).unwrap();
        let uris: Vec<String> = providers.iter().map(Address::uri).collect();
        assert_eq!(uris, vec!["rpc://10.0.0.1:9000/X", "rpc://10.0.0.2:9001/X"]);
        assert_eq!(providers[0].group(), "g");
        assert_eq!(providers[0].parameter(param::NODE_TYPE), Some("service"));
        assert_eq!(providers[0].parameter(param::FILTER), None);
    }

    #[test]
    fn rejects_malformed_target_list() {
        let addr = Address::parse("direct://10.0.0.1:9000?address=nohost").unwrap();
        assert!(matches!(
            DirectRegistry::new(addr),
            Err(RpcError::MalformedAddress { .. })
        ));
    }
}
