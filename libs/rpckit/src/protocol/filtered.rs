use std::sync::Arc;

use serde_json::Value;

use super::{Exporter, Invoker, Protocol, Provider, Referer};
use crate::address::Address;
use crate::capability::CapabilityHub;
use crate::contract::{InterfaceContract, Request};
use crate::error::RpcError;
use crate::filter::FilterChain;

/// Decorates a protocol so providers and referers run behind the filter
/// chain named by their Address.
pub struct FilteredProtocol {
    inner: Arc<dyn Protocol>,
    hub: Arc<CapabilityHub>,
}

impl FilteredProtocol {
    #[must_use]
    pub fn new(inner: Arc<dyn Protocol>, hub: Arc<CapabilityHub>) -> Self {
        Self { inner, hub }
    }
}

impl Protocol for FilteredProtocol {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn export(
        &self,
        provider: Arc<dyn Provider>,
        address: &Address,
    ) -> Result<Arc<dyn Exporter>, RpcError> {
        let chain = FilterChain::from_address(&self.hub, address)?;
        if chain.is_empty() {
            return self.inner.export(provider, address);
        }
        tracing::debug!(
            identity = %address.identity_key(),
            filters = ?chain.names(),
            "provider filter chain built"
        );
        self.inner
            .export(Arc::new(FilteredProvider { inner: provider, chain }), address)
    }

    fn refer(
        &self,
        contract: &InterfaceContract,
        provider: &Address,
    ) -> Result<Arc<dyn Referer>, RpcError> {
        let chain = FilterChain::from_address(&self.hub, provider)?;
        let referer = self.inner.refer(contract, provider)?;
        if chain.is_empty() {
            return Ok(referer);
        }
        Ok(Arc::new(FilteredReferer {
            inner: referer,
            chain,
        }))
    }
}

struct FilteredProvider {
    inner: Arc<dyn Provider>,
    chain: FilterChain,
}

impl Invoker for FilteredProvider {
    fn address(&self) -> &Address {
        self.inner.address()
    }

    fn call(&self, request: &Request) -> Result<Value, RpcError> {
        self.chain.invoke(self.inner.as_ref(), request)
    }
}

impl Provider for FilteredProvider {
    fn contract(&self) -> &InterfaceContract {
        self.inner.contract()
    }
}

struct FilteredReferer {
    inner: Arc<dyn Referer>,
    chain: FilterChain,
}

impl Invoker for FilteredReferer {
    fn address(&self) -> &Address {
        self.inner.address()
    }

    fn call(&self, request: &Request) -> Result<Value, RpcError> {
        self.chain.invoke(self.inner.as_ref(), request)
    }
}

impl Referer for FilteredReferer {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}
