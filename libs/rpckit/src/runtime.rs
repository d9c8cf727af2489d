//! Process-scoped shared state handed to every descriptor.
//!
//! An [`RpcRuntime`] owns the [`CapabilityHub`] and the process-wide
//! [`IdentitySet`]. Create it once, share it by `Arc`, and pass it to every
//! [`crate::service::ServiceDescriptor`] and
//! [`crate::reference::ReferenceDescriptor`].

use std::sync::Arc;

use crate::capability::CapabilityHub;
use crate::config::DEFAULT_ORCHESTRATOR;
use crate::error::RpcError;
use crate::filter::{
    ACCESS_CONTROL, ACCESS_LOG, AccessControlFilterFactory, AccessLogFilterFactory, FilterFactory,
    RATE_LIMIT, RateLimitFilterFactory,
};
use crate::identity::IdentitySet;
use crate::orchestrator::{DefaultOrchestrator, ExportOrchestrator};
use crate::protocol::{INJVM, InProcessProtocol, Protocol};
use crate::proxy::{DefaultProxyFactory, ProxyFactory};
use crate::registry::{DIRECT, DirectRegistryFactory, LOCAL, LocalRegistryFactory, RegistryFactory};

pub struct RpcRuntime {
    hub: Arc<CapabilityHub>,
    identities: IdentitySet,
}

impl std::fmt::Debug for RpcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRuntime")
            .field("hub", &self.hub)
            .field("identities", &self.identities)
            .finish()
    }
}

impl RpcRuntime {
    /// A runtime with an empty hub; register every capability yourself.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::new(CapabilityHub::new()),
            identities: IdentitySet::new(),
        })
    }

    /// A runtime with the built-in capabilities registered.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        let runtime = Self::new();
        let hub = &runtime.hub;

        hub.register::<dyn ExportOrchestrator>(
            DEFAULT_ORCHESTRATOR,
            Arc::new(DefaultOrchestrator::new(Arc::downgrade(hub))),
        );
        hub.register_factory::<dyn Protocol, _>(INJVM, || Arc::new(InProcessProtocol::new(INJVM)));
        hub.register_factory::<dyn RegistryFactory, _>(LOCAL, || Arc::new(LocalRegistryFactory::new()));
        hub.register_factory::<dyn RegistryFactory, _>(DIRECT, || {
            Arc::new(DirectRegistryFactory::new())
        });
        hub.register::<dyn ProxyFactory>(crate::config::DEFAULT_PROXY, Arc::new(DefaultProxyFactory));
        hub.register::<dyn FilterFactory>(ACCESS_LOG, Arc::new(AccessLogFilterFactory));
        hub.register::<dyn FilterFactory>(RATE_LIMIT, Arc::new(RateLimitFilterFactory));
        hub.register::<dyn FilterFactory>(ACCESS_CONTROL, Arc::new(AccessControlFilterFactory));

        tracing::debug!(capabilities = hub.len(), "rpc runtime initialized");
        runtime
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<CapabilityHub> {
        &self.hub
    }

    #[must_use]
    pub fn identities(&self) -> &IdentitySet {
        &self.identities
    }

    /// Resolves the orchestrator named `name`, or the default one.
    ///
    /// # Errors
    /// [`RpcError::Capability`] when no orchestrator is registered under that name.
    pub fn orchestrator(&self, name: Option<&str>) -> Result<Arc<dyn ExportOrchestrator>, RpcError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_ORCHESTRATOR);
        Ok(self.hub.resolve::<dyn ExportOrchestrator>(name)?)
    }

    /// Registers `protocol` under its own name.
    pub fn register_protocol(&self, protocol: Arc<dyn Protocol>) {
        let name = protocol.name().to_owned();
        self.hub.register::<dyn Protocol>(&name, protocol);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_builtin_capability() {
        let runtime = RpcRuntime::with_defaults();
        let hub = runtime.hub();

        assert!(runtime.orchestrator(None).is_ok());
        assert!(runtime.orchestrator(Some(" ")).is_ok());
        assert!(hub.contains::<dyn Protocol>(INJVM));
        assert_eq!(hub.names::<dyn RegistryFactory>(), vec![DIRECT, LOCAL]);
        assert!(hub.contains::<dyn ProxyFactory>("default"));
        assert_eq!(
            hub.names::<dyn FilterFactory>(),
            vec![ACCESS_CONTROL, ACCESS_LOG, RATE_LIMIT]
        );
        assert!(runtime.identities().is_empty());
    }

    #[test]
    fn runtimes_do_not_share_state() {
        let a = RpcRuntime::with_defaults();
        let b = RpcRuntime::with_defaults();
        a.identities().reserve("k").unwrap().confirm();
        assert!(!b.identities().contains("k"));

        let pa = a.hub().resolve::<dyn Protocol>(INJVM).unwrap();
        let pb = b.hub().resolve::<dyn Protocol>(INJVM).unwrap();
        assert!(!Arc::ptr_eq(&pa, &pb));
    }

    #[test]
    fn registered_protocol_is_resolvable_by_name() {
        let runtime = RpcRuntime::with_defaults();
        runtime.register_protocol(Arc::new(InProcessProtocol::new("rpc")));
        assert_eq!(runtime.hub().resolve::<dyn Protocol>("rpc").unwrap().name(), "rpc");
    }

    #[test]
    fn orchestrator_lookup_fails_for_unknown_name() {
        let runtime = RpcRuntime::new();
        assert!(matches!(
            runtime.orchestrator(Some("custom")),
            Err(RpcError::Capability(_))
        ));
    }
}
