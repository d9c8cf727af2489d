//! Export/unexport orchestration and the referencing entry points.
//!
//! The orchestrator is stateless between calls. It is resolved from the
//! capability hub by name, so a host can swap in its own implementation.
//!
//! Export of one binding:
//! 1. Extract the service Address embedded in the first registration Address.
//! 2. Resolve the protocol named by its scheme and decorate it with filters.
//! 3. Bind a [`DefaultProvider`] and obtain the Export Handle.
//! 4. Register the service Address with every registry, in order.
//!
//! A registration failure unregisters what this call registered, releases
//! the new handle and propagates. Unexport is best-effort throughout and
//! reports what went wrong instead of failing.

use std::sync::{Arc, Weak};

use crate::address::{Address, param};
use crate::capability::CapabilityHub;
use crate::cluster::ClusterSupport;
use crate::contract::{InterfaceContract, ServiceHandler};
use crate::error::RpcError;
use crate::protocol::{DefaultProvider, Exporter, FilteredProtocol, Protocol};
use crate::proxy::{ProxyFactory, RefererInvocationHandler, ServiceClient};
use crate::registry::{Registry, RegistryFactory};

/// One target that could not be torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnexportFailure {
    pub target: String,
    pub error: String,
}

/// Outcome of a best-effort unexport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnexportReport {
    pub unregistered: usize,
    pub released: usize,
    pub failures: Vec<UnexportFailure>,
}

impl UnexportReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, target: String, error: &RpcError) {
        tracing::warn!(target_address = %target, error = %error, "unexport step failed");
        self.failures.push(UnexportFailure {
            target,
            error: error.to_string(),
        });
    }
}

pub trait ExportOrchestrator: Send + Sync {
    /// Binds `implementation` and registers it with every registration Address.
    ///
    /// # Errors
    /// Capability lookup, transport binding, or [`RpcError::RegistrationFailure`].
    fn export(
        &self,
        contract: &InterfaceContract,
        implementation: Arc<dyn ServiceHandler>,
        registrations: &[Address],
    ) -> Result<Arc<dyn Exporter>, RpcError>;

    /// Unregisters every registration Address, then releases every handle.
    fn unexport(&self, exporters: &[Arc<dyn Exporter>], registrations: &[Address])
    -> UnexportReport;

    /// Builds and initializes a cluster over registry Addresses that embed
    /// the reference Address.
    ///
    /// # Errors
    /// [`RpcError::RegistryUnreachable`] when no registry can be subscribed.
    fn build_cluster(
        &self,
        contract: &InterfaceContract,
        registries: &[Address],
    ) -> Result<Arc<ClusterSupport>, RpcError>;

    /// Produces a client handle dispatching into `clusters`.
    ///
    /// # Errors
    /// Only when the proxy factory named `proxy_kind` is not registered.
    fn refer(
        &self,
        contract: &InterfaceContract,
        clusters: Vec<Arc<ClusterSupport>>,
        proxy_kind: &str,
    ) -> Result<ServiceClient, RpcError>;
}

/// Built-in orchestrator. Holds the hub weakly; the hub owns it.
pub struct DefaultOrchestrator {
    hub: Weak<CapabilityHub>,
}

impl DefaultOrchestrator {
    #[must_use]
    pub fn new(hub: Weak<CapabilityHub>) -> Self {
        Self { hub }
    }

    fn hub(&self) -> Result<Arc<CapabilityHub>, RpcError> {
        self.hub.upgrade().ok_or(RpcError::RuntimeClosed)
    }
}

fn registry_for(hub: &CapabilityHub, registration: &Address) -> Result<Arc<dyn Registry>, RpcError> {
    let factory = hub.resolve::<dyn RegistryFactory>(registration.scheme())?;
    factory.get_registry(registration)
}

fn register_one(
    hub: &CapabilityHub,
    registration: &Address,
    service: &Address,
) -> Result<Arc<dyn Registry>, RpcError> {
    let registry = registry_for(hub, registration)?;
    match registry.register(service) {
        Ok(()) => Ok(registry),
        Err(e @ RpcError::RegistrationFailure { .. }) => Err(e),
        Err(e) => Err(RpcError::RegistrationFailure {
            registry: registration.uri(),
            service: service.identity_key(),
            reason: e.to_string(),
        }),
    }
}

impl ExportOrchestrator for DefaultOrchestrator {
    fn export(
        &self,
        contract: &InterfaceContract,
        implementation: Arc<dyn ServiceHandler>,
        registrations: &[Address],
    ) -> Result<Arc<dyn Exporter>, RpcError> {
        let hub = self.hub()?;
        let first = registrations.first().ok_or_else(|| RpcError::MissingRegistry {
            interface: contract.name().to_owned(),
        })?;
        let service = first.embedded()?;

        let protocol = hub.resolve::<dyn Protocol>(service.scheme())?;
        let protocol = FilteredProtocol::new(protocol, hub.clone());
        let provider = Arc::new(DefaultProvider::new(
            implementation,
            service.clone(),
            contract.clone(),
        ));
        let exporter = protocol.export(provider, &service)?;

        let mut registered: Vec<Arc<dyn Registry>> = Vec::with_capacity(registrations.len());
        for registration in registrations {
            match register_one(&hub, registration, &service) {
                Ok(registry) => registered.push(registry),
                Err(e) => {
                    tracing::warn!(
                        interface = contract.name(),
                        registry = %registration.uri(),
                        error = %e,
                        "registration failed; rolling back binding"
                    );
                    for registry in registered.iter().rev() {
                        if let Err(undo) = registry.unregister(&service) {
                            tracing::warn!(registry = %registry.address().uri(), error = %undo, "rollback unregister failed");
                        }
                    }
                    if let Err(undo) = exporter.unexport() {
                        tracing::warn!(identity = %service.identity_key(), error = %undo, "rollback release failed");
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            interface = contract.name(),
            service = %service.uri(),
            registries = registered.len(),
            "service exported"
        );
        Ok(exporter)
    }

    fn unexport(
        &self,
        exporters: &[Arc<dyn Exporter>],
        registrations: &[Address],
    ) -> UnexportReport {
        let mut report = UnexportReport::default();

        match self.hub() {
            Ok(hub) => {
                for registration in registrations {
                    let outcome = registration.embedded().and_then(|service| {
                        registry_for(&hub, registration)?.unregister(&service)
                    });
                    match outcome {
                        Ok(()) => report.unregistered += 1,
                        Err(e) => report.fail(registration.uri(), &e),
                    }
                }
            }
            Err(e) => {
                for registration in registrations {
                    report.fail(registration.uri(), &e);
                }
            }
        }

        for exporter in exporters {
            match exporter.unexport() {
                Ok(()) => report.released += 1,
                Err(e) => report.fail(exporter.address().uri(), &e),
            }
        }

        tracing::info!(
            unregistered = report.unregistered,
            released = report.released,
            failures = report.failures.len(),
            "service unexported"
        );
        report
    }

    fn build_cluster(
        &self,
        contract: &InterfaceContract,
        registries: &[Address],
    ) -> Result<Arc<ClusterSupport>, RpcError> {
        let hub = self.hub()?;
        let cluster = ClusterSupport::new(Arc::downgrade(&hub), contract.clone(), registries.to_vec())?;
        cluster.init()?;
        Ok(Arc::new(cluster))
    }

    fn refer(
        &self,
        contract: &InterfaceContract,
        clusters: Vec<Arc<ClusterSupport>>,
        proxy_kind: &str,
    ) -> Result<ServiceClient, RpcError> {
        let hub = self.hub()?;
        let factory = hub.resolve::<dyn ProxyFactory>(proxy_kind)?;
        let application = clusters
            .first()
            .and_then(|c| c.registries().first())
            .and_then(|r| r.embedded().ok())
            .and_then(|reference| reference.parameter(param::APPLICATION).map(str::to_owned));
        let handler = RefererInvocationHandler::new(contract.name(), clusters)
            .with_application(application.as_deref());
        Ok(factory.get_proxy(contract, Arc::new(handler)))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::registry::local_registry_address;
    use crate::runtime::RpcRuntime;
    use serde_json::{Value, json};

    fn handler() -> Arc<dyn ServiceHandler> {
        Arc::new(|_: &str, args: &[Value]| -> anyhow::Result<Value> {
            Ok(args.first().cloned().unwrap_or(Value::Null))
        })
    }

    fn contract() -> InterfaceContract {
        InterfaceContract::new("X").with_method("echo", ["string"])
    }

    #[test]
    fn export_then_refer_through_local_registry() {
        let runtime = RpcRuntime::with_defaults();
        let orchestrator = runtime.orchestrator(None).unwrap();
        let service = Address::parse("injvm://127.0.0.1:0/X?nodeType=service").unwrap();
        let registrations = vec![local_registry_address().embed(&service)];

        let exporter = orchestrator
            .export(&contract(), handler(), &registrations)
            .unwrap();
        assert_eq!(exporter.address(), &service);

        let reference = Address::parse("injvm://127.0.0.1:0/X?nodeType=referer&application=app").unwrap();
        let cluster = orchestrator
            .build_cluster(&contract(), &[local_registry_address().embed(&reference)])
            .unwrap();
        let client = orchestrator.refer(&contract(), vec![cluster], "default").unwrap();
        assert_eq!(client.call("echo", vec![json!("hi")]).unwrap(), json!("hi"));

        let report = orchestrator.unexport(&[exporter], &registrations);
        assert!(report.is_clean(), "{report:?}");
        assert_eq!((report.unregistered, report.released), (1, 1));
        assert!(client.call("echo", vec![json!("hi")]).is_err());
    }

    #[test]
    fn export_without_registration_is_missing_registry() {
        let runtime = RpcRuntime::with_defaults();
        let orchestrator = runtime.orchestrator(None).unwrap();
        let err = orchestrator.export(&contract(), handler(), &[]).err().unwrap();
        assert!(matches!(err, RpcError::MissingRegistry { .. }));
    }

    #[test]
    fn refer_with_unknown_proxy_fails() {
        let runtime = RpcRuntime::with_defaults();
        let orchestrator = runtime.orchestrator(None).unwrap();
        let err = orchestrator.refer(&contract(), vec![], "bytecode").unwrap_err();
        assert!(matches!(err, RpcError::Capability(_)));
    }
}
