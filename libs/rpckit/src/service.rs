//! Service Descriptor: the export/unexport lifecycle of one service.
//!
//! - `export()` and `unexport()` on the same descriptor serialize on an
//!   instance lock; different descriptors never contend.
//! - Export is all-or-nothing across protocol bindings. When binding `k`
//!   fails, bindings `0..k` of the same call are torn down again and their
//!   identity reservations are dropped.
//! - `registered_addresses()` and `export_handles()` return snapshots that
//!   stay valid while an unexport clears the live collections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::address::{Address, param};
use crate::config::{ProtocolConfig, ServiceConfig, parse_export};
use crate::contract::{InterfaceContract, ServiceHandler};
use crate::error::RpcError;
use crate::identity::Reservation;
use crate::net::{LOOPBACK_HOST, is_absent_host, resolve_advertised_host};
use crate::orchestrator::{ExportOrchestrator, UnexportReport};
use crate::protocol::{Exporter, INJVM};
use crate::registry::{LOCAL, local_registry_address};
use crate::runtime::RpcRuntime;

/// State owned by a live export.
struct LiveExport {
    orchestrator: Arc<dyn ExportOrchestrator>,
    identities: Vec<String>,
}

/// One binding exported by the current `export()` call, not yet published.
struct PendingBinding<'a> {
    reservation: Reservation<'a>,
    exporter: Arc<dyn Exporter>,
    registrations: Vec<Address>,
}

/// Dropping a descriptor that is still exported unexports it, so its
/// identities and transport bindings never outlive it.
pub struct ServiceDescriptor {
    runtime: Arc<RpcRuntime>,
    contract: InterfaceContract,
    implementation: Arc<dyn ServiceHandler>,
    config: ServiceConfig,
    lifecycle: Mutex<Option<LiveExport>>,
    exported: AtomicBool,
    exporters: ArcSwap<Vec<Arc<dyn Exporter>>>,
    registered: ArcSwap<Vec<Address>>,
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("interface", &self.contract.name())
            .field("export", &self.config.export)
            .field("exported", &self.is_exported())
            .finish_non_exhaustive()
    }
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(
        runtime: Arc<RpcRuntime>,
        contract: InterfaceContract,
        implementation: Arc<dyn ServiceHandler>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            runtime,
            contract,
            implementation,
            config,
            lifecycle: Mutex::new(None),
            exported: AtomicBool::new(false),
            exporters: ArcSwap::from_pointee(Vec::new()),
            registered: ArcSwap::from_pointee(Vec::new()),
        }
    }

    #[must_use]
    pub fn contract(&self) -> &InterfaceContract {
        &self.contract
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.exported.load(Ordering::Acquire)
    }

    /// Registration Addresses of the live export.
    #[must_use]
    pub fn registered_addresses(&self) -> Arc<Vec<Address>> {
        self.registered.load_full()
    }

    /// Export Handles of the live export, one per protocol binding.
    #[must_use]
    pub fn export_handles(&self) -> Arc<Vec<Arc<dyn Exporter>>> {
        self.exporters.load_full()
    }

    /// Exports every configured protocol binding and registers it.
    ///
    /// A second call while exported logs a warning and returns `Ok`.
    ///
    /// # Errors
    /// - [`RpcError::InvalidServiceConfig`] when a configured method is not
    ///   declared by the interface or no protocol binding is configured
    /// - [`RpcError::MissingRegistry`], [`RpcError::InvalidExportSpec`],
    ///   [`RpcError::UnresolvedProtocolPort`] for configuration errors
    /// - [`RpcError::DuplicateServiceExport`] when an endpoint is already live
    /// - [`RpcError::RegistrationFailure`] and capability or transport errors
    ///   from the orchestrator
    pub fn export(&self) -> Result<(), RpcError> {
        let mut live = self.lifecycle.lock();
        if live.is_some() {
            tracing::warn!(
                interface = self.contract.name(),
                "service has already been exported"
            );
            return Ok(());
        }

        self.check_methods()?;
        let registries = self.registry_addresses()?;
        let ports = parse_export(&self.config.export)?;
        if self.config.protocols.is_empty() {
            return Err(RpcError::invalid_config(
                self.contract.name(),
                "no protocol binding configured",
            ));
        }
        let orchestrator = self
            .runtime
            .orchestrator(self.config.orchestrator.as_deref())?;

        let mut pending: Vec<PendingBinding<'_>> = Vec::with_capacity(self.config.protocols.len());
        for protocol in &self.config.protocols {
            match self.export_binding(orchestrator.as_ref(), protocol, &ports, &registries) {
                Ok(binding) => pending.push(binding),
                Err(e) => {
                    if !pending.is_empty() {
                        tracing::warn!(
                            interface = self.contract.name(),
                            protocol = %protocol.id,
                            rolled_back = pending.len(),
                            error = %e,
                            "binding failed; tearing down bindings of this export"
                        );
                        let exporters: Vec<_> = pending.iter().map(|b| b.exporter.clone()).collect();
                        let registrations: Vec<_> = pending
                            .iter()
                            .flat_map(|b| b.registrations.iter().cloned())
                            .collect();
                        orchestrator.unexport(&exporters, &registrations);
                    }
                    return Err(e);
                }
            }
        }

        let mut exporters = Vec::with_capacity(pending.len());
        let mut registered = Vec::new();
        let mut identities = Vec::with_capacity(pending.len());
        for binding in pending {
            identities.push(binding.reservation.key().to_owned());
            binding.reservation.confirm();
            exporters.push(binding.exporter);
            registered.extend(binding.registrations);
        }

        tracing::info!(
            interface = self.contract.name(),
            bindings = exporters.len(),
            registrations = registered.len(),
            "service is live"
        );
        self.exporters.store(Arc::new(exporters));
        self.registered.store(Arc::new(registered));
        *live = Some(LiveExport {
            orchestrator,
            identities,
        });
        self.exported.store(true, Ordering::Release);
        Ok(())
    }

    /// Unregisters and releases everything the live export holds.
    ///
    /// Never fails; a no-op when not exported. Whatever the report says, the
    /// descriptor ends up unexported and can be exported again.
    pub fn unexport(&self) -> UnexportReport {
        let mut live = self.lifecycle.lock();
        let Some(state) = live.take() else {
            return UnexportReport::default();
        };

        let exporters = self.exporters.load_full();
        let registered = self.registered.load_full();
        let report = state.orchestrator.unexport(&exporters, &registered);

        for identity in &state.identities {
            self.runtime.identities().release(identity);
        }
        self.exporters.store(Arc::new(Vec::new()));
        self.registered.store(Arc::new(Vec::new()));
        self.exported.store(false, Ordering::Release);

        if !report.is_clean() {
            tracing::warn!(
                interface = self.contract.name(),
                failures = report.failures.len(),
                "service unexported with failures"
            );
        }
        report
    }

    fn check_methods(&self) -> Result<(), RpcError> {
        for method in &self.config.methods {
            let desc = method.parameter_desc();
            if !self.contract.declares(&method.name, desc.as_deref()) {
                let signature = desc.map_or_else(
                    || method.name.clone(),
                    |d| format!("{}({d})", method.name),
                );
                return Err(RpcError::invalid_config(
                    self.contract.name(),
                    format!("method '{signature}' is not declared by the interface"),
                ));
            }
        }
        Ok(())
    }

    fn registry_addresses(&self) -> Result<Vec<Address>, RpcError> {
        let mut addresses = Vec::new();
        for registry in self.config.effective_registries() {
            addresses.extend(registry.to_addresses()?);
        }
        if addresses.is_empty() {
            return Err(RpcError::MissingRegistry {
                interface: self.contract.name().to_owned(),
            });
        }
        Ok(addresses)
    }

    fn advertised_host(&self, local_only: bool, registries: &[Address]) -> String {
        let explicit = self.config.host.as_deref();
        if local_only {
            return match explicit {
                Some(host) if !is_absent_host(Some(host)) => host.trim().to_owned(),
                _ => LOOPBACK_HOST.to_owned(),
            };
        }
        let basic = self.config.basic.as_ref().and_then(|b| b.host.as_deref());
        resolve_advertised_host(explicit, basic, registries)
    }

    fn export_binding(
        &self,
        orchestrator: &dyn ExportOrchestrator,
        protocol: &ProtocolConfig,
        ports: &BTreeMap<String, u16>,
        registries: &[Address],
    ) -> Result<PendingBinding<'_>, RpcError> {
        let interface = self.contract.name();
        let port = *ports
            .get(&protocol.id)
            .ok_or_else(|| RpcError::UnresolvedProtocolPort {
                interface: interface.to_owned(),
                protocol_id: protocol.id.clone(),
            })?;
        let local_only = protocol.id == INJVM;

        let mut parameters = self.config.binding_parameters(protocol);
        parameters.insert(param::NODE_TYPE.to_owned(), param::NODE_TYPE_SERVICE.to_owned());
        parameters.insert(
            param::REFRESH_TIMESTAMP.to_owned(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        let service = Address::new(
            protocol.protocol_name(),
            self.advertised_host(local_only, registries),
            port,
            interface,
            parameters,
        );

        let identity = service.identity_key();
        let Some(reservation) = self.runtime.identities().reserve(&identity) else {
            tracing::warn!(
                interface,
                identity = %identity,
                "endpoint is already exported in this process"
            );
            return Err(RpcError::DuplicateServiceExport {
                interface: interface.to_owned(),
                identity,
            });
        };

        let targets: Vec<Address> = if local_only {
            let local: Vec<Address> = registries
                .iter()
                .filter(|r| r.scheme() == LOCAL)
                .cloned()
                .collect();
            if local.is_empty() {
                vec![local_registry_address()]
            } else {
                local
            }
        } else {
            registries.to_vec()
        };
        let registrations: Vec<Address> = targets.iter().map(|r| r.embed(&service)).collect();

        tracing::debug!(
            interface,
            protocol = %protocol.id,
            identity = %identity,
            registries = registrations.len(),
            "exporting binding"
        );
        let exporter = orchestrator.export(&self.contract, self.implementation.clone(), &registrations)?;
        Ok(PendingBinding {
            reservation,
            exporter,
            registrations,
        })
    }
}

impl Drop for ServiceDescriptor {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().is_some() {
            tracing::warn!(
                interface = self.contract.name(),
                "descriptor dropped while exported; unexporting"
            );
            let report = self.unexport();
            tracing::debug!(
                interface = self.contract.name(),
                unregistered = report.unregistered,
                released = report.released,
                "dropped descriptor unexported"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{MethodConfig, RegistryConfig};
    use serde_json::Value;

    fn handler() -> Arc<dyn ServiceHandler> {
        Arc::new(|_: &str, args: &[Value]| -> anyhow::Result<Value> {
            Ok(args.first().cloned().unwrap_or(Value::Null))
        })
    }

    fn contract() -> InterfaceContract {
        InterfaceContract::new("com.acme.Echo").with_method("echo", ["string"])
    }

    fn injvm_config() -> ServiceConfig {
        ServiceConfig {
            export: "injvm".to_owned(),
            protocols: vec![ProtocolConfig::new("injvm")],
            registries: vec![RegistryConfig::new("local", None)],
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn export_unexport_and_export_again() {
        let runtime = RpcRuntime::with_defaults();
        let service = ServiceDescriptor::new(runtime.clone(), contract(), handler(), injvm_config());

        service.export().unwrap();
        assert!(service.is_exported());
        assert_eq!(service.export_handles().len(), 1);
        assert_eq!(runtime.identities().len(), 1);

        let report = service.unexport();
        assert!(report.is_clean(), "{report:?}");
        assert!(!service.is_exported());
        assert!(runtime.identities().is_empty());
        assert!(service.registered_addresses().is_empty());

        service.export().unwrap();
        assert!(service.is_exported());
    }

    #[test]
    fn undeclared_method_config_fails_before_side_effects() {
        let runtime = RpcRuntime::with_defaults();
        let config = ServiceConfig {
            methods: vec![MethodConfig {
                name: "echo".to_owned(),
                argument_types: Some("i64".to_owned()),
                ..MethodConfig::default()
            }],
            ..injvm_config()
        };
        let service = ServiceDescriptor::new(runtime.clone(), contract(), handler(), config);

        match service.export() {
            Err(RpcError::InvalidServiceConfig { reason, .. }) => assert!(reason.contains("echo(i64)")),
            other => panic!("expected InvalidServiceConfig, got {other:?}"),
        }
        assert!(runtime.identities().is_empty());
        assert!(!service.is_exported());
    }

    #[test]
    fn configuration_errors_are_typed() {
        let runtime = RpcRuntime::with_defaults();
        let cases = [
            (
                ServiceConfig {
                    registries: vec![],
                    ..injvm_config()
                },
                "MissingRegistry",
            ),
            (
                ServiceConfig {
                    export: "rpc".to_owned(),
                    ..injvm_config()
                },
                "InvalidExportSpec",
            ),
            (
                ServiceConfig {
                    export: "rpc:9000".to_owned(),
                    ..injvm_config()
                },
                "UnresolvedProtocolPort",
            ),
            (
                ServiceConfig {
                    protocols: vec![],
                    ..injvm_config()
                },
                "InvalidServiceConfig",
            ),
        ];
        for (config, expected) in cases {
            let service = ServiceDescriptor::new(runtime.clone(), contract(), handler(), config);
            let err = service.export().unwrap_err();
            assert!(format!("{err:?}").starts_with(expected), "{expected}: {err:?}");
        }
    }

    #[test]
    fn unexport_without_export_is_noop() {
        let service = ServiceDescriptor::new(RpcRuntime::with_defaults(), contract(), handler(), injvm_config());
        assert_eq!(service.unexport(), UnexportReport::default());
        assert_eq!(service.unexport(), UnexportReport::default());
    }

    #[test]
    fn dropping_an_exported_descriptor_frees_the_endpoint() {
        let runtime = RpcRuntime::with_defaults();
        let first = ServiceDescriptor::new(runtime.clone(), contract(), handler(), injvm_config());
        first.export().unwrap();
        let identity = runtime.identities().snapshot().remove(0);
        drop(first);
        assert!(!runtime.identities().contains(&identity));

        let second = ServiceDescriptor::new(runtime.clone(), contract(), handler(), injvm_config());
        second.export().unwrap();
        assert!(runtime.identities().is_live(&identity));
    }

    #[test]
    fn injvm_binding_advertises_loopback() {
        let service = ServiceDescriptor::new(RpcRuntime::with_defaults(), contract(), handler(), injvm_config());
        service.export().unwrap();
        let handles = service.export_handles();
        let address = handles[0].address();
        assert_eq!(address.scheme(), "injvm");
        assert_eq!(address.host(), LOOPBACK_HOST);
        assert_eq!(address.parameter(param::NODE_TYPE), Some("service"));
        assert!(address.parameter(param::REFRESH_TIMESTAMP).is_some());
        service.unexport();
    }
}
