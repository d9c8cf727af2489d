//! Client-side descriptor: turns a [`ReferenceConfig`] into a [`ServiceClient`].
//!
//! The client is built on first use and cached; `destroy()` tears the
//! clusters down so the next `client()` call subscribes afresh.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::{Address, param};
use crate::cluster::ClusterSupport;
use crate::config::{DEFAULT_PROXY, ReferenceConfig};
use crate::contract::InterfaceContract;
use crate::error::RpcError;
use crate::net::resolve_advertised_host;
use crate::proxy::ServiceClient;
use crate::runtime::RpcRuntime;

struct Referred {
    client: ServiceClient,
    clusters: Vec<Arc<ClusterSupport>>,
}

pub struct ReferenceDescriptor {
    runtime: Arc<RpcRuntime>,
    contract: InterfaceContract,
    config: ReferenceConfig,
    state: Mutex<Option<Referred>>,
}

impl std::fmt::Debug for ReferenceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceDescriptor")
            .field("interface", &self.contract.name())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl ReferenceDescriptor {
    #[must_use]
    pub fn new(runtime: Arc<RpcRuntime>, contract: InterfaceContract, config: ReferenceConfig) -> Self {
        Self {
            runtime,
            contract,
            config,
            state: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_some()
    }

    /// The call-through client, building it on first use.
    ///
    /// # Errors
    /// - [`RpcError::MissingRegistry`] when no registry is configured
    /// - [`RpcError::RegistryUnreachable`] when no registry can be subscribed
    /// - [`RpcError::Capability`] for an unknown orchestrator or proxy kind
    pub fn client(&self) -> Result<ServiceClient, RpcError> {
        let mut state = self.state.lock();
        if let Some(referred) = state.as_ref() {
            return Ok(referred.client.clone());
        }

        let mut registries = Vec::new();
        for registry in &self.config.registries {
            registries.extend(registry.to_addresses()?);
        }
        if registries.is_empty() {
            return Err(RpcError::MissingRegistry {
                interface: self.contract.name().to_owned(),
            });
        }

        let mut parameters = self.config.reference_parameters();
        parameters.insert(param::NODE_TYPE.to_owned(), param::NODE_TYPE_REFERER.to_owned());
        parameters.insert(
            param::REFRESH_TIMESTAMP.to_owned(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        let reference = Address::new(
            self.config.protocol_name(),
            resolve_advertised_host(self.config.host.as_deref(), None, &registries),
            0,
            self.contract.name(),
            parameters,
        );
        let registries: Vec<Address> = registries.iter().map(|r| r.embed(&reference)).collect();

        let orchestrator = self
            .runtime
            .orchestrator(self.config.orchestrator.as_deref())?;
        let cluster = orchestrator.build_cluster(&self.contract, &registries)?;
        let proxy = self
            .config
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROXY);
        let clusters = vec![cluster];
        let client = match orchestrator.refer(&self.contract, clusters.clone(), proxy) {
            Ok(client) => client,
            Err(e) => {
                for cluster in &clusters {
                    cluster.destroy();
                }
                return Err(e);
            }
        };

        tracing::info!(
            interface = self.contract.name(),
            reference = %reference.uri(),
            registries = registries.len(),
            "reference initialized"
        );
        *state = Some(Referred {
            client: client.clone(),
            clusters,
        });
        Ok(client)
    }

    /// Unsubscribes and drops every referer. Clients handed out earlier stop
    /// finding providers.
    pub fn destroy(&self) {
        if let Some(referred) = self.state.lock().take() {
            for cluster in &referred.clusters {
                cluster.destroy();
            }
            tracing::info!(interface = self.contract.name(), "reference destroyed");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{ProtocolConfig, RegistryConfig, ServiceConfig};
    use crate::contract::ServiceHandler;
    use crate::service::ServiceDescriptor;
    use serde_json::{Value, json};

    fn contract() -> InterfaceContract {
        InterfaceContract::new("com.acme.Echo").with_method("echo", ["string"])
    }

    fn export(runtime: &Arc<RpcRuntime>) -> ServiceDescriptor {
        let handler: Arc<dyn ServiceHandler> =
            Arc::new(|_: &str, args: &[Value]| -> anyhow::Result<Value> { Ok(args[0].clone()) });
        let service = ServiceDescriptor::new(
            runtime.clone(),
            contract(),
            handler,
            ServiceConfig {
                export: "injvm".to_owned(),
                protocols: vec![ProtocolConfig::new("injvm")],
                registries: vec![RegistryConfig::new("local", None)],
                ..ServiceConfig::default()
            },
        );
        service.export().unwrap();
        service
    }

    fn reference_config() -> ReferenceConfig {
        ReferenceConfig {
            protocol: Some("injvm".to_owned()),
            registries: vec![RegistryConfig::new("local", None)],
            ..ReferenceConfig::default()
        }
    }

    #[test]
    fn client_is_cached_until_destroy() {
        let runtime = RpcRuntime::with_defaults();
        let _service = export(&runtime);
        let reference = ReferenceDescriptor::new(runtime, contract(), reference_config());

        let client = reference.client().unwrap();
        assert!(reference.is_initialized());
        assert_eq!(client.call("echo", vec![json!("a")]).unwrap(), json!("a"));

        reference.destroy();
        assert!(!reference.is_initialized());
        assert!(matches!(
            client.call("echo", vec![json!("a")]),
            Err(RpcError::NoAvailableProvider { .. })
        ));

        let rebuilt = reference.client().unwrap();
        assert_eq!(rebuilt.call("echo", vec![json!("b")]).unwrap(), json!("b"));
    }

    #[test]
    fn reference_without_registry_fails() {
        let reference = ReferenceDescriptor::new(
            RpcRuntime::with_defaults(),
            contract(),
            ReferenceConfig::default(),
        );
        assert!(matches!(reference.client(), Err(RpcError::MissingRegistry { .. })));
        assert!(!reference.is_initialized());
    }

    #[test]
    fn unknown_proxy_kind_fails_and_leaves_no_state() {
        let runtime = RpcRuntime::with_defaults();
        let config = ReferenceConfig {
            proxy: Some("bytecode".to_owned()),
            ..reference_config()
        };
        let reference = ReferenceDescriptor::new(runtime, contract(), config);
        assert!(matches!(reference.client(), Err(RpcError::Capability(_))));
        assert!(!reference.is_initialized());
    }
}
