#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rpckit::protocol::{InProcessProtocol, Protocol};
use rpckit::registry::{NotifyListener, Registry, RegistryCache, RegistryFactory};
use rpckit::{
    Address, InterfaceContract, ProtocolConfig, RegistryConfig, RpcError, RpcRuntime,
    ServiceConfig, ServiceHandler,
};
use serde_json::{Value, json};

/// Scheme the recording registry factory is registered under.
pub const RECORDING: &str = "zk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Register,
    Unregister,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub op: Op,
    /// `host:port` of the registry.
    pub registry: String,
    pub service: Address,
    pub ok: bool,
}

#[derive(Default)]
struct Faults {
    register_targets: HashSet<String>,
    register_ports: HashSet<u16>,
    unregister_targets: HashSet<String>,
}

/// Registry double that journals every call and fails on demand.
#[derive(Default)]
pub struct RecordingRegistryFactory {
    cache: RegistryCache,
    journal: Arc<Mutex<Vec<Event>>>,
    faults: Arc<Mutex<Faults>>,
}

impl RecordingRegistryFactory {
    pub fn fail_register_on(&self, target: &str) {
        self.faults.lock().register_targets.insert(target.to_owned());
    }

    pub fn fail_register_for_port(&self, port: u16) {
        self.faults.lock().register_ports.insert(port);
    }

    pub fn fail_unregister_on(&self, target: &str) {
        self.faults.lock().unregister_targets.insert(target.to_owned());
    }

    pub fn events(&self) -> Vec<Event> {
        self.journal.lock().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.journal.lock().iter().filter(|e| e.op == op).count()
    }
}

impl RegistryFactory for RecordingRegistryFactory {
    fn get_registry(&self, address: &Address) -> Result<Arc<dyn Registry>, RpcError> {
        let journal = self.journal.clone();
        let faults = self.faults.clone();
        self.cache.get_or_create(address, move |address| {
            Ok(Arc::new(RecordingRegistry {
                address,
                journal,
                faults,
                providers: Mutex::new(Vec::new()),
            }) as Arc<dyn Registry>)
        })
    }
}

struct RecordingRegistry {
    address: Address,
    journal: Arc<Mutex<Vec<Event>>>,
    faults: Arc<Mutex<Faults>>,
    providers: Mutex<Vec<Address>>,
}

impl RecordingRegistry {
    fn target(&self) -> String {
        format!("{}:{}", self.address.host(), self.address.port())
    }

    fn record(&self, op: Op, service: &Address, ok: bool) {
        self.journal.lock().push(Event {
            op,
            registry: self.target(),
            service: service.clone(),
            ok,
        });
    }
}

impl Registry for RecordingRegistry {
    fn address(&self) -> &Address {
        &self.address
    }

    fn register(&self, service: &Address) -> Result<(), RpcError> {
        let fail = {
            let faults = self.faults.lock();
            faults.register_targets.contains(&self.target())
                || faults.register_ports.contains(&service.port())
        };
        self.record(Op::Register, service, !fail);
        if fail {
            return Err(RpcError::RegistrationFailure {
                registry: self.address.uri(),
                service: service.identity_key(),
                reason: "injected failure".to_owned(),
            });
        }
        self.providers.lock().push(service.clone());
        Ok(())
    }

    fn unregister(&self, service: &Address) -> Result<(), RpcError> {
        let fail = self.faults.lock().unregister_targets.contains(&self.target());
        self.record(Op::Unregister, service, !fail);
        if fail {
            return Err(RpcError::Transport(format!("{} is unreachable", self.target())));
        }
        self.providers.lock().retain(|p| !p.same_target(service));
        Ok(())
    }

    fn subscribe(
        &self,
        reference: &Address,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<(), RpcError> {
        let providers = self.discover(reference)?;
        listener.notify(&self.address, &providers);
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
        let key = reference.service_key();
        Ok(self
            .providers
            .lock()
            .iter()
            .filter(|p| p.service_key() == key)
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub runtime: Arc<RpcRuntime>,
    pub registries: Arc<RecordingRegistryFactory>,
    pub transport: Arc<InProcessProtocol>,
}

/// Default runtime plus a journaling `zk` registry and an in-process `rpc` transport.
pub fn harness() -> Harness {
    let runtime = RpcRuntime::with_defaults();
    let registries = Arc::new(RecordingRegistryFactory::default());
    runtime
        .hub()
        .register::<dyn RegistryFactory>(RECORDING, registries.clone());
    let transport = Arc::new(InProcessProtocol::new("rpc"));
    runtime.register_protocol(transport.clone() as Arc<dyn Protocol>);
    Harness {
        runtime,
        registries,
        transport,
    }
}

pub fn calculator() -> InterfaceContract {
    InterfaceContract::new("com.acme.Calculator")
        .with_method("add", ["i64", "i64"])
        .with_method("echo", ["string"])
}

pub fn calculator_impl() -> Arc<dyn ServiceHandler> {
    Arc::new(|method: &str, args: &[Value]| -> anyhow::Result<Value> {
        match method {
            "add" => {
                let a = args.first().and_then(Value::as_i64).unwrap_or_default();
                let b = args.get(1).and_then(Value::as_i64).unwrap_or_default();
                Ok(json!(a + b))
            }
            "echo" => Ok(args.first().cloned().unwrap_or(Value::Null)),
            other => anyhow::bail!("unsupported method {other}"),
        }
    })
}

/// `export` with one `ProtocolConfig` per id, all registered with `zk` at `targets`.
pub fn service_config(export: &str, protocol_ids: &[&str], targets: &str) -> ServiceConfig {
    ServiceConfig {
        export: export.to_owned(),
        protocols: protocol_ids.iter().map(|id| ProtocolConfig::new(*id)).collect(),
        registries: vec![RegistryConfig::new(RECORDING, Some(targets))],
        ..ServiceConfig::default()
    }
}
