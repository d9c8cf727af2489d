//! A calculator service exported and consumed inside one process.

use std::sync::Arc;

use anyhow::{Context, Result};
use rpckit::protocol::{InProcessProtocol, Protocol};
use rpckit::{
    InterfaceContract, ReferenceDescriptor, RpcError, RpcRuntime, ServiceClient, ServiceDescriptor,
    ServiceHandler, UnexportReport,
};
use serde_json::{Value, json};

use crate::config::AppConfig;

pub const CALCULATOR_INTERFACE: &str = "com.acme.demo.Calculator";

#[must_use]
pub fn calculator_contract() -> InterfaceContract {
    InterfaceContract::new(CALCULATOR_INTERFACE)
        .with_method("add", ["i64", "i64"])
        .with_method("echo", ["string"])
}

fn calculator() -> Arc<dyn ServiceHandler> {
    Arc::new(|method: &str, args: &[Value]| -> anyhow::Result<Value> {
        let int = |i: usize| {
            args.get(i)
                .and_then(Value::as_i64)
                .with_context(|| format!("argument {i} of {method} must be an integer"))
        };
        match method {
            "add" => Ok(json!(int(0)?.saturating_add(int(1)?))),
            "echo" => Ok(args.first().cloned().unwrap_or(Value::Null)),
            other => anyhow::bail!("unsupported method {other}"),
        }
    })
}

/// Typed facade over the dynamic client.
pub struct CalculatorClient(ServiceClient);

impl CalculatorClient {
    /// # Errors
    /// Any call failure.
    pub fn add(&self, a: i64, b: i64) -> Result<i64, RpcError> {
        self.0.call_as("add", vec![json!(a), json!(b)])
    }

    /// # Errors
    /// Any call failure.
    pub fn echo(&self, message: &str) -> Result<String, RpcError> {
        self.0.call_as("echo", vec![json!(message)])
    }
}

/// Runtime plus one exported service and one reference to it.
pub struct Demo {
    service: ServiceDescriptor,
    reference: ReferenceDescriptor,
}

impl Demo {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let runtime = RpcRuntime::with_defaults();
        // loopback transport under the default protocol name
        runtime.register_protocol(Arc::new(InProcessProtocol::new(
            rpckit::protocol::DEFAULT_PROTOCOL,
        )) as Arc<dyn Protocol>);

        let contract = calculator_contract();
        Self {
            service: ServiceDescriptor::new(
                runtime.clone(),
                contract.clone(),
                calculator(),
                config.service.clone(),
            ),
            reference: ReferenceDescriptor::new(runtime, contract, config.reference.clone()),
        }
    }

    /// Export the service and resolve a client for it.
    ///
    /// # Errors
    /// Export or reference failures.
    pub fn start(&self) -> Result<CalculatorClient> {
        self.service.export().context("export failed")?;
        for address in self.service.registered_addresses().iter() {
            tracing::info!(registry = %address.uri(), "registered");
        }
        let client = self.reference.client().context("reference failed")?;
        Ok(CalculatorClient(client))
    }

    /// Tear down the reference, then the service.
    pub fn stop(&self) -> UnexportReport {
        self.reference.destroy();
        self.service.unexport()
    }
}

/// One round of calls, printed to stdout.
///
/// # Errors
/// The first failing call.
pub fn exercise(client: &CalculatorClient) -> Result<()> {
    let sum = client.add(2, 3)?;
    println!("add(2, 3) = {sum}");
    let echoed = client.echo("hello")?;
    println!("echo(\"hello\") = \"{echoed}\"");
    Ok(())
}
