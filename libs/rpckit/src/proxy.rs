//! Call-through client handles.
//!
//! [`ServiceClient`] plays the part a generated proxy plays elsewhere: it
//! validates the method against the contract, builds a [`Request`] and hands
//! it to an [`InvocationHandler`]. Typed facades are thin hand-written
//! adapters over a `ServiceClient`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::address::param;
use crate::cluster::ClusterSupport;
use crate::contract::{InterfaceContract, Request};
use crate::error::RpcError;

pub trait InvocationHandler: Send + Sync {
    /// # Errors
    /// Whatever the dispatch path reports.
    fn invoke(&self, request: Request) -> Result<Value, RpcError>;
}

pub trait ProxyFactory: Send + Sync {
    fn get_proxy(
        &self,
        contract: &InterfaceContract,
        handler: Arc<dyn InvocationHandler>,
    ) -> ServiceClient;
}

/// Builds plain [`ServiceClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProxyFactory;

impl ProxyFactory for DefaultProxyFactory {
    fn get_proxy(
        &self,
        contract: &InterfaceContract,
        handler: Arc<dyn InvocationHandler>,
    ) -> ServiceClient {
        ServiceClient {
            contract: Arc::new(contract.clone()),
            handler,
        }
    }
}

#[derive(Clone)]
pub struct ServiceClient {
    contract: Arc<InterfaceContract>,
    handler: Arc<dyn InvocationHandler>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("interface", &self.contract.name())
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    #[must_use]
    pub fn contract(&self) -> &InterfaceContract {
        &self.contract
    }

    /// Calls `method` with JSON arguments.
    ///
    /// # Errors
    /// [`RpcError::MethodNotFound`] for methods outside the contract, and any
    /// dispatch or service error.
    pub fn call(&self, method: &str, arguments: Vec<Value>) -> Result<Value, RpcError> {
        if !self.contract.has_method(method) {
            return Err(RpcError::MethodNotFound {
                interface: self.contract.name().to_owned(),
                method: method.to_owned(),
            });
        }
        self.handler
            .invoke(Request::new(self.contract.name(), method, arguments))
    }

    /// Like [`ServiceClient::call`], decoding the result into `T`.
    ///
    /// # Errors
    /// Everything [`ServiceClient::call`] reports, plus a transport error
    /// when the result does not decode into `T`.
    pub fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, arguments)?;
        serde_json::from_value(value).map_err(|e| {
            RpcError::Transport(format!(
                "cannot decode result of {}.{method}: {e}",
                self.contract.name()
            ))
        })
    }
}

/// Dispatches into the first cluster that has an available provider.
pub struct RefererInvocationHandler {
    interface: String,
    clusters: Vec<Arc<ClusterSupport>>,
    attachments: BTreeMap<String, String>,
}

impl RefererInvocationHandler {
    #[must_use]
    pub fn new(interface: impl Into<String>, clusters: Vec<Arc<ClusterSupport>>) -> Self {
        Self {
            interface: interface.into(),
            clusters,
            attachments: BTreeMap::new(),
        }
    }

    /// Sent with every request as the caller's `application`.
    #[must_use]
    pub fn with_application(mut self, application: Option<&str>) -> Self {
        if let Some(app) = application {
            self.attachments
                .insert(param::APPLICATION.to_owned(), app.to_owned());
        }
        self
    }

    #[must_use]
    pub fn clusters(&self) -> &[Arc<ClusterSupport>] {
        &self.clusters
    }
}

impl InvocationHandler for RefererInvocationHandler {
    fn invoke(&self, request: Request) -> Result<Value, RpcError> {
        let request = self
            .attachments
            .iter()
            .fold(request, |r, (k, v)| r.with_attachment(k.clone(), v.clone()));
        match self.clusters.iter().find(|c| c.is_available()) {
            Some(cluster) => cluster.call(&request),
            None => Err(RpcError::NoAvailableProvider {
                interface: self.interface.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Request>>);
    impl InvocationHandler for Recorder {
        fn invoke(&self, request: Request) -> Result<Value, RpcError> {
            let reply = json!({ "sum": request.arguments().len() });
            self.0.lock().push(request);
            Ok(reply)
        }
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Sum {
        sum: usize,
    }

    fn client(recorder: Arc<Recorder>) -> ServiceClient {
        let contract = InterfaceContract::new("Calc").with_method("add", ["i64", "i64"]);
        DefaultProxyFactory.get_proxy(&contract, recorder)
    }

    #[test]
    fn forwards_declared_calls() {
        let recorder = Arc::new(Recorder::default());
        let client = client(recorder.clone());

        let out: Sum = client.call_as("add", vec![json!(1), json!(2)]).unwrap();
        assert_eq!(out, Sum { sum: 2 });
        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].interface(), "Calc");
        assert_eq!(seen[0].method(), "add");
    }

    #[test]
    fn rejects_methods_outside_contract_without_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let err = client(recorder.clone()).call("sub", vec![]).unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound { .. }));
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn decode_failure_is_transport_error() {
        let recorder = Arc::new(Recorder::default());
        let err = client(recorder).call_as::<String>("add", vec![]).unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn handler_without_clusters_has_no_provider() {
        let handler = RefererInvocationHandler::new("Calc", vec![]).with_application(Some("shop"));
        assert!(matches!(
            handler.invoke(Request::new("Calc", "add", vec![])),
            Err(RpcError::NoAvailableProvider { .. })
        ));
    }
}
