//! Transport boundary.
//!
//! A [`Protocol`] binds a [`Provider`] to an Address and hands back an
//! [`Exporter`]; on the client side it turns a provider Address into a
//! [`Referer`]. Providers and referers share the [`Invoker`] call shape so
//! the same filter chain can wrap either.

mod filtered;
mod in_process;

pub use filtered::FilteredProtocol;
pub use in_process::InProcessProtocol;

use std::sync::Arc;

use serde_json::Value;

use crate::address::Address;
use crate::contract::{InterfaceContract, Request, ServiceHandler};
use crate::error::RpcError;

/// Name of the in-process protocol binding.
pub const INJVM: &str = "injvm";

/// Protocol name used when a binding does not name one.
pub const DEFAULT_PROTOCOL: &str = "rpc";

pub trait Invoker: Send + Sync {
    fn address(&self) -> &Address;

    /// # Errors
    /// Whatever the target or a filter in front of it reports.
    fn call(&self, request: &Request) -> Result<Value, RpcError>;
}

/// Server-side pairing of implementation, Address and contract.
pub trait Provider: Invoker {
    fn contract(&self) -> &InterfaceContract;
}

/// A live binding of a provider to a transport.
pub trait Exporter: Send + Sync {
    fn address(&self) -> &Address;

    fn is_available(&self) -> bool;

    /// Releases the transport-level binding.
    ///
    /// # Errors
    /// Transport-specific; callers treat it as best-effort.
    fn unexport(&self) -> Result<(), RpcError>;
}

/// Client-side handle to one discovered provider.
pub trait Referer: Invoker {
    fn is_available(&self) -> bool;

    fn destroy(&self);
}

pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// When the Address is already bound or the transport refuses the binding.
    fn export(&self, provider: Arc<dyn Provider>, address: &Address)
    -> Result<Arc<dyn Exporter>, RpcError>;

    /// # Errors
    /// When no referer can be built for the provider Address.
    fn refer(
        &self,
        contract: &InterfaceContract,
        provider: &Address,
    ) -> Result<Arc<dyn Referer>, RpcError>;
}

pub struct DefaultProvider {
    implementation: Arc<dyn ServiceHandler>,
    address: Address,
    contract: InterfaceContract,
}

impl DefaultProvider {
    #[must_use]
    pub fn new(
        implementation: Arc<dyn ServiceHandler>,
        address: Address,
        contract: InterfaceContract,
    ) -> Self {
        Self {
            implementation,
            address,
            contract,
        }
    }
}

impl std::fmt::Debug for DefaultProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultProvider")
            .field("address", &self.address.uri())
            .field("interface", &self.contract.name())
            .finish_non_exhaustive()
    }
}

impl Invoker for DefaultProvider {
    fn address(&self) -> &Address {
        &self.address
    }

    fn call(&self, request: &Request) -> Result<Value, RpcError> {
        if !self.contract.has_method(request.method()) {
            return Err(RpcError::MethodNotFound {
                interface: self.contract.name().to_owned(),
                method: request.method().to_owned(),
            });
        }
        self.implementation
            .handle(request.method(), request.arguments())
            .map_err(|e| RpcError::Service {
                interface: self.contract.name().to_owned(),
                method: request.method().to_owned(),
                message: format!("{e:#}"),
            })
    }
}

impl Provider for DefaultProvider {
    fn contract(&self) -> &InterfaceContract {
        &self.contract
    }
}
