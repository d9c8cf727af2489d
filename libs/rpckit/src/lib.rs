#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Service export, registration and discovery core.
//!
//! A [`ServiceDescriptor`] turns a declarative [`ServiceConfig`] into live
//! endpoints: one Export Handle per protocol binding, each registered with
//! every configured registry through a Registration Address that carries the
//! serialized service Address in its `embed` parameter. A
//! [`ReferenceDescriptor`] does the reverse on the client side.
//!
//! Pluggable pieces (protocols, registry factories, proxy factories,
//! filters, the orchestrator itself) are resolved by name from the
//! [`CapabilityHub`] held by the shared [`RpcRuntime`].

pub mod address;
pub mod capability;
pub mod cluster;
pub mod config;
pub mod contract;
pub mod error;
pub mod filter;
pub mod identity;
pub mod net;
pub mod orchestrator;
pub mod protocol;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod runtime;
pub mod service;

pub use address::Address;
pub use capability::{CapabilityError, CapabilityHub};
pub use config::{
    BasicServiceConfig, MethodConfig, ProtocolConfig, ReferenceConfig, RegistryConfig,
    ServiceConfig, parse_export,
};
pub use contract::{InterfaceContract, MethodDescriptor, Request, ServiceHandler};
pub use error::RpcError;
pub use orchestrator::{DefaultOrchestrator, ExportOrchestrator, UnexportFailure, UnexportReport};
pub use proxy::ServiceClient;
pub use reference::ReferenceDescriptor;
pub use runtime::RpcRuntime;
pub use service::ServiceDescriptor;
