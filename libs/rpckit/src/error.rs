//! Error taxonomy for export, registration, discovery and the call path.
//!
//! Export-time errors are returned to the caller and abort the export.
//! Unexport never returns an error; failures there are collected into an
//! [`UnexportReport`](crate::orchestrator::UnexportReport) and logged.

use crate::capability::CapabilityError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("malformed address '{input}': {reason}")]
    MalformedAddress { input: String, reason: String },

    #[error("invalid service config for {interface}: {reason}")]
    InvalidServiceConfig { interface: String, reason: String },

    #[error("no registry configured for service {interface}")]
    MissingRegistry { interface: String },

    #[error("invalid export spec '{spec}': {reason}")]
    InvalidExportSpec { spec: String, reason: String },

    #[error("unknown port in service {interface} for protocol '{protocol_id}'")]
    UnresolvedProtocolPort {
        interface: String,
        protocol_id: String,
    },

    #[error("{interface} config is malformed: service {identity} already exported")]
    DuplicateServiceExport { interface: String, identity: String },

    #[error("failed to register {service} with registry {registry}: {reason}")]
    RegistrationFailure {
        registry: String,
        service: String,
        reason: String,
    },

    #[error("no registry reachable for {interface}: {reason}")]
    RegistryUnreachable { interface: String, reason: String },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("no available provider for {interface}")]
    NoAvailableProvider { interface: String },

    #[error("method '{method}' is not declared by {interface}")]
    MethodNotFound { interface: String, method: String },

    #[error("call {interface}.{method} rejected by {filter}: {reason}")]
    Rejected {
        interface: String,
        method: String,
        filter: String,
        reason: String,
    },

    #[error("{interface}.{method} failed: {message}")]
    Service {
        interface: String,
        method: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc runtime has been dropped")]
    RuntimeClosed,
}

impl RpcError {
    pub(crate) fn invalid_config(interface: &str, reason: impl Into<String>) -> Self {
        Self::InvalidServiceConfig {
            interface: interface.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_export(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExportSpec {
            spec: spec.to_owned(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a configuration problem rather than a runtime failure.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedAddress { .. }
                | Self::InvalidServiceConfig { .. }
                | Self::MissingRegistry { .. }
                | Self::InvalidExportSpec { .. }
                | Self::UnresolvedProtocolPort { .. }
                | Self::DuplicateServiceExport { .. }
                | Self::Capability(_)
        )
    }
}
