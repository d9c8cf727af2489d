//! Declarative service, reference, protocol and registry configuration.
//!
//! These types only describe; [`crate::service::ServiceDescriptor`] and
//! [`crate::reference::ReferenceDescriptor`] turn them into Addresses.
//! Unknown fields are rejected so typos surface at load time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{Address, param};
use crate::error::RpcError;
use crate::net::split_host_port;
use crate::protocol::INJVM;
use crate::registry::{DIRECT, LOCAL, local_registry_address};

/// Capability name of the orchestrator used when none is configured.
pub const DEFAULT_ORCHESTRATOR: &str = "default";
/// Capability name of the proxy factory used when none is configured.
pub const DEFAULT_PROXY: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Binding id referenced by the export spec.
    pub id: String,
    /// Protocol (Address scheme) name; defaults to `rpc`, or `injvm` for the `injvm` id.
    pub name: Option<String>,
    pub filter: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl ProtocolConfig {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn protocol_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ if self.id == INJVM => INJVM,
            _ => crate::protocol::DEFAULT_PROTOCOL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub id: Option<String>,
    /// Registry scheme, e.g. `local`, `direct`, `zk`.
    pub protocol: String,
    /// `host:port[,host:port]*`; optional for `local`.
    pub address: Option<String>,
    /// Strict registration check, carried as the `check` parameter.
    pub check: Option<bool>,
    pub parameters: BTreeMap<String, String>,
}

impl RegistryConfig {
    #[must_use]
    pub fn new(protocol: impl Into<String>, address: Option<&str>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.map(str::to_owned),
            ..Self::default()
        }
    }

    /// Registry Addresses described by this config.
    ///
    /// A `direct` registry becomes a single Address whose `address`
    /// parameter lists every target; other schemes yield one Address per
    /// `host:port` entry.
    ///
    /// # Errors
    /// [`RpcError::MalformedAddress`] for a missing scheme, a missing address
    /// on a non-local registry, or an entry that is not `host:port`.
    pub fn to_addresses(&self) -> Result<Vec<Address>, RpcError> {
        let scheme = self.protocol.trim();
        let malformed = |input: &str, reason: &str| RpcError::MalformedAddress {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };
        if scheme.is_empty() {
            return Err(malformed(
                self.address.as_deref().unwrap_or_default(),
                "registry protocol is required",
            ));
        }

        let mut parameters = self.parameters.clone();
        if let Some(check) = self.check {
            parameters.insert(param::CHECK.to_owned(), check.to_string());
        }

        let raw = self.address.as_deref().unwrap_or_default();
        let entries: Vec<&str> = raw.split(',').map(str::trim).filter(|e| !e.is_empty()).collect();
        if entries.is_empty() {
            if scheme == LOCAL {
                let local = local_registry_address();
                return Ok(vec![Address::new(
                    LOCAL,
                    local.host(),
                    local.port(),
                    "",
                    parameters,
                )]);
            }
            return Err(malformed(scheme, "registry address is required"));
        }

        let targets = entries
            .iter()
            .map(|e| split_host_port(e).ok_or_else(|| malformed(e, "registry address must be host:port")))
            .collect::<Result<Vec<_>, _>>()?;

        if scheme == DIRECT {
            let (host, port) = targets[0].clone();
            parameters.insert(
                crate::registry::DIRECT_ADDRESS_PARAM.to_owned(),
                entries.join(","),
            );
            return Ok(vec![Address::new(scheme, host, port, "", parameters)]);
        }

        Ok(targets
            .into_iter()
            .map(|(host, port)| Address::new(scheme, host, port, "", parameters.clone()))
            .collect())
    }
}

/// Settings shared by several services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicServiceConfig {
    pub host: Option<String>,
    pub group: Option<String>,
    pub version: Option<String>,
    pub application: Option<String>,
    pub module: Option<String>,
    pub filter: Option<String>,
    /// Used when the service itself names no registry.
    pub registries: Vec<RegistryConfig>,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MethodConfig {
    pub name: String,
    /// Comma-separated parameter types selecting one overload.
    pub argument_types: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl MethodConfig {
    /// Normalized parameter types, `None` when no overload is selected.
    #[must_use]
    pub fn parameter_desc(&self) -> Option<String> {
        self.argument_types.as_deref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    /// `methodconfig.<name>[(<argTypes>)].` prefix for this method's parameters.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        match self.parameter_desc() {
            Some(desc) => format!("methodconfig.{}({desc}).", self.name),
            None => format!("methodconfig.{}.", self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// `protocolId:port[,protocolId:port]*`.
    pub export: String,
    pub host: Option<String>,
    pub group: Option<String>,
    pub version: Option<String>,
    pub application: Option<String>,
    pub module: Option<String>,
    pub filter: Option<String>,
    pub protocols: Vec<ProtocolConfig>,
    pub registries: Vec<RegistryConfig>,
    pub basic: Option<BasicServiceConfig>,
    pub methods: Vec<MethodConfig>,
    /// Extension parameters; override basic config, overridden by the fields above.
    pub extension: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    /// Orchestrator capability name.
    pub orchestrator: Option<String>,
}

impl ServiceConfig {
    /// Registry configs in effect: the service's own, else the basic config's.
    #[must_use]
    pub fn effective_registries(&self) -> &[RegistryConfig] {
        if self.registries.is_empty() {
            self.basic
                .as_ref()
                .map_or(&[][..], |b| b.registries.as_slice())
        } else {
            &self.registries
        }
    }

    /// Parameter map for one binding, lowest to highest precedence: protocol
    /// config, basic config, extension, the service's own fields, then
    /// method-qualified keys.
    #[must_use]
    pub fn binding_parameters(&self, protocol: &ProtocolConfig) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        map.extend(protocol.parameters.clone());
        put(&mut map, param::FILTER, protocol.filter.as_deref());

        if let Some(basic) = &self.basic {
            map.extend(basic.parameters.clone());
            put_common(
                &mut map,
                [
                    basic.group.as_deref(),
                    basic.version.as_deref(),
                    basic.application.as_deref(),
                    basic.module.as_deref(),
                    basic.filter.as_deref(),
                ],
            );
        }

        map.extend(self.extension.clone());
        map.extend(self.parameters.clone());
        put_common(
            &mut map,
            [
                self.group.as_deref(),
                self.version.as_deref(),
                self.application.as_deref(),
                self.module.as_deref(),
                self.filter.as_deref(),
            ],
        );

        for method in &self.methods {
            let prefix = method.key_prefix();
            for (key, value) in &method.parameters {
                map.insert(format!("{prefix}{key}"), value.clone());
            }
        }
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceConfig {
    /// Protocol name providers are expected to speak; defaults to `rpc`.
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub group: Option<String>,
    pub version: Option<String>,
    pub application: Option<String>,
    pub module: Option<String>,
    /// Client-side filters.
    pub filter: Option<String>,
    pub registries: Vec<RegistryConfig>,
    pub parameters: BTreeMap<String, String>,
    /// Proxy factory capability name.
    pub proxy: Option<String>,
    pub orchestrator: Option<String>,
}

impl ReferenceConfig {
    #[must_use]
    pub fn protocol_name(&self) -> &str {
        self.protocol
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(crate::protocol::DEFAULT_PROTOCOL)
    }

    #[must_use]
    pub fn reference_parameters(&self) -> BTreeMap<String, String> {
        let mut map = self.parameters.clone();
        put_common(
            &mut map,
            [
                self.group.as_deref(),
                self.version.as_deref(),
                self.application.as_deref(),
                self.module.as_deref(),
                self.filter.as_deref(),
            ],
        );
        map
    }
}

fn put(map: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        map.insert(key.to_owned(), v.to_owned());
    }
}

/// group, version, application, module, filter, in that order.
fn put_common(map: &mut BTreeMap<String, String>, values: [Option<&str>; 5]) {
    let keys = [
        param::GROUP,
        param::VERSION,
        param::APPLICATION,
        param::MODULE,
        param::FILTER,
    ];
    for (key, value) in keys.into_iter().zip(values) {
        put(map, key, value);
    }
}

/// Parses `protocolId:port[,protocolId:port]*` into protocol id -> port.
///
/// Blank entries are skipped; `injvm` may omit its port.
///
/// # Errors
/// [`RpcError::InvalidExportSpec`] for a blank spec, an entry without
/// exactly one numeric port, or a repeated protocol id.
pub fn parse_export(spec: &str) -> Result<BTreeMap<String, u16>, RpcError> {
    let mut ports = BTreeMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, port) = match entry.split_once(':') {
            Some((id, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    RpcError::invalid_export(spec, format!("'{entry}' has no valid port"))
                })?;
                (id.trim(), port)
            }
            None if entry == INJVM => (entry, 0),
            None => {
                return Err(RpcError::invalid_export(
                    spec,
                    format!("'{entry}' must be protocolId:port"),
                ));
            }
        };
        if id.is_empty() {
            return Err(RpcError::invalid_export(spec, format!("'{entry}' has no protocol id")));
        }
        if ports.insert(id.to_owned(), port).is_some() {
            return Err(RpcError::invalid_export(spec, format!("protocol '{id}' listed twice")));
        }
    }
    if ports.is_empty() {
        return Err(RpcError::invalid_export(spec, "no protocol listed"));
    }
    Ok(ports)
}
