//! Interface contracts and the provider call shape.
//!
//! A contract is the explicit method set of a service; nothing is discovered
//! by reflection. Arguments and results travel as `serde_json::Value`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodDescriptor {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    /// Comma-joined parameter types, as used in method-qualified parameter keys.
    #[must_use]
    pub fn parameter_desc(&self) -> String {
        self.parameter_types.join(",")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceContract {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceContract {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_method<I, S>(mut self, name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.push(MethodDescriptor::new(name, parameter_types));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    /// Whether a method with this name exists; when `parameter_desc` is given,
    /// an overload with exactly those comma-separated parameter types must exist.
    #[must_use]
    pub fn declares(&self, name: &str, parameter_desc: Option<&str>) -> bool {
        self.methods.iter().any(|m| {
            m.name == name
                && parameter_desc.is_none_or(|desc| {
                    let wanted: Vec<&str> = desc
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .collect();
                    wanted == m.parameter_types
                })
        })
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One call travelling through filters into a provider or referer.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    request_id: u64,
    interface: String,
    method: String,
    arguments: Vec<Value>,
    attachments: BTreeMap<String, String>,
}

impl Request {
    #[must_use]
    pub fn new(interface: impl Into<String>, method: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            interface: interface.into(),
            method: method.into(),
            arguments,
            attachments: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    #[must_use]
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn attachments(&self) -> &BTreeMap<String, String> {
        &self.attachments
    }
}

/// The implementation instance behind an exported service.
pub trait ServiceHandler: Send + Sync {
    /// Handles one call of `method`.
    ///
    /// # Errors
    /// Any error is reported to the caller as a service failure.
    fn handle(&self, method: &str, arguments: &[Value]) -> anyhow::Result<Value>;
}

impl<F> ServiceHandler for F
where
    F: Fn(&str, &[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn handle(&self, method: &str, arguments: &[Value]) -> anyhow::Result<Value> {
        self(method, arguments)
    }
}
