//! Address model shared by service endpoints and registry connections.
//!
//! Canonical form: `scheme://host:port[/path][?key=value&key=value...]`.
//! Parameters are kept sorted so the serialized form is stable; keys and
//! values, like path segments, are percent-encoded on the way out and
//! decoded on the way in.
//!
//! A registration Address is a registry Address that carries the fully
//! serialized service Address in its [`param::EMBED`] parameter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RpcError;

/// Well-known parameter keys.
pub mod param {
    pub const NODE_TYPE: &str = "nodeType";
    pub const REFRESH_TIMESTAMP: &str = "refreshTimestamp";
    pub const GROUP: &str = "group";
    pub const VERSION: &str = "version";
    pub const APPLICATION: &str = "application";
    pub const MODULE: &str = "module";
    pub const FILTER: &str = "filter";
    pub const EMBED: &str = "embed";
    pub const CHECK: &str = "check";
    pub const PROTOCOL: &str = "protocol";

    pub const DEFAULT_GROUP: &str = "default_rpc";
    pub const DEFAULT_VERSION: &str = "1.0";

    pub const NODE_TYPE_SERVICE: &str = "service";
    pub const NODE_TYPE_REFERER: &str = "referer";
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Address {
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters,
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(default)
    }

    /// Returns a copy of this Address with `key` set to `value`.
    #[must_use]
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.parameters.insert(key.into(), value.into());
        copy
    }

    /// Returns a copy of this Address with `key` removed.
    #[must_use]
    pub fn without_parameter(&self, key: &str) -> Self {
        let mut copy = self.clone();
        copy.parameters.remove(key);
        copy
    }

    #[must_use]
    pub fn group(&self) -> &str {
        self.parameter_or(param::GROUP, param::DEFAULT_GROUP)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        self.parameter_or(param::VERSION, param::DEFAULT_VERSION)
    }

    /// Process-wide identity of the endpoint: scheme, host, port, group, path and version.
    #[must_use]
    pub fn identity_key(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.group(),
            self.path,
            self.version()
        )
    }

    /// Logical service identity, independent of where it is hosted.
    #[must_use]
    pub fn service_key(&self) -> String {
        format!("{}/{}/{}", self.group(), self.path, self.version())
    }

    /// `scheme://host:port[/path]` without parameters, path segments percent-encoded.
    #[must_use]
    pub fn uri(&self) -> String {
        let mut out = format!("{}://{}:{}", self.scheme, self.host, self.port);
        if !self.path.is_empty() {
            for segment in self.path.split('/') {
                out.push('/');
                out.push_str(&urlencoding::encode(segment));
            }
        }
        out
    }

    /// Whether both Addresses name the same registration target.
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }

    /// Canonical serialized form, parameters percent-encoded.
    #[must_use]
    pub fn to_full_string(&self) -> String {
        let mut out = self.uri();
        let mut separator = '?';
        for (key, value) in &self.parameters {
            out.push(separator);
            out.push_str(&urlencoding::encode(key));
            out.push('=');
            out.push_str(&urlencoding::encode(value));
            separator = '&';
        }
        out
    }

    /// Parses the canonical form produced by [`Address::to_full_string`].
    ///
    /// # Errors
    /// Returns [`RpcError::MalformedAddress`] when the input does not follow
    /// `scheme://host:port[/path][?key=value...]` or a component fails to decode.
    pub fn parse(input: &str) -> Result<Self, RpcError> {
        let malformed = |reason: &str| RpcError::MalformedAddress {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| malformed("missing '://' separator"))?;
        if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
            return Err(malformed("invalid scheme"));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = location.split_once('/').unwrap_or((location, ""));
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port"))?;
        if host.is_empty() {
            return Err(malformed("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| malformed("port is not a number in 0..=65535"))?;

        let mut parameters = BTreeMap::new();
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| malformed("parameter without '='"))?;
            let key = urlencoding::decode(key).map_err(|_| malformed("parameter key is not UTF-8"))?;
            if key.is_empty() {
                return Err(malformed("empty parameter key"));
            }
            let value =
                urlencoding::decode(value).map_err(|_| malformed("parameter value is not UTF-8"))?;
            parameters.insert(key.into_owned(), value.into_owned());
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            host: host.to_owned(),
            port,
            path: urlencoding::decode(path)
                .map_err(|_| malformed("path is not UTF-8"))?
                .into_owned(),
            parameters,
        })
    }

    /// Embeds `service` into a copy of this registry Address.
    #[must_use]
    pub fn embed(&self, service: &Address) -> Self {
        self.with_parameter(param::EMBED, service.to_full_string())
    }

    /// Extracts the service Address embedded in a registration Address.
    ///
    /// # Errors
    /// Returns [`RpcError::MalformedAddress`] when nothing is embedded or the
    /// embedded value does not parse.
    pub fn embedded(&self) -> Result<Self, RpcError> {
        let raw = self
            .parameter(param::EMBED)
            .ok_or_else(|| RpcError::MalformedAddress {
                input: self.to_full_string(),
                reason: "no embedded address".to_owned(),
            })?;
        Self::parse(raw)
    }
}

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_')
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_full_string())
    }
}

impl FromStr for Address {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
