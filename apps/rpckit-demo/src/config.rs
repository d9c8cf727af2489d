use std::path::Path;

use anyhow::{Context, Result, ensure};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use rpckit::{ProtocolConfig, ReferenceConfig, RegistryConfig, ServiceConfig};
use serde::{Deserialize, Serialize};

/// Environment variable prefix; `RPCKIT__SERVICE__EXPORT=rpc:9000` maps to `service.export`.
pub const ENV_PREFIX: &str = "RPCKIT__";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Top-level configuration of the demo host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub reference: ReferenceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            service: ServiceConfig {
                export: "rpc:20880".to_owned(),
                host: Some("127.0.0.1".to_owned()),
                application: Some("rpckit-demo".to_owned()),
                protocols: vec![ProtocolConfig::new("rpc")],
                registries: vec![RegistryConfig::new("local", None)],
                ..ServiceConfig::default()
            },
            reference: ReferenceConfig {
                application: Some("rpckit-demo".to_owned()),
                registries: vec![RegistryConfig::new("local", None)],
                ..ReferenceConfig::default()
            },
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file, then `RPCKIT__*` environment variables.
    ///
    /// # Errors
    /// Returns an error if the file cannot be parsed or a value has the wrong shape.
    pub fn load_layered(config_path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| "Failed to extract config from figment".to_owned())
    }

    /// Load from `config_path` when given, otherwise defaults plus environment.
    ///
    /// # Errors
    /// Returns an error if the file does not exist or fails to load.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            ensure!(
                path.is_file(),
                "config file does not exist: {}",
                path.to_string_lossy()
            );
            return Self::load_layered(path);
        }

        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| "Failed to extract config from environment".to_owned())
    }

    /// Serialize configuration to YAML.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("Failed to serialize config to YAML")
    }

    /// `-v` raises the level to debug, `-vv` and above to trace.
    pub fn apply_cli_overrides(&mut self, verbose: u8) {
        match verbose {
            0 => {}
            1 => "debug".clone_into(&mut self.logging.level),
            _ => "trace".clone_into(&mut self.logging.level),
        }
    }

    /// Validate the parts of the configuration that can be checked without exporting.
    ///
    /// # Errors
    /// Returns the first malformed export spec or registry address.
    pub fn validate(&self) -> Result<()> {
        let bindings = rpckit::parse_export(&self.service.export)
            .context("service.export is malformed")?;
        for id in bindings.keys() {
            ensure!(
                self.service.protocols.iter().any(|p| &p.id == id),
                "service.export names protocol '{id}' but service.protocols does not define it"
            );
        }
        for registry in self
            .service
            .effective_registries()
            .iter()
            .chain(&self.reference.registries)
        {
            registry
                .to_addresses()
                .with_context(|| format!("registry '{}' is malformed", registry.protocol))?;
        }
        Ok(())
    }
}
