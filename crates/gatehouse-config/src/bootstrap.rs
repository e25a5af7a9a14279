//! Service bootstrap document.
//!
//! The bootstrap is assembled from up to three layers, later layers
//! overriding earlier ones:
//!
//! 1. the local configuration file (format inferred from its extension)
//! 2. documents fetched from the config center, if one is configured
//! 3. environment variables named `<SERVICE>_<SECTION>__<KEY>`, e.g.
//!    `GATEHOUSE_JWT__SECRET` for service `gatehouse`
//!
//! Fetching the config-center layer needs a client, so this module only
//! accepts already-fetched [`KeyValue`]s; the caller decides where they come from.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::jwt::JwtConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bootstrap {
    pub app: AppConfig,
    pub jwt: JwtConfig,
    pub registry: Option<BackendConfig>,
    pub discovery: Option<BackendConfig>,
    /// Config center.
    pub config: Option<BackendConfig>,
    pub trace: Option<TraceConfig>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub env: String,
    pub http_addr: String,
    /// `host:port` announced to the registry; derived from the hostname and
    /// `http_addr` when empty.
    pub advertise_addr: String,
    pub metadata: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            env: "development".to_string(),
            http_addr: "0.0.0.0:8000".to_string(),
            advertise_addr: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// OTLP trace export; disabled when `endpoint` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Directory for rolling log files; console only when unset.
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Yaml,
    Json,
    Toml,
}

impl SourceFormat {
    /// Infers the format from a key or path extension, defaulting to YAML.
    pub fn from_key(key: &str) -> Self {
        let ext = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => SourceFormat::Json,
            "toml" => SourceFormat::Toml,
            _ => SourceFormat::Yaml,
        }
    }

    fn file_format(self) -> FileFormat {
        match self {
            SourceFormat::Yaml => FileFormat::Yaml,
            SourceFormat::Json => FileFormat::Json,
            SourceFormat::Toml => FileFormat::Toml,
        }
    }
}

/// One configuration document fetched from a config center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub format: SourceFormat,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let format = SourceFormat::from_key(&key);
        Self {
            key,
            value: value.into(),
            format,
        }
    }
}

/// Environment variable prefix for a service name: `user.service` → `USER`.
pub fn env_prefix(service_name: &str) -> String {
    service_name
        .trim_end_matches(".service")
        .replace(['.', '-'], "_")
        .to_ascii_uppercase()
}

/// Loads the bootstrap from `path`, then `remote` documents in order, then
/// the environment.
pub fn load(
    path: &Path,
    service_name: &str,
    remote: &[KeyValue],
) -> Result<Bootstrap, ConfigError> {
    load_with_env(path, service_name, remote, None)
}

/// [`load`] reading the environment layer from `env` instead of the process
/// environment when given.
pub fn load_with_env(
    path: &Path,
    service_name: &str,
    remote: &[KeyValue],
    env: Option<HashMap<String, String>>,
) -> Result<Bootstrap, ConfigError> {
    let mut builder = Config::builder().add_source(File::from(path));

    for kv in remote {
        builder = builder.add_source(File::from_str(&kv.value, kv.format.file_format()));
    }

    // Values stay strings here; numeric fields are converted on deserialize,
    // so a secret like `007` keeps its leading zeros.
    let prefix = env_prefix(service_name);
    if !prefix.is_empty() {
        builder = builder.add_source(
            Environment::with_prefix(&prefix)
                .prefix_separator("_")
                .separator("__")
                .source(env),
        );
    }

    builder.build()?.try_deserialize()
}
