//! Discovery, registry and config-center backend configuration.
//!
//! A service selects at most one backend per concern with a single oneof
//! block. In YAML the variant name is the only key of the block:
//!
//! ```yaml
//! registry:
//!   etcd:
//!     endpoints: ["127.0.0.1:2379"]
//!     namespace: /microservices
//! discovery:
//!   consul:
//!     address: 127.0.0.1:8500
//! ```
//!
//! Omitting the block disables the concern. Empty strings and missing
//! durations resolve to the defaults documented on each accessor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout applied to every backend client when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_CONSUL_ADDRESS: &str = "127.0.0.1:8500";
pub const DEFAULT_CONSUL_SCHEME: &str = "http";
pub const DEFAULT_CONSUL_KEY: &str = "config";

pub const DEFAULT_ETCD_NAMESPACE: &str = "/microservices";
pub const DEFAULT_ETCD_TTL: Duration = Duration::from_secs(15);
pub const DEFAULT_ETCD_MAX_RETRY: u32 = 5;
pub const DEFAULT_ETCD_KEY: &str = "/config";

pub const DEFAULT_NACOS_PORT: u16 = 8848;
pub const DEFAULT_NACOS_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_NACOS_DATA_ID: &str = "config.yaml";

/// The active backend variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendConfig {
    Consul(ConsulConfig),
    Etcd(EtcdConfig),
    Nacos(NacosConfig),
    Kubernetes(KubernetesConfig),
}

impl BackendConfig {
    /// Variant tag, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Consul(_) => "consul",
            BackendConfig::Etcd(_) => "etcd",
            BackendConfig::Nacos(_) => "nacos",
            BackendConfig::Kubernetes(_) => "kubernetes",
        }
    }
}

fn timeout_or_default(secs: Option<u64>) -> Duration {
    match secs {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        _ => DEFAULT_TIMEOUT,
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

/// Username/password pair, present only when both halves are non-empty.
fn credential_pair<'a>(username: &'a str, password: &'a str) -> Option<(&'a str, &'a str)> {
    if username.is_empty() || password.is_empty() {
        None
    } else {
        Some((username, password))
    }
}

/// `true` when exactly one half of a credential pair is set.
fn is_partial(username: &str, password: &str) -> bool {
    username.is_empty() != password.is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub address: String,
    pub scheme: String,
    pub token: String,
    pub datacenter: String,
    pub timeout_secs: Option<u64>,
    pub tags: Vec<String>,
    /// Register a TCP health check alongside the service.
    pub health_check: Option<bool>,
    /// KV path read when Consul is the config center.
    pub key: String,
}

impl ConsulConfig {
    pub fn address(&self) -> &str {
        or_default(&self.address, DEFAULT_CONSUL_ADDRESS)
    }

    pub fn scheme(&self) -> &str {
        or_default(&self.scheme, DEFAULT_CONSUL_SCHEME)
    }

    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }

    pub fn health_check(&self) -> bool {
        self.health_check.unwrap_or(true)
    }

    pub fn key(&self) -> &str {
        or_default(&self.key, DEFAULT_CONSUL_KEY)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub namespace: String,
    pub ttl_secs: Option<u64>,
    pub max_retry: Option<u32>,
    pub username: String,
    pub password: String,
    pub timeout_secs: Option<u64>,
    /// Key prefix read when Etcd is the config center.
    pub key: String,
}

impl EtcdConfig {
    pub fn namespace(&self) -> &str {
        or_default(&self.namespace, DEFAULT_ETCD_NAMESPACE)
    }

    pub fn ttl(&self) -> Duration {
        match self.ttl_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_ETCD_TTL,
        }
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry.unwrap_or(DEFAULT_ETCD_MAX_RETRY)
    }

    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }

    pub fn key(&self) -> &str {
        or_default(&self.key, DEFAULT_ETCD_KEY)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        credential_pair(&self.username, &self.password)
    }

    pub fn has_partial_credentials(&self) -> bool {
        is_partial(&self.username, &self.password)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosConfig {
    pub address: String,
    pub port: Option<u16>,
    pub namespace: String,
    pub username: String,
    pub password: String,
    pub group: String,
    pub data_id: String,
    pub timeout_secs: Option<u64>,
}

impl NacosConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_NACOS_PORT)
    }

    pub fn group(&self) -> &str {
        or_default(&self.group, DEFAULT_NACOS_GROUP)
    }

    pub fn data_id(&self) -> &str {
        or_default(&self.data_id, DEFAULT_NACOS_DATA_ID)
    }

    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        credential_pair(&self.username, &self.password)
    }

    pub fn has_partial_credentials(&self) -> bool {
        is_partial(&self.username, &self.password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub enable: bool,
    /// Use the pod's service account credentials.
    pub in_cluster: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            enable: false,
            in_cluster: true,
            timeout_secs: None,
        }
    }
}

impl KubernetesConfig {
    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }
}
