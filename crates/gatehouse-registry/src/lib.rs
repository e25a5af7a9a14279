//! # Gatehouse Registry
//!
//! Uniform service discovery, registration and config-center access over
//! Consul, Etcd, Nacos and Kubernetes.
//!
//! A service describes its backend with a single
//! [`BackendConfig`](gatehouse_config::BackendConfig) oneof. At startup the
//! [`selector`] turns it into a handle implementing one of the capability
//! traits below:
//!
//! - [`Discovery`]: resolve a service name to live instances
//! - [`Registrar`]: announce and withdraw this service instance
//! - [`ConfigSource`]: fetch remote configuration documents
//!
//! `Ok(None)` from a selector means the concern is disabled; callers run
//! without it. An `Err` means a configured backend could not be built, which
//! is fatal at startup.
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_registry::{select_registrar, ServiceInstance};
//!
//! let registrar = select_registrar(bootstrap.registry.as_ref()).await?;
//! if let Some(registrar) = &registrar {
//!     registrar.register(&instance).await?;
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod consul;
pub mod error;
pub mod etcd;
pub mod kubernetes;
pub mod nacos;
pub mod selector;

pub use error::BackendError;
pub use gatehouse_config::KeyValue;
pub use selector::{select_config_source, select_discovery, select_registrar};

/// Metadata key carrying the instance version.
pub const META_VERSION: &str = "version";
/// Metadata key carrying the comma-separated endpoint list.
pub const META_ENDPOINTS: &str = "endpoints";

/// One running instance of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Endpoint URLs, e.g. `http://10.0.0.7:8000`.
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    /// Host and port of the first endpoint.
    pub fn host_port(&self) -> Result<(String, u16), BackendError> {
        let endpoint = self.endpoints.first().ok_or_else(|| {
            BackendError::InvalidInstance(format!("instance {} has no endpoints", self.id))
        })?;
        let url = Url::parse(endpoint).map_err(|e| {
            BackendError::InvalidInstance(format!("endpoint {endpoint}: {e}"))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| BackendError::InvalidInstance(format!("endpoint {endpoint} has no host")))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            BackendError::InvalidInstance(format!("endpoint {endpoint} has no port"))
        })?;
        Ok((host.to_string(), port))
    }

    /// Flat metadata map including version and endpoints, for backends that
    /// only store string maps.
    pub fn flat_metadata(&self) -> HashMap<String, String> {
        let mut meta = self.metadata.clone();
        if !self.version.is_empty() {
            meta.insert(META_VERSION.to_string(), self.version.clone());
        }
        meta.insert(META_ENDPOINTS.to_string(), self.endpoints.join(","));
        meta
    }

    /// Inverse of [`flat_metadata`](Self::flat_metadata). `fallback` is used
    /// when the map carries no endpoints.
    pub fn from_flat_metadata(
        id: String,
        name: String,
        mut meta: HashMap<String, String>,
        fallback: String,
    ) -> Self {
        let version = meta.remove(META_VERSION).unwrap_or_default();
        let endpoints = match meta.remove(META_ENDPOINTS) {
            Some(list) if !list.is_empty() => list.split(',').map(str::to_string).collect(),
            _ => vec![fallback],
        };
        Self {
            id,
            name,
            version,
            metadata: meta,
            endpoints,
        }
    }
}

/// Resolves service names to live instances.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError>;
}

/// Announces and withdraws service instances.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), BackendError>;
    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), BackendError>;
}

/// Supplies configuration documents from a config center.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Vec<KeyValue>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ServiceInstance {
        ServiceInstance {
            id: "svc-1".into(),
            name: "svc".into(),
            version: "v1".into(),
            metadata: HashMap::from([("zone".to_string(), "a".to_string())]),
            endpoints: vec!["http://10.0.0.7:8000".into(), "grpc://10.0.0.7:9000".into()],
        }
    }

    #[test]
    fn test_host_port_from_first_endpoint() {
        assert_eq!(instance().host_port().unwrap(), ("10.0.0.7".to_string(), 8000));
    }

    #[test]
    fn test_host_port_without_endpoints() {
        let instance = ServiceInstance {
            endpoints: vec![],
            ..instance()
        };
        assert!(matches!(
            instance.host_port(),
            Err(BackendError::InvalidInstance(_))
        ));
    }

    #[test]
    fn test_flat_metadata_round_trip() {
        let original = instance();
        let flat = original.flat_metadata();
        assert_eq!(flat["version"], "v1");

        let restored = ServiceInstance::from_flat_metadata(
            original.id.clone(),
            original.name.clone(),
            flat,
            "http://unused:1".into(),
        );
        assert_eq!(restored, original);
    }

    #[test]
    fn test_from_flat_metadata_uses_fallback() {
        let restored = ServiceInstance::from_flat_metadata(
            "id".into(),
            "svc".into(),
            HashMap::new(),
            "http://10.0.0.9:80".into(),
        );
        assert_eq!(restored.endpoints, vec!["http://10.0.0.9:80".to_string()]);
        assert!(restored.version.is_empty());
    }
}
