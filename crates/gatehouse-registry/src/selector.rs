//! Chooses the backend implementation from configuration.
//!
//! Each backend config type knows how to build its own clients through
//! [`BackendFactory`]; the public selectors only dispatch on the variant and
//! log the outcome. An absent config yields `Ok(None)`.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_config::BackendConfig;
use tracing::info;

use crate::{BackendError, ConfigSource, Discovery, Registrar};

/// Builds clients for one backend variant. `Ok(None)` means the backend is
/// configured but disabled or does not offer the capability.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn discovery(&self) -> Result<Option<Arc<dyn Discovery>>, BackendError>;
    async fn registrar(&self) -> Result<Option<Arc<dyn Registrar>>, BackendError>;
    async fn config_source(&self) -> Result<Option<Arc<dyn ConfigSource>>, BackendError>;
}

fn factory(config: &BackendConfig) -> &dyn BackendFactory {
    match config {
        BackendConfig::Consul(c) => c,
        BackendConfig::Etcd(c) => c,
        BackendConfig::Nacos(c) => c,
        BackendConfig::Kubernetes(c) => c,
    }
}

fn log_outcome<T: ?Sized>(concern: &str, config: Option<&BackendConfig>, handle: &Option<Arc<T>>) {
    match (config, handle) {
        (Some(config), Some(_)) => info!(backend = config.kind(), "{concern} backend selected"),
        (Some(config), None) => info!(backend = config.kind(), "{concern} backend disabled"),
        (None, _) => info!("{concern} not configured"),
    }
}

pub async fn select_discovery(
    config: Option<&BackendConfig>,
) -> Result<Option<Arc<dyn Discovery>>, BackendError> {
    let handle = match config {
        Some(config) => factory(config).discovery().await?,
        None => None,
    };
    log_outcome("Discovery", config, &handle);
    Ok(handle)
}

pub async fn select_registrar(
    config: Option<&BackendConfig>,
) -> Result<Option<Arc<dyn Registrar>>, BackendError> {
    let handle = match config {
        Some(config) => factory(config).registrar().await?,
        None => None,
    };
    log_outcome("Registry", config, &handle);
    Ok(handle)
}

pub async fn select_config_source(
    config: Option<&BackendConfig>,
) -> Result<Option<Arc<dyn ConfigSource>>, BackendError> {
    let handle = match config {
        Some(config) => factory(config).config_source().await?,
        None => None,
    };
    log_outcome("Config center", config, &handle);
    Ok(handle)
}
