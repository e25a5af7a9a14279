//! Service startup: layered configuration, identity and registration.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use gatehouse_config::{AppConfig, BackendConfig, Bootstrap, bootstrap};
use gatehouse_registry::{
    Discovery, Registrar, ServiceInstance, select_config_source, select_discovery, select_registrar,
};
use tracing::{info, warn};

use crate::metrics;

/// Loads the local file and environment layers.
///
/// The environment prefix depends on `app.name`, which itself comes from the
/// file, so the file is read once without the environment to learn it.
pub fn load_local(path: &Path) -> anyhow::Result<Bootstrap> {
    let file_only = bootstrap::load(path, "", &[])
        .with_context(|| format!("loading {}", path.display()))?;
    if file_only.app.name.is_empty() {
        bail!("app.name must be set in {}", path.display());
    }
    bootstrap::load(path, &file_only.app.name, &[]).with_context(|| format!("loading {}", path.display()))
}

/// Overlays the config center's documents, if one is configured, beneath the
/// environment layer.
pub async fn apply_config_center(path: &Path, local: Bootstrap) -> anyhow::Result<Bootstrap> {
    let Some(source) = select_config_source(local.config.as_ref()).await? else {
        return Ok(local);
    };

    let documents = source.load().await.context("loading remote configuration")?;
    info!(documents = documents.len(), "Loaded remote configuration");

    bootstrap::load(path, &local.app.name, &documents).context("merging remote configuration")
}

pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `<hostname>-<uuid>`, unique per process.
pub fn instance_id() -> String {
    format!("{}-{}", hostname(), uuid::Uuid::new_v4())
}

/// Endpoint announced to the registry.
pub fn advertise_endpoint(app: &AppConfig) -> anyhow::Result<String> {
    if !app.advertise_addr.is_empty() {
        return Ok(format!("http://{}", app.advertise_addr));
    }

    let addr: SocketAddr = app
        .http_addr
        .parse()
        .with_context(|| format!("invalid app.http_addr {}", app.http_addr))?;
    if addr.ip().is_unspecified() {
        Ok(format!("http://{}:{}", hostname(), addr.port()))
    } else {
        Ok(format!("http://{addr}"))
    }
}

pub fn service_identity(app: &AppConfig, id: String) -> anyhow::Result<ServiceInstance> {
    Ok(ServiceInstance {
        id,
        name: app.name.clone(),
        version: app.version.clone(),
        metadata: app.metadata.clone(),
        endpoints: vec![advertise_endpoint(app)?],
    })
}

/// Backend handles and identity of the running service.
pub struct Service {
    pub bootstrap: Bootstrap,
    pub identity: ServiceInstance,
    pub discovery: Option<Arc<dyn Discovery>>,
    registrar: Option<Arc<dyn Registrar>>,
}

impl Service {
    /// Builds the configured backends. A backend that cannot be constructed
    /// is a startup failure.
    pub async fn connect(bootstrap: Bootstrap, id: String) -> anyhow::Result<Self> {
        let identity = service_identity(&bootstrap.app, id)?;
        let registrar = select_registrar(bootstrap.registry.as_ref()).await?;
        let discovery = select_discovery(bootstrap.discovery.as_ref()).await?;

        Ok(Self {
            bootstrap,
            identity,
            discovery,
            registrar,
        })
    }

    fn registry_kind(&self) -> &'static str {
        self.bootstrap
            .registry
            .as_ref()
            .map(BackendConfig::kind)
            .unwrap_or("none")
    }

    pub async fn register(&self) -> anyhow::Result<()> {
        let Some(registrar) = &self.registrar else {
            return Ok(());
        };

        let result = registrar.register(&self.identity).await;
        metrics::track_registry_operation(self.registry_kind(), "register", result.is_ok());
        result.with_context(|| format!("registering {}", self.identity.id))?;

        info!(
            service_id = %self.identity.id,
            endpoints = ?self.identity.endpoints,
            "Service registered"
        );
        Ok(())
    }

    /// Best effort; failures are logged.
    pub async fn deregister(&self) {
        let Some(registrar) = &self.registrar else {
            return;
        };

        let result = registrar.deregister(&self.identity).await;
        metrics::track_registry_operation(self.registry_kind(), "deregister", result.is_ok());
        match result {
            Ok(()) => info!(service_id = %self.identity.id, "Service deregistered"),
            Err(e) => warn!(service_id = %self.identity.id, error = %e, "Deregistration failed"),
        }
    }
}
