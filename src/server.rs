use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gatehouse_auth::{Claims, TokenCodec};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bootstrap::{Service, apply_config_center, instance_id, load_local};
use crate::logging::{init_tracing, shutdown_tracer};
use crate::metrics::init_metrics;
use crate::middleware::gate::AuthGate;
use crate::router::{access_policy, init_router};
use crate::state::AppState;

/// Runs the service until ctrl-c or SIGTERM, registering it for the
/// duration.
pub async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let local = load_local(config_path)?;
    let id = instance_id();
    init_tracing(&local.app, &id, &local.log, local.trace.as_ref())?;

    let bootstrap = apply_config_center(config_path, local).await?;
    if bootstrap.jwt.uses_default_secret() {
        warn!("jwt.secret is not set; using the default development secret");
    }

    let metrics = init_metrics().context("installing Prometheus recorder")?;
    let codec = Arc::new(TokenCodec::<Claims>::new(&bootstrap.jwt));
    let gate = AuthGate::new(access_policy(), codec);

    let service = Service::connect(bootstrap, id).await?;
    let state = AppState::new(gate, service.discovery.clone(), service.identity.clone());
    let app = init_router(state, metrics);

    let addr = service.bootstrap.app.http_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %addr,
        service = %service.identity.name,
        service_id = %service.identity.id,
        "Server listening"
    );

    service.register().await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    service.deregister().await;
    shutdown_tracer().await;

    served.context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
