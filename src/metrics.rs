use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
    routing::get,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static OBSERVABILITY_ENABLED: OnceLock<bool> = OnceLock::new();
static DISCOVERED_SERVICES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Check if observability is enabled via OBSERVABILITY_ENABLED env var
pub fn is_observability_enabled() -> bool {
    *OBSERVABILITY_ENABLED.get_or_init(|| {
        std::env::var("OBSERVABILITY_ENABLED")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true) // Enabled by default
    })
}

/// Initialize Prometheus metrics exporter with upkeep task
/// Returns Ok(None) if observability is disabled
pub fn init_metrics() -> Result<Option<PrometheusHandle>, BuildError> {
    if !is_observability_enabled() {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5,
                10.0,
            ],
        )?
        .install_recorder()?;

    // Spawn upkeep task to clean stale metrics
    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            upkeep_handle.run_upkeep();
        }
    });

    Ok(Some(handle))
}

/// Metrics middleware to track HTTP requests
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    if !is_observability_enabled() {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().as_str().to_owned();
    let uri_path = req.uri().path().to_owned();

    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or(uri_path);

    gauge!("http_requests_active").increment(1.0);

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    counter!("http_requests_total", "method" => method.clone(), "path" => path.clone(), "status" => status.to_string()).increment(1);
    histogram!("http_request_duration_seconds", "method" => method, "path" => path).record(latency);

    gauge!("http_requests_active").decrement(1.0);

    response
}

/// Router serving the Prometheus scrape endpoint
pub fn metrics_app(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

// Gate metrics

/// Requests the gate let through, by outcome (bypass, anonymous, authenticated)
pub fn track_gate_decision(outcome: &'static str) {
    if !is_observability_enabled() {
        return;
    }
    counter!("gate_decisions_total", "outcome" => outcome).increment(1);
}

pub fn track_gate_rejection(reason: &'static str) {
    if !is_observability_enabled() {
        return;
    }
    counter!("gate_rejections_total", "reason" => reason).increment(1);
}

// Registry metrics

pub fn track_registry_operation(backend: &'static str, operation: &'static str, success: bool) {
    if !is_observability_enabled() {
        return;
    }
    let status = if success { "success" } else { "error" };
    counter!("registry_operations_total", "backend" => backend, "operation" => operation, "status" => status)
        .increment(1);
}

/// Gauge of instances per service. A name becomes a label only once it has
/// resolved to at least one instance; lookups of unknown names are not
/// recorded.
pub fn set_discovered_instances(service: &str, count: usize) {
    if !is_observability_enabled() {
        return;
    }

    let known = DISCOVERED_SERVICES.get_or_init(|| Mutex::new(HashSet::new()));
    let Ok(mut known) = known.lock() else {
        return;
    };
    if count == 0 && !known.contains(service) {
        return;
    }
    known.insert(service.to_string());
    drop(known);

    gauge!("discovered_instances", "service" => service.to_string()).set(count as f64);
}
