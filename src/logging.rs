use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use gatehouse_config::{AppConfig, LogConfig, TraceConfig};
use opentelemetry::{KeyValue, global, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer},
};
use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT, SERVICE_INSTANCE_ID, SERVICE_NAME, SERVICE_VERSION,
};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::middleware::gate::GateVerdict;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// One log line per request, carrying the route template and the gate's
/// verdict. Reuses the caller's `x-request-id` when present.
pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let response = next.run(req).await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let status = response.status().as_u16();
    let gate = response
        .extensions()
        .get::<GateVerdict>()
        .map(|verdict| verdict.0)
        .unwrap_or("none");

    // Health and scrape traffic stays at debug.
    match (status, gate) {
        (500..=599, _) => {
            error!(request_id = %request_id, method = %method, route = %route, status, gate, latency_ms, "Request failed")
        }
        (400..=499, _) => {
            warn!(request_id = %request_id, method = %method, route = %route, status, gate, latency_ms, "Request refused")
        }
        (_, "bypass") => debug!(request_id = %request_id, method = %method, route = %route, status, latency_ms, "Request served"),
        _ => info!(request_id = %request_id, method = %method, route = %route, status, gate, latency_ms, "Request served"),
    }

    response
}

fn init_tracer(endpoint: &str, app: &AppConfig, instance_id: &str) -> Result<Tracer, TraceError> {
    // Set up trace context propagator for distributed tracing
    global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, app.name.clone()),
        KeyValue::new(SERVICE_VERSION, app.version.clone()),
        KeyValue::new(SERVICE_INSTANCE_ID, instance_id.to_string()),
        KeyValue::new(DEPLOYMENT_ENVIRONMENT, app.env.clone()),
    ]);

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)
}

/// Installs the global subscriber: compact console output, rolling error and
/// JSON files when `log.dir` is set, and an OTLP exporter when a trace
/// endpoint is configured.
pub fn init_tracing(
    app: &AppConfig,
    instance_id: &str,
    log: &LogConfig,
    trace: Option<&TraceConfig>,
) -> anyhow::Result<()> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{crate}={level},gatehouse_registry={level},tower_http=warn,hyper=info,tonic=info",
            crate = env!("CARGO_CRATE_NAME"),
            level = log.level,
        ))
    });

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_filter(console_filter);

    let (file_layer, json_layer) = match &log.dir {
        Some(dir) => {
            let errors = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(format!("{}.log", app.name))
                .build(dir)?;
            let structured = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(format!("{}.json", app.name))
                .build(dir)?;

            let file_layer = fmt::layer()
                .with_writer(errors)
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new("error"));

            // Structured logs (can be ingested by Loki)
            let json_layer = fmt::layer()
                .json()
                .with_writer(structured)
                .with_current_span(true)
                .with_span_list(true)
                .with_filter(EnvFilter::new(&log.level));

            (Some(file_layer), Some(json_layer))
        }
        None => (None, None),
    };

    let endpoint = trace.map(|trace| trace.endpoint.as_str()).filter(|e| !e.is_empty());
    let tracer = match endpoint {
        Some(endpoint) => match init_tracer(endpoint, app, instance_id) {
            Ok(tracer) => Some(tracer),
            Err(e) => {
                // Continue without OpenTelemetry
                eprintln!("Failed to initialize OpenTelemetry: {e}. Continuing without tracing...");
                None
            }
        },
        None => None,
    };
    let otel_enabled = tracer.is_some();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(json_layer)
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .try_init()?;

    if otel_enabled {
        info!(endpoint = endpoint.unwrap_or_default(), "Tracing initialized with OpenTelemetry");
    } else {
        info!("Tracing initialized without OpenTelemetry");
    }
    Ok(())
}

pub async fn shutdown_tracer() {
    info!("Shutting down OpenTelemetry tracer...");

    global::shutdown_tracer_provider();

    info!("OpenTelemetry tracer shutdown complete");
}
