use axum::routing::{delete, get};
use axum::{Router, middleware};
use gatehouse_auth::Claims;
use gatehouse_core::Role;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::logging::logging_middleware;
use crate::metrics::{metrics_app, metrics_middleware};
use crate::middleware::gate::authorize;
use crate::middleware::policy::{RoutePolicy, RouteSet};
use crate::state::AppState;

/// Access rules for the routes below. Everything not explicitly public,
/// user-level or operator-level needs an admin.
pub fn access_policy() -> RoutePolicy {
    let public = RouteSet::prefix(["/v1/public/"]);
    let user = RouteSet::exact(["/v1/users/me"]);
    let operator = RouteSet::prefix(["/v1/ops/"]);

    RoutePolicy::new()
        .bypass(RouteSet::exact(["/healthz", "/metrics"]))
        .require(Role::User, user.clone())
        .require(Role::Operator, operator.clone())
        .require_except(Role::Admin, RouteSet::merge([&public, &user, &operator]))
}

pub fn init_router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let gate = state.gate.clone();

    let mut router = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/v1/public/ping", get(handlers::ping))
        .route("/v1/users/me", get(handlers::me))
        .route("/v1/ops/services/{name}", get(handlers::list_instances))
        .route("/v1/admin/users/{id}", delete(handlers::delete_user))
        .route_layer(middleware::from_fn_with_state(gate, authorize::<Claims>))
        .with_state(state);

    if let Some(handle) = metrics {
        router = router.merge(metrics_app(handle));
    }

    router
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}
