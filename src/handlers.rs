//! Handlers behind the gate, one per access level.

use axum::{
    Json,
    extract::{Path, State},
};
use gatehouse_registry::ServiceInstance;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::AppError;
use crate::metrics;
use crate::middleware::auth::CurrentClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Profile {
    pub sub: u64,
    pub name: String,
    pub role: String,
    pub expires_at: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.identity.name,
        "instance": state.identity.id,
    }))
}

/// Public: answers anonymous callers too.
pub async fn ping(claims: Option<CurrentClaims>) -> Json<Value> {
    Json(json!({
        "message": "pong",
        "subject": claims.map(|claims| claims.sub),
    }))
}

pub async fn me(claims: CurrentClaims) -> Json<Profile> {
    Json(Profile {
        sub: claims.sub,
        name: claims.name.clone(),
        role: claims.role.clone(),
        expires_at: claims.exp,
    })
}

pub async fn list_instances(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ServiceInstance>>, AppError> {
    let discovery = state.discovery.as_ref().ok_or(AppError::DiscoveryDisabled)?;
    let instances = discovery.get_service(&name).await?;
    metrics::set_discovered_instances(&name, instances.len());

    Ok(Json(instances))
}

pub async fn delete_user(Path(id): Path<u64>, claims: CurrentClaims) -> Json<Value> {
    info!(user_id = id, deleted_by = claims.sub, "User deleted");
    Json(json!({ "deleted": id, "by": claims.sub }))
}
