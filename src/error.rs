use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatehouse_registry::BackendError;
use serde_json::json;
use tracing::warn;

/// Handler failure rendered as `{"error": <message>}`.
///
/// Gate rejections do not go through this type; they render from
/// [`gatehouse_core::AuthError`] directly.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("service discovery is not configured")]
    DiscoveryDisabled,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DiscoveryDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Backend(e) = &self {
            warn!(error = %e, "Registry backend call failed");
        }

        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
