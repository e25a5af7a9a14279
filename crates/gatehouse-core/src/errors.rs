//! Authorization error kinds.
//!
//! Every per-request failure of the auth core is reported as one of the
//! variants below. Each variant carries a stable machine-readable
//! [`reason`](AuthError::reason) so API clients can branch on the kind
//! without matching on the human-readable message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Typed authorization failure.
///
/// The variants deliberately carry no payload: signature details, parse
/// errors and secret material never leave the process through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AuthError {
    /// No bearer credential was presented where one is required.
    #[error("missing bearer token")]
    MissingToken,

    /// The token is malformed or its signature does not verify.
    #[error("invalid token")]
    InvalidToken,

    /// The token's expiry is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// The token verified but its payload does not have the expected claims shape.
    #[error("token claims have an unexpected shape")]
    InvalidClaimsType,

    /// The role carried by the token is not part of the role hierarchy.
    #[error("unknown role")]
    UnknownRole,

    /// The caller's role ranks below the route's minimum.
    #[error("insufficient role for this operation")]
    InsufficientRole,

    /// A token was requested for a role outside the hierarchy.
    #[error("cannot issue a token for an unrecognized role")]
    InvalidRole,
}

impl AuthError {
    /// Stable code exposed to API clients.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InvalidClaimsType => "INVALID_CLAIMS_TYPE",
            AuthError::UnknownRole => "UNKNOWN_ROLE",
            AuthError::InsufficientRole => "INSUFFICIENT_ROLE",
            AuthError::InvalidRole => "INVALID_ROLE",
        }
    }

    /// HTTP status used when the error is rendered as a response.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientRole => StatusCode::FORBIDDEN,
            AuthError::InvalidRole => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "reason": self.reason(),
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_distinct() {
        let all = [
            AuthError::MissingToken,
            AuthError::InvalidToken,
            AuthError::TokenExpired,
            AuthError::InvalidClaimsType,
            AuthError::UnknownRole,
            AuthError::InsufficientRole,
            AuthError::InvalidRole,
        ];
        let mut reasons: Vec<_> = all.iter().map(|e| e.reason()).collect();
        reasons.sort_unstable();
        reasons.dedup();
        assert_eq!(reasons.len(), all.len());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AuthError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UnknownRole.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InsufficientRole.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_into_response_status() {
        let response = AuthError::InsufficientRole.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AuthError::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
