//! Authorization gate applied in front of every handler.
//!
//! [`AuthGate::decide`] is the whole state machine and is pure over the
//! request headers; [`authorize`] wires it into axum with
//! `middleware::from_fn_with_state`.
//!
//! ```ignore
//! let gate = Arc::new(AuthGate::new(policy, codec));
//! let app = Router::new()
//!     .route("/v1/users/me", get(me))
//!     .route_layer(middleware::from_fn_with_state(gate, authorize::<Claims>));
//! ```

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gatehouse_auth::{AuthClaims, TokenCodec, with_claims};
use gatehouse_core::{AuthError, MinimumRole, roles};
use tracing::debug;

use crate::metrics;
use crate::middleware::policy::{Access, RoutePolicy};

const BEARER_PREFIX: &str = "Bearer ";

/// Operation identifier set by the transport layer. Takes precedence over
/// the matched route when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation(pub String);

/// Gate outcome attached to the response, read by the request log:
/// `bypass`, `anonymous`, `authenticated`, or the rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict(pub &'static str);

/// Outcome of a successful gate check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<C> {
    /// The operation bypasses the gate.
    Bypass,
    /// Public operation called without credentials.
    Anonymous,
    /// Validated claims to attach to the request.
    Authenticated(C),
}

impl<C> Decision<C> {
    fn outcome(&self) -> &'static str {
        match self {
            Decision::Bypass => "bypass",
            Decision::Anonymous => "anonymous",
            Decision::Authenticated(_) => "authenticated",
        }
    }
}

pub struct AuthGate<C: AuthClaims> {
    policy: RoutePolicy,
    codec: Arc<TokenCodec<C>>,
}

impl<C: AuthClaims> std::fmt::Debug for AuthGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("policy", &self.policy)
            .field("codec", &self.codec)
            .finish()
    }
}

impl<C: AuthClaims> AuthGate<C> {
    pub fn new(policy: RoutePolicy, codec: Arc<TokenCodec<C>>) -> Self {
        Self { policy, codec }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    pub fn codec(&self) -> &TokenCodec<C> {
        &self.codec
    }

    /// Decides whether a request for `operation` with `headers` may proceed.
    pub fn decide(&self, operation: &str, headers: &HeaderMap) -> Result<Decision<C>, AuthError> {
        let minimum = match self.policy.resolve(operation) {
            Access::Bypass => return Ok(Decision::Bypass),
            Access::Public => MinimumRole::Public,
            Access::AtLeast(role) => MinimumRole::AtLeast(role),
        };

        let token = match bearer_token(headers)? {
            Some(token) => token,
            None if minimum.is_public() => return Ok(Decision::Anonymous),
            None => return Err(AuthError::MissingToken),
        };

        let claims = self.codec.validate(token)?;
        roles::check(claims.role(), minimum)?;

        Ok(Decision::Authenticated(claims))
    }
}

/// Token from an `Authorization: Bearer <token>` header.
///
/// No header, or an empty bearer value, is `None`. Any other scheme is
/// `InvalidToken`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::InvalidToken)?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::InvalidToken)?
        .trim();

    Ok((!token.is_empty()).then_some(token))
}

/// Operation identifier: [`Operation`] extension, else the matched route,
/// else the request path.
pub fn operation_id(req: &Request) -> String {
    if let Some(Operation(operation)) = req.extensions().get::<Operation>() {
        return operation.clone();
    }
    req.extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

pub async fn authorize<C: AuthClaims>(
    State(gate): State<Arc<AuthGate<C>>>,
    mut req: Request,
    next: Next,
) -> Response {
    let operation = operation_id(&req);

    match gate.decide(&operation, req.headers()) {
        Ok(decision) => {
            let outcome = decision.outcome();
            metrics::track_gate_decision(outcome);
            if let Decision::Authenticated(claims) = decision {
                debug!(operation = %operation, subject = claims.subject(), role = claims.role(), "Request authorized");
                with_claims(req.extensions_mut(), claims);
            }
            let mut response = next.run(req).await;
            response.extensions_mut().insert(GateVerdict(outcome));
            response
        }
        Err(err) => {
            debug!(operation = %operation, reason = err.reason(), "Request rejected");
            metrics::track_gate_rejection(err.reason());
            let mut response = err.into_response();
            response.extensions_mut().insert(GateVerdict(err.reason()));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use gatehouse_auth::Claims;
    use gatehouse_config::JwtConfig;
    use gatehouse_core::Role;

    use crate::middleware::policy::RouteSet;

    fn get_test_jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "test_secret_key_for_testing_purposes_only".to_string(),
            ..Default::default()
        }
    }

    fn gate() -> AuthGate<Claims> {
        let policy = RoutePolicy::new()
            .bypass(RouteSet::exact(["/healthz"]))
            .require(Role::User, RouteSet::exact(["/v1/users/me"]))
            .require_except(
                Role::Admin,
                RouteSet::exact(["/v1/users/me", "/healthz"]).with_prefix(["/v1/public/"]),
            );
        AuthGate::new(policy, Arc::new(TokenCodec::new(&get_test_jwt_config())))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn token_for(gate: &AuthGate<Claims>, role: &str) -> String {
        let codec = gate.codec();
        codec.issue(&codec.claims(7, "alice", role, Default::default())).unwrap()
    }

    #[test]
    fn test_bypass_ignores_garbage_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("garbage"));
        assert_eq!(gate().decide("/healthz", &headers), Ok(Decision::Bypass));
    }

    #[test]
    fn test_public_without_token_is_anonymous() {
        assert_eq!(
            gate().decide("/v1/public/ping", &HeaderMap::new()),
            Ok(Decision::Anonymous)
        );
    }

    #[test]
    fn test_public_with_token_attaches_claims() {
        let gate = gate();
        let token = token_for(&gate, "guest");
        match gate.decide("/v1/public/ping", &bearer(&token)) {
            Ok(Decision::Authenticated(claims)) => assert_eq!(claims.role, "guest"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_public_with_unknown_role_is_admitted() {
        let gate = gate();
        let claims = gate.codec().claims(7, "alice", "auditor", Default::default());
        // Bypasses issue() which refuses unknown roles.
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(get_test_jwt_config().secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            gate.decide("/v1/public/ping", &bearer(&token)),
            Ok(Decision::Authenticated(_))
        ));
        assert_eq!(
            gate.decide("/v1/users/me", &bearer(&token)),
            Err(AuthError::UnknownRole)
        );
    }

    #[test]
    fn test_public_with_invalid_token_is_rejected() {
        assert_eq!(
            gate().decide("/v1/public/ping", &bearer("malformed.token.value")),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_protected_without_token_is_missing() {
        assert_eq!(
            gate().decide("/v1/users/me", &HeaderMap::new()),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            gate().decide("/v1/users/me", &bearer("")),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn test_non_bearer_scheme_is_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(
            gate().decide("/v1/users/me", &headers),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_role_hierarchy_is_enforced() {
        let gate = gate();
        let guest = token_for(&gate, "guest");
        let user = token_for(&gate, "user");
        let admin = token_for(&gate, "admin");

        assert_eq!(
            gate.decide("/v1/users/me", &bearer(&guest)),
            Err(AuthError::InsufficientRole)
        );
        assert!(gate.decide("/v1/users/me", &bearer(&user)).is_ok());
        assert!(gate.decide("/v1/users/me", &bearer(&admin)).is_ok());

        assert_eq!(
            gate.decide("/v1/admin/users/9", &bearer(&user)),
            Err(AuthError::InsufficientRole)
        );
        assert!(gate.decide("/v1/admin/users/9", &bearer(&admin)).is_ok());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&HeaderMap::new()), Ok(None));
        assert_eq!(bearer_token(&bearer("abc")), Ok(Some("abc")));

        let mut lowercase = HeaderMap::new();
        lowercase.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&lowercase), Err(AuthError::InvalidToken));
    }
}
