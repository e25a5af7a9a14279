mod common;

use std::io::Write;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header};
use common::{create_test_token, test_codec};
use gatehouse::bootstrap::load_local;
use gatehouse::cli::issue_token;
use gatehouse::middleware::gate::{AuthGate, Decision};
use gatehouse::router::access_policy;
use gatehouse_auth::{Claims, TokenCodec};
use gatehouse_config::JwtConfig;
use gatehouse_core::AuthError;

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

#[test]
fn test_issue_token_all_roles() {
    for role in ["guest", "user", "operator", "admin"] {
        let token = create_test_token(role);
        let claims = test_codec().validate(&token).unwrap();
        assert_eq!(claims.role, role);
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.iss, "gatehouse-test");
    }
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_cli_token_is_accepted_by_the_service_config() {
    let file = write_config(
        "app:\n  name: cli-token-test\njwt:\n  secret: shared-service-secret\n  issuer: orders\n",
    );

    let token = issue_token(file.path(), 7, "ops-bot", "operator").await.unwrap();

    let bootstrap = load_local(file.path()).unwrap();
    let gate = AuthGate::new(access_policy(), Arc::new(TokenCodec::<Claims>::new(&bootstrap.jwt)));
    let claims = match gate.decide("/v1/ops/services/{name}", &bearer(&token)) {
        Ok(Decision::Authenticated(claims)) => claims,
        other => panic!("unexpected decision: {other:?}"),
    };
    assert_eq!(claims.sub, 7);
    assert_eq!(claims.name, "ops-bot");
    assert_eq!(claims.iss, "orders");
    assert!(claims.exp > claims.iat);

    let default_codec = TokenCodec::<Claims>::new(&JwtConfig::default());
    assert_eq!(default_codec.validate(&token).unwrap_err(), AuthError::InvalidToken);
}

#[tokio::test]
async fn test_cli_refuses_unknown_role() {
    let file = write_config("app:\n  name: cli-role-refusal-test\n");
    assert!(issue_token(file.path(), 7, "ops-bot", "superuser").await.is_err());
}

#[test]
fn test_gate_accepts_issued_tokens_by_rank() {
    let gate = AuthGate::new(access_policy(), test_codec());

    let operator = create_test_token("operator");
    assert!(matches!(
        gate.decide("/v1/ops/services/orders", &bearer(&operator)),
        Ok(Decision::Authenticated(_))
    ));
    assert_eq!(
        gate.decide("/v1/admin/users/1", &bearer(&operator)).unwrap_err(),
        AuthError::InsufficientRole
    );

    let admin = create_test_token("admin");
    assert!(gate.decide("/v1/ops/services/orders", &bearer(&admin)).is_ok());
    assert!(gate.decide("/v1/admin/users/1", &bearer(&admin)).is_ok());
}

#[test]
fn test_gate_rejects_tampered_token() {
    let gate = AuthGate::new(access_policy(), test_codec());
    let mut token = create_test_token("admin");
    token.push('x');

    assert_eq!(
        gate.decide("/v1/users/me", &bearer(&token)).unwrap_err(),
        AuthError::InvalidToken
    );
}
