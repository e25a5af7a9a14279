#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use gatehouse::middleware::gate::AuthGate;
use gatehouse::router::{access_policy, init_router};
use gatehouse::state::AppState;
use gatehouse_auth::{Claims, TokenCodec};
use gatehouse_config::JwtConfig;
use gatehouse_registry::{BackendError, Discovery, ServiceInstance};

pub fn get_test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "test-secret-key-for-integration-tests".to_string(),
        issuer: "gatehouse-test".to_string(),
        ..Default::default()
    }
}

pub fn test_codec() -> Arc<TokenCodec<Claims>> {
    Arc::new(TokenCodec::new(&get_test_jwt_config()))
}

/// Signed token for subject 42 with the given role.
pub fn create_test_token(role: &str) -> String {
    let codec = test_codec();
    codec
        .issue(&codec.claims(42, "alice", role, Default::default()))
        .expect("Failed to issue test token")
}

pub fn test_identity() -> ServiceInstance {
    ServiceInstance {
        id: "orders-test-1".to_string(),
        name: "orders".to_string(),
        version: "0.1.0".to_string(),
        metadata: HashMap::new(),
        endpoints: vec!["http://127.0.0.1:8080".to_string()],
    }
}

/// Discovery backend answering from a fixed table.
pub struct StaticDiscovery {
    pub services: HashMap<String, Vec<ServiceInstance>>,
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        Ok(self.services.get(name).cloned().unwrap_or_default())
    }
}

/// Discovery backend whose every lookup fails.
pub struct BrokenDiscovery;

#[async_trait]
impl Discovery for BrokenDiscovery {
    async fn get_service(&self, _name: &str) -> Result<Vec<ServiceInstance>, BackendError> {
        Err(BackendError::decode("consul", "unexpected payload"))
    }
}

pub fn setup_test_app(discovery: Option<Arc<dyn Discovery>>) -> Router {
    let gate = AuthGate::new(access_policy(), test_codec());
    init_router(AppState::new(gate, discovery, test_identity()), None)
}
