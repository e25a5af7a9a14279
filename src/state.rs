use std::sync::Arc;

use gatehouse_auth::Claims;
use gatehouse_registry::{Discovery, ServiceInstance};

use crate::middleware::gate::AuthGate;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate<Claims>>,
    /// `None` when no discovery backend is configured.
    pub discovery: Option<Arc<dyn Discovery>>,
    pub identity: Arc<ServiceInstance>,
}

impl AppState {
    pub fn new(
        gate: AuthGate<Claims>,
        discovery: Option<Arc<dyn Discovery>>,
        identity: ServiceInstance,
    ) -> Self {
        Self {
            gate: Arc::new(gate),
            discovery,
            identity: Arc::new(identity),
        }
    }
}
