//! # Gatehouse Config
//!
//! Configuration types for Gatehouse services.
//!
//! - [`jwt`]: bearer token signing configuration
//! - [`backend`]: the discovery / registry / config-center backend oneof
//! - [`bootstrap`]: the service bootstrap document and its layered loader
//!
//! Nothing in this crate is stored in global state. Each component is
//! constructed with the configuration it needs passed in explicitly.
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_config::bootstrap;
//!
//! // File, then environment overrides such as GATEHOUSE_JWT__SECRET
//! let bc = bootstrap::load("configs/config.yaml".as_ref(), "gatehouse", &[])?;
//! let jwt_config = bc.jwt;
//! ```

pub mod backend;
pub mod bootstrap;
pub mod jwt;

// Re-export commonly used types at crate root
pub use backend::{BackendConfig, ConsulConfig, EtcdConfig, KubernetesConfig, NacosConfig};
pub use bootstrap::{AppConfig, Bootstrap, KeyValue, LogConfig, SourceFormat, TraceConfig};
pub use jwt::JwtConfig;
