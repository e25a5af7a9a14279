//! # Gatehouse
//!
//! An HTTP service skeleton whose every request passes a role-based
//! authorization gate, with pluggable service registry, discovery and
//! config-center backends.
//!
//! ## Overview
//!
//! - **Authentication**: HS256 bearer tokens carrying subject, name and role
//! - **Authorization**: a [`RoutePolicy`](middleware::policy::RoutePolicy)
//!   maps each route to bypass, public, or a minimum role
//! - **Registry**: Consul, Etcd, Nacos or Kubernetes, chosen by configuration
//! - **Configuration**: file, then config center, then environment
//!
//! ## Architecture
//!
//! ```text
//! crates/
//! ├── gatehouse-core/      # Role hierarchy and AuthError
//! ├── gatehouse-config/    # JwtConfig, BackendConfig, Bootstrap loader
//! ├── gatehouse-auth/      # Claims, TokenCodec, claims carrier
//! └── gatehouse-registry/  # Discovery / Registrar / ConfigSource backends
//! src/
//! ├── middleware/          # Route policy, gate, claims extractors
//! ├── bootstrap.rs         # Layered config, identity, registration
//! ├── server.rs            # `serve` command
//! └── router.rs            # Routes and their access policy
//! ```
//!
//! ## Role Hierarchy
//!
//! ```text
//! admin > operator > user > guest
//! ```
//!
//! A role satisfies every requirement at or below its own rank. Public
//! routes admit anonymous callers, but a token that is sent must be valid.
//!
//! ## Quick Start
//!
//! ```bash
//! GATEHOUSE_JWT__SECRET=change-me cargo run -- issue-token --sub 1 --name alice --role admin
//! GATEHOUSE_JWT__SECRET=change-me cargo run -- serve --config configs/config.yaml
//! ```
//!
//! Environment overrides use the service name as prefix, e.g.
//! `GATEHOUSE_JWT__SECRET` for a service named `gatehouse`.

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod server;
pub mod state;

// Re-export workspace crates for convenience
pub use gatehouse_auth;
pub use gatehouse_config;
pub use gatehouse_core;
pub use gatehouse_registry;
