//! # Gatehouse Auth
//!
//! Bearer token handling shared by every Gatehouse service.
//!
//! - [`claims`]: the generic [`Claims<T>`] record and the [`AuthClaims`] capability
//! - [`jwt`]: [`TokenCodec`], issuing and validating signed, time-bounded tokens
//! - [`context`]: attaching validated claims to a request's extensions
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_auth::{Claims, TokenCodec, context};
//!
//! // `bc` is the service's loaded `gatehouse_config::Bootstrap`
//! let codec = TokenCodec::<Claims>::new(&bc.jwt);
//! let token = codec.issue(&codec.claims(42, "alice", "admin", Default::default()))?;
//!
//! let claims = codec.validate(&token)?;
//! context::with_claims(req.extensions_mut(), claims);
//! ```

pub mod claims;
pub mod context;
pub mod jwt;

// Re-export commonly used types at crate root
pub use claims::{AuthClaims, Claims, NoExtra};
pub use context::{claims_from, shared_claims, with_claims};
pub use jwt::TokenCodec;
