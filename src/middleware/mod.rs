//! Request processing middleware.
//!
//! - [`policy`]: route sets and the operation → access resolution
//! - [`gate`]: the authorization gate and its axum middleware
//! - [`auth`]: extractors for the claims the gate attached
//!
//! # Authorization Flow
//!
//! 1. The gate resolves the operation (matched route) against the [`policy::RoutePolicy`]
//! 2. Bypassed operations go straight to the handler
//! 3. Otherwise the `Authorization: Bearer <token>` header is validated and
//!    the role checked against the operation's minimum
//! 4. Validated claims are attached to the request for [`auth::CurrentClaims`]
//!
//! # Example
//!
//! ```ignore
//! use crate::middleware::auth::CurrentClaims;
//!
//! async fn get_profile(claims: CurrentClaims) -> impl IntoResponse {
//!     Json(json!({ "sub": claims.sub, "role": claims.role }))
//! }
//! ```

pub mod auth;
pub mod gate;
pub mod policy;
