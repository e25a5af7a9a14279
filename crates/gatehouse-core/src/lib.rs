//! # Gatehouse Core
//!
//! Foundational types shared by every Gatehouse crate:
//!
//! - [`errors`]: the typed authorization error surface with HTTP response conversion
//! - [`roles`]: the ordered role hierarchy used for authorization comparisons
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_core::{AuthError, MinimumRole, Role};
//!
//! // A "user" token calling an admin-only route
//! let result = gatehouse_core::roles::check("user", MinimumRole::AtLeast(Role::Admin));
//! assert_eq!(result, Err(AuthError::InsufficientRole));
//! ```

pub mod errors;
pub mod roles;

// Re-export commonly used types at crate root
pub use errors::AuthError;
pub use roles::{MinimumRole, Role};
