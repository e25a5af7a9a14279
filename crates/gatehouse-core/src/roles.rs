//! Role hierarchy.
//!
//! Roles form a total order by assigned rank (higher number = more
//! privileges), not by name:
//!
//! | Role       | Rank |
//! |------------|------|
//! | `guest`    | 1    |
//! | `user`     | 2    |
//! | `operator` | 3    |
//! | `admin`    | 4    |
//!
//! `admin` outranks `operator`. Rank `0` is reserved for
//! [`MinimumRole::Public`], the "no requirement" sentinel used to mark public
//! routes: it admits every caller, including one without a token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

/// Rank of the "no requirement" sentinel.
pub const PUBLIC_RANK: u8 = 0;

/// A named role in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Operator,
    Admin,
}

impl Role {
    /// Every role, lowest rank first.
    pub const ALL: [Role; 4] = [Role::Guest, Role::User, Role::Operator, Role::Admin];

    pub fn rank(self) -> u8 {
        match self {
            Role::Guest => 1,
            Role::User => 2,
            Role::Operator => 3,
            Role::Admin => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }

    /// `true` when `self` ranks at or above `minimum`.
    pub fn satisfies(self, minimum: Role) -> bool {
        self.rank() >= minimum.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    /// Case-sensitive; anything outside the hierarchy is [`AuthError::UnknownRole`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            _ => Err(AuthError::UnknownRole),
        }
    }
}

/// Minimum requirement a route places on the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimumRole {
    /// No requirement: anonymous callers are admitted.
    Public,
    /// The caller must hold this role or a higher-ranked one.
    AtLeast(Role),
}

impl MinimumRole {
    pub fn rank(self) -> u8 {
        match self {
            MinimumRole::Public => PUBLIC_RANK,
            MinimumRole::AtLeast(role) => role.rank(),
        }
    }

    pub fn is_public(self) -> bool {
        matches!(self, MinimumRole::Public)
    }
}

impl From<Role> for MinimumRole {
    fn from(role: Role) -> Self {
        MinimumRole::AtLeast(role)
    }
}

/// Rank of a role name, or `None` when the name is not in the hierarchy.
pub fn rank(role: &str) -> Option<u8> {
    role.parse::<Role>().ok().map(Role::rank)
}

/// Checks a role name taken from a token against a route minimum.
///
/// [`MinimumRole::Public`] admits any role string, recognized or not. For any
/// other minimum an unrecognized role fails closed with
/// [`AuthError::UnknownRole`], and a lower rank yields
/// [`AuthError::InsufficientRole`].
pub fn check(actual: &str, minimum: MinimumRole) -> Result<(), AuthError> {
    let MinimumRole::AtLeast(required) = minimum else {
        return Ok(());
    };

    let role: Role = actual.parse()?;
    if !role.satisfies(required) {
        return Err(AuthError::InsufficientRole);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_values() {
        assert_eq!(rank("guest"), Some(1));
        assert_eq!(rank("user"), Some(2));
        assert_eq!(rank("operator"), Some(3));
        assert_eq!(rank("admin"), Some(4));
        assert_eq!(rank("root"), None);
    }

    #[test]
    fn test_admin_outranks_operator() {
        assert!(Role::Admin.satisfies(Role::Operator));
        assert!(!Role::Operator.satisfies(Role::Admin));
    }

    #[test]
    fn test_satisfies_matches_rank_order() {
        for a in Role::ALL {
            for b in Role::ALL {
                assert_eq!(a.satisfies(b), a.rank() >= b.rank(), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_satisfies_is_reflexive() {
        for role in Role::ALL {
            assert!(role.satisfies(role));
        }
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!("Admin".parse::<Role>(), Err(AuthError::UnknownRole));
        assert_eq!(" admin".parse::<Role>(), Err(AuthError::UnknownRole));
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn test_check_public_admits_anything() {
        assert!(check("admin", MinimumRole::Public).is_ok());
        assert!(check("nonsense", MinimumRole::Public).is_ok());
        assert!(check("", MinimumRole::Public).is_ok());
    }

    #[test]
    fn test_check_unknown_role_fails_closed() {
        assert_eq!(
            check("superuser", MinimumRole::AtLeast(Role::Guest)),
            Err(AuthError::UnknownRole)
        );
    }

    #[test]
    fn test_check_insufficient_role() {
        assert_eq!(
            check("user", MinimumRole::AtLeast(Role::Admin)),
            Err(AuthError::InsufficientRole)
        );
        assert_eq!(
            check("operator", MinimumRole::AtLeast(Role::Admin)),
            Err(AuthError::InsufficientRole)
        );
    }

    #[test]
    fn test_check_sufficient_role() {
        assert!(check("admin", MinimumRole::AtLeast(Role::User)).is_ok());
        assert!(check("user", MinimumRole::AtLeast(Role::User)).is_ok());
    }

    #[test]
    fn test_public_rank_is_below_every_role() {
        assert_eq!(MinimumRole::Public.rank(), PUBLIC_RANK);
        for role in Role::ALL {
            assert!(MinimumRole::from(role).rank() > PUBLIC_RANK);
        }
    }
}
