//! Route policy: which operations need which credentials.
//!
//! A [`RoutePolicy`] maps every operation identifier to exactly one
//! [`Access`]. The outcome does not depend on the order rules were added:
//!
//! 1. an operation matched by any bypass set skips the gate entirely;
//! 2. otherwise the strictest matching role rule applies;
//! 3. otherwise the fallback (default [`Access::Public`]).
//!
//! ```ignore
//! let public = RouteSet::prefix(["/v1/public/"]);
//! let user = RouteSet::exact(["/v1/users/me"]);
//!
//! let policy = RoutePolicy::new()
//!     .bypass(RouteSet::exact(["/healthz"]))
//!     .require(Role::User, user.clone())
//!     .require_except(Role::Admin, public.union(&user));
//! ```

use std::collections::BTreeSet;

use gatehouse_core::Role;

/// A set of operation identifiers, given as exact names and/or prefixes.
///
/// Matching is case-sensitive with no normalization: `/v1/Users` does not
/// match `/v1/users`, and a prefix matches by plain `starts_with`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSet {
    exact: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl RouteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().with_exact(operations)
    }

    pub fn prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().with_prefix(prefixes)
    }

    pub fn with_exact<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exact.extend(operations.into_iter().map(Into::into));
        self
    }

    pub fn with_prefix<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Set containing every operation matched by either input.
    pub fn union(&self, other: &RouteSet) -> RouteSet {
        RouteSet {
            exact: self.exact.union(&other.exact).cloned().collect(),
            prefixes: self.prefixes.union(&other.prefixes).cloned().collect(),
        }
    }

    pub fn merge<'a, I>(sets: I) -> RouteSet
    where
        I: IntoIterator<Item = &'a RouteSet>,
    {
        sets.into_iter()
            .fold(RouteSet::new(), |acc, set| acc.union(set))
    }

    pub fn matches(&self, operation: &str) -> bool {
        self.exact.contains(operation)
            || self
                .prefixes
                .iter()
                .any(|prefix| operation.starts_with(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

/// What the gate requires for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Skip the gate; the header is never read.
    Bypass,
    /// A token is optional, but validated when present.
    Public,
    /// A valid token whose role ranks at least this high.
    AtLeast(Role),
}

#[derive(Debug, Clone)]
enum Scope {
    Within(RouteSet),
    Outside(RouteSet),
}

impl Scope {
    fn covers(&self, operation: &str) -> bool {
        match self {
            Scope::Within(set) => set.matches(operation),
            Scope::Outside(set) => !set.matches(operation),
        }
    }
}

#[derive(Debug, Clone)]
struct RoleRule {
    role: Role,
    scope: Scope,
}

#[derive(Debug, Clone)]
pub struct RoutePolicy {
    bypass: RouteSet,
    rules: Vec<RoleRule>,
    fallback: Access,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutePolicy {
    /// Empty policy: everything is [`Access::Public`].
    pub fn new() -> Self {
        Self {
            bypass: RouteSet::new(),
            rules: Vec::new(),
            fallback: Access::Public,
        }
    }

    /// Operations in `set` skip the gate.
    pub fn bypass(mut self, set: RouteSet) -> Self {
        self.bypass = self.bypass.union(&set);
        self
    }

    /// Operations in `set` need at least `role`.
    pub fn require(mut self, role: Role, set: RouteSet) -> Self {
        self.rules.push(RoleRule {
            role,
            scope: Scope::Within(set),
        });
        self
    }

    /// Every operation *not* in `excluded` needs at least `role`.
    pub fn require_except(mut self, role: Role, excluded: RouteSet) -> Self {
        self.rules.push(RoleRule {
            role,
            scope: Scope::Outside(excluded),
        });
        self
    }

    /// Access for operations no rule covers.
    pub fn fallback(mut self, access: Access) -> Self {
        self.fallback = access;
        self
    }

    pub fn resolve(&self, operation: &str) -> Access {
        if self.bypass.matches(operation) {
            return Access::Bypass;
        }

        self.rules
            .iter()
            .filter(|rule| rule.scope.covers(operation))
            .map(|rule| rule.role)
            .max_by_key(|role| role.rank())
            .map(Access::AtLeast)
            .unwrap_or(self.fallback)
    }
}
