//! Per-request claims carrier.
//!
//! The request's [`Extensions`] map is the execution context: it travels
//! with the request through every layer down to the handler. Claims are
//! stored under a private wrapper keyed by the claims type, so services
//! carrying different claim shapes never observe each other's values.
//!
//! Attached claims are immutable. Cloning the extensions (a descendant
//! context) shares the same value; a context the claims were never attached
//! to yields `None`.

use std::sync::Arc;

use axum::http::Extensions;

#[derive(Debug)]
struct Authenticated<C>(Arc<C>);

// Manual impl: deriving would require `C: Clone`.
impl<C> Clone for Authenticated<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Attaches `claims` to the context, replacing any claims of the same type.
pub fn with_claims<C>(extensions: &mut Extensions, claims: C)
where
    C: Send + Sync + 'static,
{
    extensions.insert(Authenticated(Arc::new(claims)));
}

/// Claims previously attached with [`with_claims`].
pub fn claims_from<C>(extensions: &Extensions) -> Option<&C>
where
    C: Send + Sync + 'static,
{
    extensions
        .get::<Authenticated<C>>()
        .map(|authenticated| authenticated.0.as_ref())
}

/// Shared handle to the attached claims, for work that outlives the borrow.
pub fn shared_claims<C>(extensions: &Extensions) -> Option<Arc<C>>
where
    C: Send + Sync + 'static,
{
    extensions
        .get::<Authenticated<C>>()
        .map(|authenticated| Arc::clone(&authenticated.0))
}
