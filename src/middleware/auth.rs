use std::convert::Infallible;
use std::ops::Deref;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use gatehouse_auth::{Claims, shared_claims};
use gatehouse_core::AuthError;

/// Extractor for the claims the gate attached to this request.
///
/// Rejects with `MissingToken` when the request was not authenticated, e.g.
/// an anonymous call to a public route. Use `Option<CurrentClaims>` where a
/// token is optional.
#[derive(Debug)]
pub struct CurrentClaims<C = Claims>(pub Arc<C>);

impl<C> Clone for CurrentClaims<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C> Deref for CurrentClaims<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.0
    }
}

impl<S, C> FromRequestParts<S> for CurrentClaims<C>
where
    S: Send + Sync,
    C: Send + Sync + 'static,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        shared_claims::<C>(&parts.extensions)
            .map(CurrentClaims)
            .ok_or(AuthError::MissingToken)
    }
}

impl<S, C> OptionalFromRequestParts<S> for CurrentClaims<C>
where
    S: Send + Sync,
    C: Send + Sync + 'static,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(shared_claims::<C>(&parts.extensions).map(CurrentClaims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use gatehouse_auth::{NoExtra, with_claims};

    fn parts_with(claims: Option<Claims>) -> Parts {
        let (mut parts, _) = Request::new(()).into_parts();
        if let Some(claims) = claims {
            with_claims(&mut parts.extensions, claims);
        }
        parts
    }

    fn sample() -> Claims {
        Claims {
            sub: 3,
            name: "carol".to_string(),
            role: "operator".to_string(),
            iss: String::new(),
            aud: String::new(),
            iat: 0,
            exp: 60,
            ext: NoExtra {},
        }
    }

    #[tokio::test]
    async fn test_extracts_attached_claims() {
        let mut parts = parts_with(Some(sample()));
        let claims = <CurrentClaims as FromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(claims.sub, 3);
        assert_eq!(claims.role, "operator");
    }

    #[tokio::test]
    async fn test_missing_claims_reject() {
        let mut parts = parts_with(None);
        let err = <CurrentClaims as FromRequestParts<()>>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingToken);
    }

    #[tokio::test]
    async fn test_optional_extraction() {
        let mut anonymous = parts_with(None);
        let none = <CurrentClaims as OptionalFromRequestParts<()>>::from_request_parts(&mut anonymous, &())
            .await
            .unwrap();
        assert!(none.is_none());

        let mut authenticated = parts_with(Some(sample()));
        let some = <CurrentClaims as OptionalFromRequestParts<()>>::from_request_parts(&mut authenticated, &())
            .await
            .unwrap();
        assert_eq!(some.map(|c| c.sub), Some(3));
    }
}
