//! Bearer token codec.
//!
//! [`TokenCodec`] issues and validates HS256-signed tokens for any claims
//! type implementing [`AuthClaims`]. It holds only the derived signing keys
//! and the issuer/audience/expiry settings, so one instance can be shared
//! behind an `Arc` by every in-flight request.
//!
//! # Validation order
//!
//! 1. empty token → [`AuthError::MissingToken`]
//! 2. undecodable header, wrong algorithm, bad signature, issuer or audience
//!    mismatch → [`AuthError::InvalidToken`]
//! 3. payload not deserializable into `C` → [`AuthError::InvalidClaimsType`]
//! 4. `exp <= iat` → [`AuthError::InvalidClaimsType`]
//! 5. `now < iat - leeway` → [`AuthError::InvalidToken`]
//! 6. `now >= exp + leeway` → [`AuthError::TokenExpired`]
//!
//! Both bounds are evaluated against the clock at validation time. The only skew
//! allowance is `JwtConfig::leeway_secs`.
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_auth::{Claims, TokenCodec};
//! use gatehouse_config::bootstrap;
//!
//! let bc = bootstrap::load("configs/config.yaml".as_ref(), "gatehouse", &[])?;
//! let codec = TokenCodec::<Claims>::new(&bc.jwt);
//!
//! let claims = codec.claims(42, "alice", "user", Default::default());
//! let token = codec.issue(&claims)?;
//!
//! let verified = codec.validate(&token)?;
//! assert_eq!(verified.role, "user");
//! ```

use std::fmt;
use std::marker::PhantomData;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use tracing::{debug, warn};

use gatehouse_config::JwtConfig;
use gatehouse_core::{AuthError, Role};

use crate::claims::{AuthClaims, Claims};

const ALGORITHM: Algorithm = Algorithm::HS256;

pub struct TokenCodec<C> {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: i64,
    leeway: u64,
    _claims: PhantomData<fn() -> C>,
}

impl<C> fmt::Debug for TokenCodec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiry", &self.expiry)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl<C: AuthClaims> TokenCodec<C> {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            expiry: config.expiry(),
            leeway: config.leeway_secs,
            _claims: PhantomData,
        }
    }

    /// Signs `claims` into a compact token string.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRole`] if the role is not in the hierarchy
    /// - [`AuthError::InvalidClaimsType`] if `exp <= iat` or the claims
    ///   cannot be serialized
    pub fn issue(&self, claims: &C) -> Result<String, AuthError> {
        claims
            .role()
            .parse::<Role>()
            .map_err(|_| AuthError::InvalidRole)?;

        if claims.expires_at() <= claims.issued_at() {
            return Err(AuthError::InvalidClaimsType);
        }

        encode(&Header::new(ALGORITHM), claims, &self.encoding).map_err(|e| {
            warn!(error = %e, "Failed to encode token");
            AuthError::InvalidClaimsType
        })
    }

    /// Validates `token` against the current wall-clock time.
    pub fn validate(&self, token: &str) -> Result<C, AuthError> {
        self.validate_at(token, Utc::now().timestamp())
    }

    /// Validates `token` as of `now` (seconds since the epoch).
    pub fn validate_at(&self, token: &str, now: i64) -> Result<C, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        // Header problems would otherwise surface as JSON errors, which are
        // reserved for the claims payload below.
        decode_header(token).map_err(|e| {
            debug!(error = %e, "Rejected token with undecodable header");
            AuthError::InvalidToken
        })?;

        let claims = decode::<C>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Rejected token");
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    ErrorKind::Json(_) => AuthError::InvalidClaimsType,
                    ErrorKind::MissingRequiredClaim(claim) if claim == "exp" => {
                        AuthError::InvalidClaimsType
                    }
                    _ => AuthError::InvalidToken,
                }
            })?;

        if claims.expires_at() <= claims.issued_at() {
            return Err(AuthError::InvalidClaimsType);
        }

        // Valid within [iat - leeway, exp + leeway).
        let leeway = i64::try_from(self.leeway).unwrap_or(i64::MAX);
        if now < claims.issued_at().saturating_sub(leeway) {
            debug!(iat = claims.issued_at(), now, "Rejected token issued in the future");
            return Err(AuthError::InvalidToken);
        }
        if now >= claims.expires_at().saturating_add(leeway) {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked against the caller's clock in `validate_at`.
        validation.validate_exp = false;
        validation.leeway = self.leeway;
        if !self.issuer.is_empty() {
            validation.set_issuer(&[&self.issuer]);
        }
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&self.audience]);
        }
        validation
    }
}

impl<T> TokenCodec<Claims<T>>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Builds claims stamped with this codec's issuer, audience and expiry,
    /// issued now.
    pub fn claims(&self, sub: u64, name: &str, role: &str, ext: T) -> Claims<T> {
        self.claims_at(sub, name, role, ext, Utc::now().timestamp())
    }

    /// Builds claims issued at `now`.
    pub fn claims_at(&self, sub: u64, name: &str, role: &str, ext: T, now: i64) -> Claims<T> {
        Claims {
            sub,
            name: name.to_string(),
            role: role.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.expiry,
            ext,
        }
    }
}
