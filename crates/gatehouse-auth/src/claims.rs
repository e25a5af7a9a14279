//! Claim structures carried by bearer tokens.
//!
//! [`Claims<T>`] is the standard shape: the registered token metadata plus
//! the caller's identity and role, extended with any service-specific fields
//! in `T`. Services that need nothing more use [`NoExtra`].
//!
//! The codec itself only relies on the [`AuthClaims`] capability, so a
//! service can also bring an entirely different claims type.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// What the token codec and the authorization gate need from a claims value.
pub trait AuthClaims: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn subject(&self) -> u64;
    fn role(&self) -> &str;
    fn issued_at(&self) -> i64;
    fn expires_at(&self) -> i64;
}

/// Access token claims.
///
/// # Fields
///
/// - `sub`: opaque numeric subject (user) ID
/// - `name`: display name
/// - `role`: role tag, one of the role hierarchy names
/// - `iss` / `aud`: issuer and audience from the signing configuration
/// - `iat` / `exp`: issued-at and expiry, seconds since the epoch
/// - `ext`: service-specific fields, flattened into the same JSON object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims<T = NoExtra> {
    pub sub: u64,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(flatten)]
    pub ext: T,
}

/// Empty claims extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoExtra {}

impl<T> AuthClaims for Claims<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn subject(&self) -> u64 {
        self.sub
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn issued_at(&self) -> i64 {
        self.iat
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TenantExt {
        tenant_id: String,
    }

    #[test]
    fn test_extension_is_flattened() {
        let claims = Claims {
            sub: 7,
            name: "alice".to_string(),
            role: "user".to_string(),
            iss: "svc".to_string(),
            aud: String::new(),
            iat: 100,
            exp: 200,
            ext: TenantExt {
                tenant_id: "acme".to_string(),
            },
        };

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["tenant_id"], "acme");
        assert_eq!(value["sub"], 7);
        assert!(value.get("aud").is_none());
        assert!(value.get("ext").is_none());
    }

    #[test]
    fn test_no_extra_ignores_unknown_fields() {
        let json = r#"{"sub":1,"name":"bob","role":"admin","iat":1,"exp":2,"tenant_id":"x"}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.role(), "admin");
        assert_eq!(claims.subject(), 1);
        assert_eq!(claims.ext, NoExtra {});
    }

    #[test]
    fn test_missing_extension_field_is_rejected() {
        let json = r#"{"sub":1,"name":"bob","role":"admin","iat":1,"exp":2}"#;
        let result: Result<Claims<TenantExt>, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
