use serde::{Deserialize, Serialize};

/// Default access token lifetime: 1 hour.
pub const DEFAULT_ACCESS_EXPIRY: i64 = 3600;

const DEFAULT_SECRET: &str = "your-secret-key-change-in-production";

/// Signing and validation settings for bearer tokens.
///
/// `leeway_secs` is the only clock-skew allowance applied during
/// validation; it defaults to zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry: i64,
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEFAULT_SECRET.to_string(),
            issuer: "gatehouse".to_string(),
            audience: String::new(),
            access_token_expiry: DEFAULT_ACCESS_EXPIRY,
            leeway_secs: 0,
        }
    }
}

impl JwtConfig {
    /// Token lifetime in seconds; non-positive values fall back to the default.
    pub fn expiry(&self) -> i64 {
        if self.access_token_expiry > 0 {
            self.access_token_expiry
        } else {
            DEFAULT_ACCESS_EXPIRY
        }
    }

    /// `true` while the placeholder secret is still in use.
    pub fn uses_default_secret(&self) -> bool {
        self.secret == DEFAULT_SECRET
    }
}
