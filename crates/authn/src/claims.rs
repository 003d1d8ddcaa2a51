//! Token claims.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Payload of a signed access token.
///
/// ```json
/// {
///   "group": "finance",
///   "iat": 1700000000,
///   "exp": 1700003600,
///   "nbf": 1700000000,
///   "aud": "gofr-plot",
///   "jti": "0f1d2c3b-...",
///   "fingerprint": "9f86d081884c7d65..."
/// }
/// ```
///
/// Only `group`, `iat` and `exp` are required. A token without one of the
/// optional claims skips the corresponding check, so tokens minted before a
/// claim was introduced keep verifying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Tenant group. Exact, case-sensitive authorization key.
    pub group: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Not before (seconds since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Audience the token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Token id used for revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Hex digest of the client context the token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl TokenClaims {
    /// Checks the claims that must hold for any well-formed token,
    /// independent of the current time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] if the group is empty or the token
    /// expires no later than it was issued.
    pub fn validate_shape(&self) -> Result<(), AuthError> {
        if self.group.is_empty() {
            return Err(AuthError::malformed("group claim is empty"));
        }
        if self.exp <= self.iat {
            return Err(AuthError::malformed("exp claim is not after iat"));
        }
        if self.jti.as_deref() == Some("") {
            return Err(AuthError::malformed("jti claim is empty"));
        }
        Ok(())
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.exp)
    }

    /// Issue time as a timestamp.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.iat)
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}
