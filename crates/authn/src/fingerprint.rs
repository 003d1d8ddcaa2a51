//! Device fingerprints binding a token to the client context it was issued
//! to.
//!
//! A fingerprint is derived from transport metadata (user agent and client
//! address), which is unstable under NAT and mobile roaming. A mismatch
//! should prompt re-authentication rather than be treated as proof of
//! compromise.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Placeholder for a missing user agent or client address.
const UNKNOWN: &str = "unknown";

/// Hex-encoded SHA-256 digest identifying a client context.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives a fingerprint from a user agent and client address.
    ///
    /// Absent parts are replaced with `"unknown"`, so a client that sends
    /// no user agent still gets a stable fingerprint.
    ///
    /// ```
    /// use gplot_common_authn::Fingerprint;
    ///
    /// let a = Fingerprint::derive(Some("curl/8.5"), Some("203.0.113.7"));
    /// let b = Fingerprint::derive(Some("curl/8.5"), Some("203.0.113.7"));
    /// assert!(a.matches(&b));
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn derive(user_agent: Option<&str>, client_ip: Option<&str>) -> Self {
        let material =
            format!("{}:{}", user_agent.unwrap_or(UNKNOWN), client_ip.unwrap_or(UNKNOWN));
        Self(hex::encode(Sha256::digest(material.as_bytes())))
    }

    /// Wraps an already-computed fingerprint value.
    #[must_use]
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the fingerprint value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares two fingerprints in constant time.
    #[must_use]
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.matches_value(&other.0)
    }

    pub(crate) fn matches_value(&self, value: &str) -> bool {
        self.0.as_bytes().ct_eq(value.as_bytes()).into()
    }
}

// Only a prefix is shown so full fingerprints stay out of logs.
impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "Fingerprint({prefix}..)")
    }
}
