//! Token algorithm pinning.
//!
//! A service signs and verifies with exactly one HMAC algorithm. The header
//! of every presented token is inspected before signature verification and
//! anything else, `none` included, is rejected as malformed. This closes
//! the algorithm substitution attacks that rely on a verifier trusting the
//! token's own `alg` field.

use std::{fmt, str::FromStr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gplot_common_storage::ConfigError;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Algorithms that are never accepted, whatever the configuration.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "None", "NONE"];

/// The HMAC algorithm a [`TokenService`](crate::TokenService) is pinned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    #[default]
    #[serde(rename = "HS256")]
    Hs256,
    /// HMAC with SHA-384.
    #[serde(rename = "HS384")]
    Hs384,
    /// HMAC with SHA-512.
    #[serde(rename = "HS512")]
    Hs512,
}

impl SigningAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [SigningAlgorithm; 3] = [Self::Hs256, Self::Hs384, Self::Hs512];

    /// The header `alg` value for this algorithm.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    /// The corresponding `jsonwebtoken` algorithm.
    #[must_use]
    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Hs256 => Algorithm::HS256,
            Self::Hs384 => Algorithm::HS384,
            Self::Hs512 => Algorithm::HS512,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|alg| alg.as_str() == s.trim()).ok_or_else(|| {
            ConfigError::Invalid {
                field: "algorithm",
                reason: format!("'{s}' is not one of HS256, HS384, HS512"),
            }
        })
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Checks that a token's header names the pinned algorithm.
///
/// Only the header is decoded; the signature is not checked here.
///
/// # Errors
///
/// Returns [`AuthError::Malformed`] if the token does not have three
/// segments, the header cannot be decoded, or its `alg` is forbidden or
/// differs from `pinned`.
///
/// # Examples
///
/// ```
/// use gplot_common_authn::validation::{SigningAlgorithm, validate_header_algorithm};
///
/// // {"alg":"none","typ":"JWT"}
/// let token = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.e30.";
/// assert!(validate_header_algorithm(token, SigningAlgorithm::Hs256).is_err());
/// ```
pub fn validate_header_algorithm(token: &str, pinned: SigningAlgorithm) -> Result<(), AuthError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::malformed("token must have 3 parts separated by dots"));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::malformed(format!("failed to decode token header: {e}")))?;
    let header: RawHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| AuthError::malformed(format!("failed to parse token header: {e}")))?;

    if FORBIDDEN_ALGORITHMS.contains(&header.alg.as_str()) {
        return Err(AuthError::malformed(format!(
            "algorithm '{}' is not allowed for security reasons",
            header.alg
        )));
    }
    if header.alg != pinned.as_str() {
        return Err(AuthError::malformed(format!(
            "algorithm '{}' does not match the pinned algorithm {pinned}",
            header.alg
        )));
    }
    Ok(())
}
