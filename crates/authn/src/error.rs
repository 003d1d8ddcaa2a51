//! Authentication error types.
//!
//! Every rejection of a presented token maps to exactly one
//! [`AuthErrorKind`], so front ends can tell a tampered token from an
//! expired, revoked, or stolen one without parsing messages.

use gplot_common_storage::{ConfigError, StorageError};
use thiserror::Error;

/// Authentication and token lifecycle errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The service is misconfigured (e.g. no signing secret).
    ///
    /// Fatal at startup, never retried.
    #[error("Authentication configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An issuance or administration request is unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The token cannot be decoded, its signature does not verify, or its
    /// header names an algorithm other than the pinned one.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// The token is not valid yet (`nbf` or `iat` in the future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// The token was minted for a different audience.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// The token id was revoked, or is not tracked while untracked ids are
    /// rejected.
    #[error("Token revoked: {id}")]
    TokenRevoked {
        /// The revoked token id.
        id: String,
    },

    /// The token is bound to a different client context.
    #[error("Token fingerprint mismatch")]
    FingerprintMismatch,

    /// The revocation ledger could not be read or written.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Revocation ledger error: {0}")]
    Storage(#[source] StorageError),
}

/// Coarse classification of an [`AuthError`].
///
/// `TokenExpired` and `TokenNotYetValid` both classify as
/// [`AuthErrorKind::Expired`]: the token is outside its validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuthErrorKind {
    /// Misconfiguration.
    Config,
    /// Unusable request.
    InvalidArgument,
    /// Undecodable or badly signed token.
    Malformed,
    /// Outside the validity window.
    Expired,
    /// Audience mismatch.
    Audience,
    /// Revoked or untracked id.
    Revoked,
    /// Client context mismatch.
    Fingerprint,
    /// Ledger persistence failure.
    Storage,
}

impl AuthError {
    /// Creates a [`AuthError::Malformed`] error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates an [`AuthError::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an [`AuthError::InvalidAudience`] error.
    pub fn invalid_audience(message: impl Into<String>) -> Self {
        Self::InvalidAudience(message.into())
    }

    /// Creates a [`AuthError::TokenRevoked`] error.
    pub fn token_revoked(id: impl Into<String>) -> Self {
        Self::TokenRevoked { id: id.into() }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Config(_) => AuthErrorKind::Config,
            Self::InvalidArgument(_) => AuthErrorKind::InvalidArgument,
            Self::Malformed(_) => AuthErrorKind::Malformed,
            Self::TokenExpired | Self::TokenNotYetValid => AuthErrorKind::Expired,
            Self::InvalidAudience(_) => AuthErrorKind::Audience,
            Self::TokenRevoked { .. } => AuthErrorKind::Revoked,
            Self::FingerprintMismatch => AuthErrorKind::Fingerprint,
            Self::Storage(_) => AuthErrorKind::Storage,
        }
    }

    /// Returns `true` if the presented credential was rejected, as opposed
    /// to the service failing.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            AuthErrorKind::Malformed
                | AuthErrorKind::Expired
                | AuthErrorKind::Audience
                | AuthErrorKind::Revoked
                | AuthErrorKind::Fingerprint
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::malformed("invalid token structure"),
            ErrorKind::InvalidSignature => AuthError::malformed("invalid signature"),
            ErrorKind::InvalidAlgorithm => AuthError::malformed("algorithm not accepted"),
            ErrorKind::Base64(_) => AuthError::malformed("invalid base64 encoding"),
            ErrorKind::Json(e) => AuthError::malformed(format!("invalid claims: {e}")),
            ErrorKind::Utf8(_) => AuthError::malformed("invalid UTF-8 in token"),
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAudience => AuthError::invalid_audience("audience validation failed"),
            _ => AuthError::malformed(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(config) => AuthError::Config(config),
            other => AuthError::Storage(other),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
