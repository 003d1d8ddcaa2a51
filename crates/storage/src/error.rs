//! Storage error types and result alias.
//!
//! This module defines the errors shared by the artifact store, the rate
//! limiter, and the durable ledger files. Callers match on the variant to
//! decide how to surface a failure:
//!
//! - [`StorageError::NotFound`] - no ledger entry exists for the artifact id
//! - [`StorageError::PermissionDenied`] - the entry exists but belongs to another group
//! - [`StorageError::InvalidId`] - the presented id is not a well-formed artifact id
//! - [`StorageError::RateLimitExceeded`] - admission rejected, carries a retry hint
//! - [`StorageError::SizeLimitExceeded`] - payload or group exceeds configured limits
//! - [`StorageError::InvalidInput`] - empty payload or group, rejected before any I/O
//! - [`StorageError::Serialization`] - a ledger could not be encoded
//! - [`StorageError::Io`] - a filesystem operation failed
//! - [`StorageError::Internal`] - invariant violations and injected failures
//! - [`StorageError::Config`] - invalid configuration, fatal at startup
//!
//! # Example
//!
//! ```
//! use gplot_common_storage::{StorageError, StorageResult};
//!
//! fn lookup(id: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(id))
//! }
//! ```

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Configuration validation errors.
///
/// Raised when building configuration values. These are fatal at startup
/// and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required field was not provided or was empty.
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A numeric field is below its allowed minimum.
    #[error("Configuration field {field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Value that was provided.
        value: String,
    },

    /// A field has a value that is not accepted.
    #[error("Invalid configuration field {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// No ledger entry exists for the requested artifact.
    #[error("Artifact not found: {id}")]
    NotFound {
        /// The artifact id that was not found.
        id: String,
    },

    /// The artifact exists but is owned by a different group.
    ///
    /// Deliberately distinct from [`StorageError::NotFound`] so front ends
    /// can tell "never existed" from "exists but not yours".
    #[error("Permission denied: artifact {id} is not accessible to group '{group}'")]
    PermissionDenied {
        /// The artifact id that was requested.
        id: String,
        /// The group that made the request.
        group: String,
    },

    /// The presented artifact id is not well-formed.
    #[error("Invalid artifact id: {value}")]
    InvalidId {
        /// The rejected input.
        value: String,
    },

    /// The caller exceeded its admission budget.
    ///
    /// Transient: the request may be retried once `retry_after` has elapsed.
    #[error("Rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    RateLimitExceeded {
        /// Time until the next token becomes available.
        retry_after: Duration,
    },

    /// A payload or identifier exceeded its configured size limit.
    #[error("{kind} size {actual} exceeds limit of {limit}")]
    SizeLimitExceeded {
        /// What was measured (`"payload"`, `"group"`).
        kind: String,
        /// Observed size.
        actual: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A caller-supplied argument is unusable (e.g. an empty payload).
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// A filesystem operation failed.
    ///
    /// Surfaced as a generic storage failure; the caller decides whether to
    /// retry.
    #[error("I/O error: {message}")]
    Io {
        /// What the store was doing when the failure happened.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Creates a new `NotFound` error for the given artifact id.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(id: impl Into<String>, group: impl Into<String>) -> Self {
        Self::PermissionDenied { id: id.into(), group: group.into() }
    }

    /// Creates a new `InvalidId` error.
    #[must_use]
    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId { value: value.into() }
    }

    /// Creates a new `RateLimitExceeded` error.
    #[must_use]
    pub fn rate_limit_exceeded(retry_after: Duration) -> Self {
        Self::RateLimitExceeded { retry_after }
    }

    /// Creates a new `SizeLimitExceeded` error.
    #[must_use]
    pub fn size_limit_exceeded(kind: impl Into<String>, actual: usize, limit: usize) -> Self {
        Self::SizeLimitExceeded { kind: kind.into(), actual, limit }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Io` error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), source: None }
    }

    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` if retrying the operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. } | Self::Io { .. })
    }

    /// Returns the retry hint carried by a rate limit rejection.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// The retry hint in fractional seconds, for "too many requests"
    /// responses.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<f64> {
        self.retry_after().map(|d| d.as_secs_f64())
    }
}
