//! Payload and group size validation for the artifact store.
//!
//! Limits are checked before any payload or ledger I/O so oversized or
//! empty requests never touch the disk.
//!
//! # Defaults
//!
//! | Limit | Default |
//! |-------|---------|
//! | `max_artifact_size` | 33 554 432 bytes (32 MiB) |
//! | `max_group_length` | 128 bytes |

use crate::{ConfigError, StorageError};

/// Default maximum artifact payload size in bytes (32 MiB).
pub const DEFAULT_MAX_ARTIFACT_SIZE: usize = 32 * 1024 * 1024;

/// Default maximum group identifier length in bytes.
pub const DEFAULT_MAX_GROUP_LENGTH: usize = 128;

/// Configurable size limits for artifact payloads and group identifiers.
///
/// Both limits must be at least 1.
///
/// # Example
///
/// ```
/// use gplot_common_storage::SizeLimits;
///
/// let limits = SizeLimits::new(1024 * 1024, 64).unwrap();
/// assert_eq!(limits.max_group_length(), 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    max_artifact_size: usize,
    max_group_length: usize,
}

impl SizeLimits {
    /// Creates size limits with the given bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if either limit is zero.
    pub fn new(max_artifact_size: usize, max_group_length: usize) -> Result<Self, ConfigError> {
        if max_artifact_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_artifact_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if max_group_length == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_group_length",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { max_artifact_size, max_group_length })
    }

    /// Returns the maximum payload size in bytes.
    #[must_use]
    pub fn max_artifact_size(&self) -> usize {
        self.max_artifact_size
    }

    /// Returns the maximum group length in bytes.
    #[must_use]
    pub fn max_group_length(&self) -> usize {
        self.max_group_length
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            max_group_length: DEFAULT_MAX_GROUP_LENGTH,
        }
    }
}

/// Validates a group identifier: non-empty and within the length limit.
pub fn validate_group(group: &str, limits: &SizeLimits) -> Result<(), StorageError> {
    if group.is_empty() {
        return Err(StorageError::invalid_input("group must not be empty"));
    }
    if group.len() > limits.max_group_length {
        return Err(StorageError::size_limit_exceeded(
            "group",
            group.len(),
            limits.max_group_length,
        ));
    }
    Ok(())
}

/// Validates an artifact about to be stored.
///
/// Returns `Err(StorageError::InvalidInput)` for an empty payload or group
/// and `Err(StorageError::SizeLimitExceeded)` naming the violated limit.
pub fn validate_artifact(
    payload: &[u8],
    group: &str,
    limits: &SizeLimits,
) -> Result<(), StorageError> {
    validate_group(group, limits)?;
    if payload.is_empty() {
        return Err(StorageError::invalid_input("artifact payload must not be empty"));
    }
    if payload.len() > limits.max_artifact_size {
        return Err(StorageError::size_limit_exceeded(
            "payload",
            payload.len(),
            limits.max_artifact_size,
        ));
    }
    Ok(())
}
