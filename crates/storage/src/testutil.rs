//! Shared test utilities for artifact storage testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! gplot-common-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger},
    error::{StorageError, StorageResult},
};

/// Creates a payload of `size` bytes with a repeating, position-dependent
/// pattern, so truncated or shifted reads are caught by equality checks.
#[must_use]
pub fn make_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Creates a payload tagged with a task id and sequence number.
///
/// Produces values like `"task3-art042"`. Useful in concurrent tests to
/// tell which task wrote which artifact.
#[must_use]
pub fn make_tagged_payload(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-art{seq:03}").into_bytes()
}

/// Audit logger that keeps events in memory for assertions.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty logger behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Returns the events recorded for `action`.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.action == action).cloned().collect()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Assert that a [`StorageResult`] is an error of the given
/// [`StorageError`] variant.
///
/// ```ignore
/// assert_storage_error!(limiter.check("client", "render"), RateLimitExceeded);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        match $result {
            Err($crate::error::StorageError::$variant { .. }) => {},
            other => panic!(
                concat!("expected StorageError::", stringify!($variant), ", got: {:?}"),
                other
            ),
        }
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// ```ignore
/// assert_not_found!(store.get(&id, "finance").await);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        $crate::assert_storage_error!($result, NotFound)
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::PermissionDenied`].
///
/// ```ignore
/// assert_permission_denied!(store.get(&id, "ops").await);
/// ```
#[macro_export]
macro_rules! assert_permission_denied {
    ($result:expr) => {
        $crate::assert_storage_error!($result, PermissionDenied)
    };
}

/// Returns `true` if the result is a `NotFound` error.
pub fn is_not_found<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotFound { .. }))
}

/// Returns `true` if the result is a `PermissionDenied` error.
pub fn is_permission_denied<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::PermissionDenied { .. }))
}
