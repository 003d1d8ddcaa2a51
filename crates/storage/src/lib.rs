//! Trust and persistence primitives shared by the gofr-plot front ends.
//!
//! This crate holds everything below token authentication:
//!
//! - [`ArtifactStore`]: group-isolated storage for rendered charts, with a
//!   crash-safe metadata ledger and age-based purge
//! - [`RateLimiter`]: token-bucket admission control per (client, endpoint)
//! - [`ledger`]: whole-file JSON ledgers with atomic replace and corruption
//!   recovery, also used by the revocation ledger in `gplot-common-authn`
//! - [`clock`]: injectable time source
//! - [`audit`]: security audit trail
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Front ends (HTTP, MCP bridge)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │   gplot-common-authn: TokenService, RevocationLedger        │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │     RateLimiter      │           ArtifactStore              │
//! │    (in memory)       │   MetadataLedger │ BlobStore         │
//! ├──────────────────────┴──────────────────────────────────────┤
//! │          LedgerFile (atomic JSON), Clock, AuditLogger       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use gplot_common_storage::{
//!     ArtifactFormat, ArtifactStore, RateLimiter, RateLimiterConfig, StorageConfig,
//! };
//! use gplot_common_storage::clock::SystemClock;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dir = std::env::temp_dir().join(format!("gplot-doc-{}", std::process::id()));
//!     let config = StorageConfig::builder().data_dir(&dir).build()?;
//!     let clock = Arc::new(SystemClock);
//!
//!     let limiter = RateLimiter::new(RateLimiterConfig::default(), clock.clone());
//!     let store = ArtifactStore::open(&config, clock).await?;
//!
//!     limiter.check("10.0.0.1", "render")?;
//!     let id = store.store(b"<svg/>".to_vec(), "finance", ArtifactFormat::Svg).await?;
//!     let artifact = store.get(&id, "finance").await?;
//!     assert_eq!(artifact.metadata.format, ArtifactFormat::Svg);
//!
//!     store.purge(Duration::ZERO).await?;
//!     std::fs::remove_dir_all(&dir)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Callers tell
//! [`StorageError::NotFound`] from [`StorageError::PermissionDenied`] and map
//! [`StorageError::RateLimitExceeded`] to "too many requests" using its
//! retry hint.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (payload generators, an in-memory audit logger,
//!   assertion macros).
//! - **`failpoints`**: Compiles in the `fail` points used by crash-ordering tests.

#![deny(unsafe_code)]

pub mod artifact;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod rate_limiter;
pub mod size_limits;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use artifact::{
    Artifact, ArtifactListing, ArtifactMetadata, ArtifactStore, BlobStore, FileBlobStore,
    MemoryBlobStore, PurgeFilter,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, RateLimiterConfig, StorageConfig};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use ledger::{FileStamp, LedgerFile, LedgerLock, LoadStatus, STALE_TEMP_GRACE};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use size_limits::{DEFAULT_MAX_ARTIFACT_SIZE, DEFAULT_MAX_GROUP_LENGTH, SizeLimits};
pub use types::{ArtifactFormat, ArtifactId};
