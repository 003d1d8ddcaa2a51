//! Configuration for the artifact store and the rate limiter.
//!
//! All config types deserialize with `serde` (durations in `humantime`
//! notation such as `"60s"` or `"1h"`) and can be built in code through
//! `bon` builders that validate on `build()`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    size_limits::{DEFAULT_MAX_ARTIFACT_SIZE, DEFAULT_MAX_GROUP_LENGTH, SizeLimits},
};

const DEFAULT_METADATA_FILE: &str = "metadata.json";
const DEFAULT_BLOB_DIR: &str = "blobs";

/// Default admission budget for endpoints without their own shape.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default refill window for [`DEFAULT_RATE_LIMIT`].
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default idle time after which a bucket is swept.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

fn default_metadata_file() -> String {
    DEFAULT_METADATA_FILE.to_owned()
}

fn default_blob_dir() -> String {
    DEFAULT_BLOB_DIR.to_owned()
}

fn default_max_artifact_size() -> usize {
    DEFAULT_MAX_ARTIFACT_SIZE
}

fn default_max_group_length() -> usize {
    DEFAULT_MAX_GROUP_LENGTH
}

/// Configuration for an on-disk [`ArtifactStore`](crate::ArtifactStore).
///
/// Layout under `data_dir`:
///
/// ```text
/// <data_dir>/<metadata_file>           metadata ledger
/// <data_dir>/<blob_dir>/<id>.<ext>     payloads
/// ```
///
/// # Example
///
/// ```
/// use gplot_common_storage::StorageConfig;
///
/// let config = StorageConfig::builder()
///     .data_dir("/var/lib/gplot")
///     .max_artifact_size(8 * 1024 * 1024)
///     .build()?;
/// assert!(config.metadata_path().ends_with("metadata.json"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub(crate) data_dir: PathBuf,

    #[serde(default = "default_metadata_file")]
    pub(crate) metadata_file: String,

    #[serde(default = "default_blob_dir")]
    pub(crate) blob_dir: String,

    #[serde(default = "default_max_artifact_size")]
    pub(crate) max_artifact_size: usize,

    #[serde(default = "default_max_group_length")]
    pub(crate) max_group_length: usize,
}

#[bon::bon]
impl StorageConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns an error if `data_dir`, `metadata_file` or `blob_dir` is
    /// empty, if a file name contains a path separator, or if a size limit
    /// is zero.
    #[builder]
    pub fn new(
        #[builder(into)] data_dir: PathBuf,
        #[builder(into, default = default_metadata_file())] metadata_file: String,
        #[builder(into, default = default_blob_dir())] blob_dir: String,
        #[builder(default = DEFAULT_MAX_ARTIFACT_SIZE)] max_artifact_size: usize,
        #[builder(default = DEFAULT_MAX_GROUP_LENGTH)] max_group_length: usize,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { data_dir, metadata_file, blob_dir, max_artifact_size, max_group_length };
        config.validate()?;
        Ok(config)
    }

    /// Checks a deserialized configuration.
    ///
    /// # Errors
    ///
    /// Same conditions as [`StorageConfig::builder`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField { field: "data_dir" });
        }
        validate_file_name("metadata_file", &self.metadata_file)?;
        validate_file_name("blob_dir", &self.blob_dir)?;
        SizeLimits::new(self.max_artifact_size, self.max_group_length)?;
        Ok(())
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the full path of the metadata ledger.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }

    /// Returns the directory holding artifact payloads.
    #[must_use]
    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }

    /// Returns the configured size limits.
    #[must_use]
    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_artifact_size, self.max_group_length).unwrap_or_default()
    }
}

fn validate_file_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField { field });
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{value}' must be a plain file name"),
        });
    }
    Ok(())
}

/// Bucket shape for one endpoint: `limit` requests per `window`.
///
/// Capacity is `limit`; the refill rate is `limit / window` tokens per
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRateLimitConfig")]
pub struct RateLimitConfig {
    limit: u32,
    #[serde(with = "humantime_serde")]
    window: Duration,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRateLimitConfig {
    limit: u32,
    #[serde(with = "humantime_serde")]
    window: Duration,
}

impl TryFrom<RawRateLimitConfig> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRateLimitConfig) -> Result<Self, Self::Error> {
        Self::new(raw.limit, raw.window)
    }
}

impl RateLimitConfig {
    /// Creates a bucket shape.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `limit` or `window` is zero.
    pub fn new(limit: u32, window: Duration) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "limit",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if window.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "window",
                min: "1ns".into(),
                value: "0s".into(),
            });
        }
        Ok(Self { limit, window })
    }

    /// Returns the number of requests admitted per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the refill window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Bucket capacity in tokens.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        f64::from(self.limit)
    }

    /// Refill rate in tokens per second.
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.limit) / self.window.as_secs_f64()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { limit: DEFAULT_RATE_LIMIT, window: DEFAULT_RATE_WINDOW }
    }
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_enabled() -> bool {
    true
}

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gplot_common_storage::{RateLimitConfig, RateLimiterConfig};
///
/// let config = RateLimiterConfig::builder()
///     .default_limit(RateLimitConfig::new(20, Duration::from_secs(60))?)
///     .endpoints([("render".to_owned(), RateLimitConfig::new(5, Duration::from_secs(60))?)].into())
///     .build();
/// assert!(config.enabled);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// Shape used by endpoints without their own entry.
    #[serde(default)]
    #[builder(default)]
    pub default_limit: RateLimitConfig,

    /// Per-endpoint shapes.
    #[serde(default)]
    #[builder(default)]
    pub endpoints: BTreeMap<String, RateLimitConfig>,

    /// Buckets idle for longer than this are swept by
    /// [`RateLimiter::cleanup_stale`](crate::RateLimiter::cleanup_stale).
    #[serde(with = "humantime_serde", default = "default_stale_after")]
    #[builder(default = DEFAULT_STALE_AFTER)]
    pub stale_after: Duration,

    /// When `false` every check is admitted.
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    pub enabled: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: RateLimitConfig::default(),
            endpoints: BTreeMap::new(),
            stale_after: default_stale_after(),
            enabled: default_enabled(),
        }
    }
}
