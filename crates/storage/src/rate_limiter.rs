//! Token-bucket admission control per (client, endpoint).
//!
//! Each key gets its own bucket, created lazily on the first check, with
//! capacity `limit` and a refill rate of `limit / window` tokens per
//! second. Refill is computed at check time from the elapsed wall time, so
//! a check is O(1) and performs no I/O.
//!
//! Buckets live behind their own `Mutex`; the bucket map itself is behind
//! an `RwLock` that is only taken for writing when a key is first seen or
//! when buckets are swept. Checks for different keys never contend on the
//! same lock.
//!
//! State is in memory only. A restart resets every bucket.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use gplot_common_storage::{RateLimiter, RateLimiterConfig, StorageError};
//! use gplot_common_storage::clock::SystemClock;
//!
//! let limiter = RateLimiter::new(RateLimiterConfig::default(), Arc::new(SystemClock));
//! limiter.configure_endpoint("render", 2, Duration::from_secs(60))?;
//!
//! assert!(limiter.check("10.0.0.1", "render").is_ok());
//! assert!(limiter.check("10.0.0.1", "render").is_ok());
//! match limiter.check("10.0.0.1", "render") {
//!     Err(StorageError::RateLimitExceeded { retry_after }) => assert!(retry_after > Duration::ZERO),
//!     other => panic!("expected rejection, got {other:?}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{
    clock::{Clock, elapsed_between},
    config::{RateLimitConfig, RateLimiterConfig},
    error::{ConfigError, StorageError, StorageResult},
};

/// Absorbs float rounding in refill arithmetic so that waiting exactly
/// `1 / rate` seconds always yields a whole token.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    client: String,
    endpoint: String,
}

/// State of a single token bucket.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    config: RateLimitConfig,
}

impl Bucket {
    fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self { tokens: config.capacity(), last_refill: now, config }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = elapsed_between(self.last_refill, now);
        let refill = elapsed.as_secs_f64() * self.config.refill_rate();
        self.tokens = (self.tokens + refill).min(self.config.capacity());
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refills, then consumes `cost` tokens. Returns `Err(retry_after)` with
    /// the time until enough tokens are available.
    fn try_acquire(&mut self, now: DateTime<Utc>, cost: f64) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens + TOKEN_EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            let wait = deficit / self.config.refill_rate();
            Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        }
    }
}

#[derive(Debug, Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time view of a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterStats {
    /// Whether checks are enforced.
    pub enabled: bool,
    /// Buckets currently held in memory.
    pub active_buckets: usize,
    /// Distinct clients with at least one bucket.
    pub clients: usize,
    /// Checks admitted since creation.
    pub allowed: u64,
    /// Checks rejected since creation.
    pub rejected: u64,
    /// Explicitly configured endpoint shapes.
    pub endpoint_limits: BTreeMap<String, RateLimitConfig>,
}

/// Token-bucket rate limiter keyed by (client, endpoint).
pub struct RateLimiter {
    buckets: RwLock<HashMap<BucketKey, Arc<Mutex<Bucket>>>>,
    endpoints: RwLock<HashMap<String, RateLimitConfig>>,
    default_limit: RateLimitConfig,
    stale_after: Duration,
    enabled: AtomicBool,
    clock: Arc<dyn Clock>,
    metrics: RateLimitMetrics,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_limit", &self.default_limit)
            .field("stale_after", &self.stale_after)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    #[must_use]
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(config.endpoints.into_iter().collect()),
            default_limit: config.default_limit,
            stale_after: config.stale_after,
            enabled: AtomicBool::new(config.enabled),
            clock,
            metrics: RateLimitMetrics::default(),
        }
    }

    /// Sets the bucket shape for `endpoint`: capacity `limit`, refilled at
    /// `limit / window` tokens per second.
    ///
    /// Existing buckets for the endpoint are dropped so the new shape
    /// applies from the next check.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `limit` or `window` is zero.
    pub fn configure_endpoint(
        &self,
        endpoint: &str,
        limit: u32,
        window: Duration,
    ) -> Result<(), ConfigError> {
        let config = RateLimitConfig::new(limit, window)?;
        self.endpoints.write().insert(endpoint.to_owned(), config);
        self.buckets.write().retain(|key, _| key.endpoint != endpoint);
        info!(endpoint, limit, window_secs = window.as_secs_f64(), "rate limit configured");
        Ok(())
    }

    /// Admits one request for `client_id` on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RateLimitExceeded`] carrying the time until
    /// the next token is available.
    pub fn check(&self, client_id: &str, endpoint: &str) -> StorageResult<()> {
        self.check_with_cost(client_id, endpoint, 1)
    }

    /// Admits a request that consumes `cost` tokens.
    ///
    /// A cost above the bucket capacity can never be admitted; it is
    /// rejected with the retry hint for the full deficit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RateLimitExceeded`] when the bucket holds
    /// fewer than `cost` tokens.
    pub fn check_with_cost(&self, client_id: &str, endpoint: &str, cost: u32) -> StorageResult<()> {
        if !self.is_enabled() {
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let now = self.clock.now();
        let bucket = self.bucket_for(client_id, endpoint, now);
        let outcome = bucket.lock().try_acquire(now, f64::from(cost));

        match outcome {
            Ok(()) => {
                self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(retry_after) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = client_id,
                    endpoint,
                    cost,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
                Err(StorageError::rate_limit_exceeded(retry_after))
            },
        }
    }

    fn bucket_for(&self, client_id: &str, endpoint: &str, now: DateTime<Utc>) -> Arc<Mutex<Bucket>> {
        let key = BucketKey { client: client_id.to_owned(), endpoint: endpoint.to_owned() };
        if let Some(bucket) = self.buckets.read().get(&key) {
            return Arc::clone(bucket);
        }

        let config = self.endpoint_config(endpoint);
        let mut buckets = self.buckets.write();
        Arc::clone(
            buckets.entry(key).or_insert_with(|| Arc::new(Mutex::new(Bucket::new(config, now)))),
        )
    }

    fn endpoint_config(&self, endpoint: &str) -> RateLimitConfig {
        self.endpoints.read().get(endpoint).copied().unwrap_or(self.default_limit)
    }

    /// Removes buckets idle for longer than the configured `stale_after`.
    /// Returns the number removed.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_older_than(self.stale_after)
    }

    /// Removes buckets whose last refill is more than `max_idle` ago.
    /// Returns the number removed.
    pub fn cleanup_older_than(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| elapsed_between(bucket.lock().last_refill, now) <= max_idle);
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(removed, remaining = buckets.len(), "swept idle rate limit buckets");
        }
        removed
    }

    /// Drops a client's buckets, for one endpoint or all of them. Returns
    /// the number removed.
    pub fn reset_client(&self, client_id: &str, endpoint: Option<&str>) -> usize {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|key, _| {
            key.client != client_id || endpoint.is_some_and(|e| key.endpoint != e)
        });
        before - buckets.len()
    }

    /// Turns enforcement on or off. While disabled every check is admitted.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "rate limiting toggled");
    }

    /// Returns whether checks are enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of the limiter state and counters.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let buckets = self.buckets.read();
        let clients: HashSet<&str> = buckets.keys().map(|k| k.client.as_str()).collect();
        RateLimiterStats {
            enabled: self.is_enabled(),
            active_buckets: buckets.len(),
            clients: clients.len(),
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            endpoint_limits: self
                .endpoints
                .read()
                .iter()
                .map(|(name, config)| (name.clone(), *config))
                .collect(),
        }
    }
}
