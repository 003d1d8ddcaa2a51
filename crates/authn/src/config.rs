//! Token service configuration.

use std::{fmt, path::PathBuf, time::Duration};

use gplot_common_storage::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::validation::SigningAlgorithm;

/// How verification treats a token id that the revocation ledger does not
/// track (after reloading the ledger once from disk).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTokenPolicy {
    /// The ledger is the source of truth: untracked ids are rejected as
    /// revoked.
    #[default]
    Reject,
    /// Untracked ids are treated as never revoked.
    Allow,
}

/// Configuration for a [`TokenService`](crate::TokenService).
///
/// The signing secret is held in [`Zeroizing`] memory and never printed;
/// use [`secret_fingerprint`](Self::secret_fingerprint) to identify it in
/// logs.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gplot_common_authn::AuthConfig;
///
/// let config = AuthConfig::builder()
///     .secret("a-long-random-secret")
///     .audience("gofr-plot")
///     .max_ttl(Duration::from_secs(86_400))
///     .build()?;
/// assert!(config.secret_fingerprint().starts_with("sha256:"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Deserialize)]
#[serde(try_from = "RawAuthConfig")]
pub struct AuthConfig {
    secret: Option<Zeroizing<String>>,
    algorithm: SigningAlgorithm,
    audience: Option<String>,
    leeway: Duration,
    max_ttl: Option<Duration>,
    ledger_path: Option<PathBuf>,
    unknown_token_policy: UnknownTokenPolicy,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAuthConfig {
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    algorithm: SigningAlgorithm,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default, with = "humantime_serde")]
    leeway: Duration,
    #[serde(default, with = "humantime_serde")]
    max_ttl: Option<Duration>,
    #[serde(default)]
    ledger_path: Option<PathBuf>,
    #[serde(default)]
    unknown_token_policy: UnknownTokenPolicy,
}

impl TryFrom<RawAuthConfig> for AuthConfig {
    type Error = ConfigError;

    fn try_from(raw: RawAuthConfig) -> Result<Self, Self::Error> {
        let config = Self {
            secret: raw.secret.map(Zeroizing::new),
            algorithm: raw.algorithm,
            audience: raw.audience,
            leeway: raw.leeway,
            max_ttl: raw.max_ttl,
            ledger_path: raw.ledger_path,
            unknown_token_policy: raw.unknown_token_policy,
        };
        config.validate()?;
        Ok(config)
    }
}

#[bon::bon]
impl AuthConfig {
    /// Builds a validated configuration.
    ///
    /// Without a secret the service can still be constructed, but issuing
    /// and verifying fail with a configuration error.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret, audience, or ledger path is empty, or
    /// `max_ttl` is zero.
    #[builder]
    pub fn new(
        #[builder(into)] secret: Option<String>,
        #[builder(default)] algorithm: SigningAlgorithm,
        #[builder(into)] audience: Option<String>,
        #[builder(default)] leeway: Duration,
        max_ttl: Option<Duration>,
        #[builder(into)] ledger_path: Option<PathBuf>,
        #[builder(default)] unknown_token_policy: UnknownTokenPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            secret: secret.map(Zeroizing::new),
            algorithm,
            audience,
            leeway,
            max_ttl,
            ledger_path,
            unknown_token_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret, audience, or ledger path is empty, or
    /// `max_ttl` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.as_ref().is_some_and(|s| s.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "secret",
                reason: "must not be empty".into(),
            });
        }
        if self.audience.as_deref() == Some("") {
            return Err(ConfigError::Invalid {
                field: "audience",
                reason: "must not be empty".into(),
            });
        }
        if self.max_ttl == Some(Duration::ZERO) {
            return Err(ConfigError::BelowMinimum {
                field: "max_ttl",
                min: "1s".into(),
                value: "0s".into(),
            });
        }
        if self.ledger_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "ledger_path",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Returns the signing secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] if no secret is configured.
    pub fn require_secret(&self) -> Result<&[u8], ConfigError> {
        self.secret
            .as_ref()
            .map(|s| s.as_bytes())
            .ok_or(ConfigError::MissingField { field: "secret" })
    }

    /// Returns `true` if a signing secret is configured.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// `sha256:<first 12 hex chars>` of the secret, or `"none"`.
    #[must_use]
    pub fn secret_fingerprint(&self) -> String {
        match &self.secret {
            Some(secret) => {
                let digest = hex::encode(Sha256::digest(secret.as_bytes()));
                format!("sha256:{}", &digest[..12])
            },
            None => "none".to_owned(),
        }
    }

    /// The pinned signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// The audience minted into and required of tokens.
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Clock skew tolerated on time-based checks.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Longest TTL accepted at issuance.
    #[must_use]
    pub fn max_ttl(&self) -> Option<Duration> {
        self.max_ttl
    }

    /// Where the revocation ledger is persisted. `None` keeps it in memory.
    #[must_use]
    pub fn ledger_path(&self) -> Option<&PathBuf> {
        self.ledger_path.as_ref()
    }

    /// Treatment of ids the revocation ledger does not track.
    #[must_use]
    pub fn unknown_token_policy(&self) -> UnknownTokenPolicy {
        self.unknown_token_policy
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret_fingerprint())
            .field("algorithm", &self.algorithm)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .field("max_ttl", &self.max_ttl)
            .field("ledger_path", &self.ledger_path)
            .field("unknown_token_policy", &self.unknown_token_policy)
            .finish()
    }
}
