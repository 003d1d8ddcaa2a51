//! Token issuance and verification.
//!
//! [`TokenService::verify`] checks a presented token in a fixed order and
//! stops at the first failure:
//!
//! 1. header algorithm equals the pinned algorithm ([`AuthError::Malformed`])
//! 2. signature and claim decoding ([`AuthError::Malformed`])
//! 3. validity window, with the configured leeway ([`AuthError::TokenExpired`],
//!    [`AuthError::TokenNotYetValid`])
//! 4. audience, if the token carries one ([`AuthError::InvalidAudience`])
//! 5. revocation, if the token carries an id ([`AuthError::TokenRevoked`]),
//!    against the ledger file as last written by any process sharing it
//! 6. fingerprint, if the token is bound to one ([`AuthError::FingerprintMismatch`])
//!
//! Every rejection is reported to the [`AuditLogger`] as a denied
//! `verify_token` event.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use gplot_common_storage::{
    Clock, ConfigError, LoadStatus,
    audit::{
        AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, group_actor,
        token_resource,
    },
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    claims::TokenClaims,
    config::{AuthConfig, UnknownTokenPolicy},
    error::{AuthError, Result},
    fingerprint::Fingerprint,
    revocation::{RevocationLedger, RevocationRecord, RevocationStatus, TrackedToken},
    validation::validate_header_algorithm,
};

/// Parameters for [`TokenService::issue`].
///
/// ```
/// use std::time::Duration;
/// use gplot_common_authn::{Fingerprint, IssueRequest};
///
/// let request = IssueRequest::builder()
///     .group("finance")
///     .ttl(Duration::from_secs(3600))
///     .fingerprint(Fingerprint::derive(Some("curl/8.5"), Some("203.0.113.7")))
///     .build();
/// assert!(request.id.is_none());
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct IssueRequest {
    /// Group the token grants access to.
    #[builder(into)]
    pub group: String,
    /// How long the token stays valid. Whole seconds; at least one.
    pub ttl: Duration,
    /// Client context to bind the token to.
    pub fingerprint: Option<Fingerprint>,
    /// Token id. A random UUID is used when absent.
    #[builder(into)]
    pub id: Option<String>,
    /// Instant before which the token is not valid.
    pub not_before: Option<DateTime<Utc>>,
}

/// A freshly issued token.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// The signed token string handed to the client.
    pub token: String,
    /// Token id tracked by the revocation ledger.
    pub id: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("id", &self.id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity resolved from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// The tenant group. Use it to scope every artifact operation.
    pub group: String,
    /// Token id, if the token carries one.
    pub id: Option<String>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies signed, expiring, revocable, device-bound tokens.
///
/// Construct once at startup and share (e.g. behind an `Arc`) with every
/// request handler.
pub struct TokenService {
    config: AuthConfig,
    keys: Option<(EncodingKey, DecodingKey)>,
    validation: Validation,
    ledger: RevocationLedger,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLogger>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates a service, opening the revocation ledger at
    /// [`AuthConfig::ledger_path`] (or keeping it in memory).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger file exists but cannot
    /// be read. A corrupt ledger is recovered, not returned as an error.
    pub async fn new(config: AuthConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_audit(config, clock, Arc::new(TracingAuditLogger)).await
    }

    /// Like [`new`](Self::new) with an explicit audit logger.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub async fn with_audit(
        config: AuthConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self> {
        let ledger = match config.ledger_path() {
            Some(path) => RevocationLedger::open(path, Arc::clone(&clock)).await?,
            None => RevocationLedger::in_memory(Arc::clone(&clock)),
        };

        if let LoadStatus::Recovered { reason, .. } = ledger.load_status() {
            let event = AuditEvent::builder()
                .timestamp(clock.now())
                .actor("system")
                .action(AuditAction::RecoverLedger)
                .resource("revocation_ledger")
                .result(AuditResult::Success)
                .metadata([("reason".to_owned(), reason.clone())].into())
                .build();
            audit.log(&event).await;
        }

        info!(
            algorithm = %config.algorithm(),
            secret = %config.secret_fingerprint(),
            audience = ?config.audience(),
            "token service ready"
        );
        Ok(Self::from_parts(config, ledger, clock, audit))
    }

    /// Creates a service around an existing ledger.
    #[must_use]
    pub fn from_parts(
        config: AuthConfig,
        ledger: RevocationLedger,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        let keys = config.require_secret().ok().map(|secret| {
            (EncodingKey::from_secret(secret), DecodingKey::from_secret(secret))
        });

        // Time and audience checks run against the injected clock, not
        // jsonwebtoken's wall clock.
        let mut validation = Validation::new(config.algorithm().jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self { config, keys, validation, ledger, clock, audit }
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The revocation ledger.
    #[must_use]
    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    fn keys(&self) -> Result<&(EncodingKey, DecodingKey)> {
        self.keys.as_ref().ok_or(AuthError::Config(ConfigError::MissingField { field: "secret" }))
    }

    /// Issues a signed token and tracks its id in the revocation ledger.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if no signing secret is configured
    /// - [`AuthError::InvalidArgument`] for an empty group or id, a TTL under one second or
    ///   above `max_ttl`, or an id that is already tracked
    /// - [`AuthError::Storage`] if the ledger cannot be persisted
    #[tracing::instrument(skip(self, request), fields(group = %request.group))]
    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedToken> {
        let (encoding, _) = self.keys()?;

        if request.group.is_empty() {
            return Err(AuthError::invalid_argument("group must not be empty"));
        }
        if request.ttl < Duration::from_secs(1) {
            return Err(AuthError::invalid_argument("ttl must be at least one second"));
        }
        if let Some(max) = self.config.max_ttl() {
            if request.ttl > max {
                return Err(AuthError::invalid_argument(format!(
                    "ttl {}s exceeds the maximum of {}s",
                    request.ttl.as_secs(),
                    max.as_secs()
                )));
            }
        }
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if id.is_empty() {
            return Err(AuthError::invalid_argument("token id must not be empty"));
        }

        let ttl_secs = i64::try_from(request.ttl.as_secs())
            .map_err(|_| AuthError::invalid_argument("ttl is too large"))?;
        let now = self.clock.now();
        let claims = TokenClaims {
            group: request.group.clone(),
            iat: now.timestamp(),
            exp: now.timestamp().saturating_add(ttl_secs),
            nbf: request.not_before.map(|t| t.timestamp()),
            aud: self.config.audience().map(str::to_owned),
            jti: Some(id.clone()),
            fingerprint: request.fingerprint.map(|fp| fp.as_str().to_owned()),
        };

        let header = Header::new(self.config.algorithm().jwt_algorithm());
        let token = jsonwebtoken::encode(&header, &claims, encoding)
            .map_err(|e| AuthError::invalid_argument(format!("failed to sign token: {e}")))?;

        let expires_at = claims.expires_at();
        self.ledger.track(&id, RevocationRecord::new(&request.group, now, expires_at)).await?;

        self.audit_event(&request.group, AuditAction::IssueToken, &id, AuditResult::Success)
            .await;
        info!(token_id = %id, %expires_at, "token issued");
        Ok(IssuedToken { token, id, expires_at })
    }

    /// Verifies a presented token, optionally against the caller's
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if no signing secret is configured
    /// - [`AuthError::Malformed`], [`AuthError::TokenExpired`],
    ///   [`AuthError::TokenNotYetValid`], [`AuthError::InvalidAudience`],
    ///   [`AuthError::TokenRevoked`], [`AuthError::FingerprintMismatch`] for a rejected token
    /// - [`AuthError::Storage`] if reloading the ledger fails
    #[tracing::instrument(skip_all)]
    pub async fn verify(
        &self,
        token: &str,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<VerifiedToken> {
        let result = self.check(token, fingerprint).await;
        match &result {
            Ok(verified) => {
                debug!(group = %verified.group, token_id = ?verified.id, "token verified");
            },
            Err(e) if e.is_rejection() => {
                let id = unverified_token_id(token);
                self.audit
                    .log(
                        &AuditEvent::builder()
                            .timestamp(self.clock.now())
                            .actor("anonymous")
                            .action(AuditAction::VerifyToken)
                            .resource(token_resource(id.as_deref().unwrap_or("unknown")))
                            .result(AuditResult::Denied(e.to_string()))
                            .metadata([("kind".to_owned(), format!("{:?}", e.kind()))].into())
                            .build(),
                    )
                    .await;
            },
            Err(_) => {},
        }
        result
    }

    async fn check(&self, token: &str, fingerprint: Option<&Fingerprint>) -> Result<VerifiedToken> {
        let (_, decoding) = self.keys()?;

        validate_header_algorithm(token, self.config.algorithm())?;
        let claims = jsonwebtoken::decode::<TokenClaims>(token, decoding, &self.validation)?.claims;
        claims.validate_shape()?;

        self.check_time(&claims)?;
        self.check_audience(&claims)?;
        if let Some(id) = &claims.jti {
            self.check_revocation(id).await?;
        }
        if let Some(bound) = &claims.fingerprint {
            match fingerprint {
                Some(presented) if presented.matches_value(bound) => {},
                _ => return Err(AuthError::FingerprintMismatch),
            }
        }

        Ok(VerifiedToken { expires_at: claims.expires_at(), group: claims.group, id: claims.jti })
    }

    fn check_time(&self, claims: &TokenClaims) -> Result<()> {
        let now = self.clock.now().timestamp();
        let leeway = i64::try_from(self.config.leeway().as_secs()).unwrap_or(i64::MAX);

        if now >= claims.exp.saturating_add(leeway) {
            return Err(AuthError::TokenExpired);
        }
        if now.saturating_add(leeway) < claims.iat {
            return Err(AuthError::TokenNotYetValid);
        }
        if claims.nbf.is_some_and(|nbf| now.saturating_add(leeway) < nbf) {
            return Err(AuthError::TokenNotYetValid);
        }
        Ok(())
    }

    fn check_audience(&self, claims: &TokenClaims) -> Result<()> {
        let Some(aud) = &claims.aud else {
            return Ok(());
        };
        match self.config.audience() {
            Some(expected) if expected == aud => Ok(()),
            Some(expected) => {
                Err(AuthError::invalid_audience(format!("expected '{expected}', got '{aud}'")))
            },
            None => Err(AuthError::invalid_audience(format!(
                "token is for '{aud}' but this service has no audience"
            ))),
        }
    }

    async fn check_revocation(&self, id: &str) -> Result<()> {
        // Another process sharing the ledger file may have issued or
        // revoked it since this view last synchronized.
        let refreshed = self.ledger.refresh().await?;
        let mut status = self.ledger.lookup(id);
        if status == RevocationStatus::Unknown && !refreshed {
            self.ledger.reload().await?;
            status = self.ledger.lookup(id);
        }
        match status {
            RevocationStatus::Active => Ok(()),
            RevocationStatus::Revoked => Err(AuthError::token_revoked(id)),
            RevocationStatus::Unknown => match self.config.unknown_token_policy() {
                UnknownTokenPolicy::Allow => Ok(()),
                UnknownTokenPolicy::Reject => Err(AuthError::token_revoked(id)),
            },
        }
    }

    /// Revokes a token id. Unknown and already-revoked ids are a no-op.
    ///
    /// Returns `true` if this call revoked the id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let revoked = self.ledger.revoke(id).await?;
        if revoked {
            let group = self.ledger.get(id).map(|r| r.group).unwrap_or_default();
            self.audit_event(&group, AuditAction::RevokeToken, id, AuditResult::Success).await;
            info!(token_id = %id, "token revoked");
        } else {
            debug!(token_id = %id, "revoke was a no-op");
        }
        Ok(revoked)
    }

    /// Revokes every live token of `group`. Returns how many were revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_group(&self, group: &str) -> Result<usize> {
        let revoked = self.ledger.revoke_group(group).await?;
        self.audit
            .log(
                &AuditEvent::builder()
                    .timestamp(self.clock.now())
                    .actor(group_actor(group))
                    .action(AuditAction::RevokeGroup)
                    .resource(format!("group:{group}"))
                    .result(AuditResult::Success)
                    .metadata([("revoked".to_owned(), revoked.to_string())].into())
                    .build(),
            )
            .await;
        info!(revoked, "group tokens revoked");
        Ok(revoked)
    }

    /// Drops ledger records of expired tokens. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    pub async fn prune_expired(&self) -> Result<usize> {
        self.ledger.prune_expired().await
    }

    /// Lists tracked tokens, optionally for one group.
    #[must_use]
    pub fn list_tokens(&self, group: Option<&str>) -> Vec<TrackedToken> {
        self.ledger.records(group)
    }

    async fn audit_event(&self, group: &str, action: AuditAction, id: &str, result: AuditResult) {
        self.audit
            .log(
                &AuditEvent::builder()
                    .timestamp(self.clock.now())
                    .actor(group_actor(group))
                    .action(action)
                    .resource(token_resource(id))
                    .result(result)
                    .build(),
            )
            .await;
    }
}

/// Best-effort `jti` of a token whose verification failed, for audit
/// records only. Never trusted for decisions.
fn unverified_token_id(token: &str) -> Option<String> {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let id = value.get("jti")?.as_str()?;
    // Attacker-controlled; keep it short and printable.
    Some(id.chars().filter(|c| !c.is_control()).take(64).collect())
}
