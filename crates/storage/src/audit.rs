//! Security audit trail for token and artifact operations.
//!
//! Records who did what to which resource, and whether it was allowed.
//! Failed authentications, denied cross-group access, revocations, and
//! ledger recoveries all pass through an [`AuditLogger`].
//!
//! - [`TracingAuditLogger`]: emits structured `tracing` events named `audit_event`, at `INFO` for
//!   successes, `WARN` for denials and `ERROR` for failures.
//! - [`NoopAuditLogger`]: discards events.
//!
//! # Usage
//!
//! ```no_run
//! use gplot_common_storage::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("group:finance")
//!     .action(AuditAction::AccessArtifact)
//!     .resource("artifact:8c6bdb9e-4c1d-4c29-9d0b-2f1a5e7c3b10")
//!     .result(AuditResult::Denied("owned by another group".into()))
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A token was issued.
    IssueToken,
    /// A presented token was verified.
    VerifyToken,
    /// A single token was revoked.
    RevokeToken,
    /// Every live token of a group was revoked.
    RevokeGroup,
    /// An artifact was stored.
    StoreArtifact,
    /// An artifact was read.
    AccessArtifact,
    /// An artifact was deleted.
    DeleteArtifact,
    /// Artifacts were purged by age.
    PurgeArtifacts,
    /// A corrupt ledger file was discarded and rebuilt empty.
    RecoverLedger,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IssueToken => "issue_token",
            Self::VerifyToken => "verify_token",
            Self::RevokeToken => "revoke_token",
            Self::RevokeGroup => "revoke_group",
            Self::StoreArtifact => "store_artifact",
            Self::AccessArtifact => "access_artifact",
            Self::DeleteArtifact => "delete_artifact",
            Self::PurgeArtifacts => "purge_artifacts",
            Self::RecoverLedger => "recover_ledger",
        };
        f.write_str(name)
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// The caller was refused (bad credential, wrong group, rate limited).
    Denied(String),
    /// Operation failed for a reason not attributable to the caller.
    Failure(String),
}

impl AuditResult {
    /// Returns `true` for [`AuditResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Denied(reason) => write!(f, "denied: {reason}"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Who performed the operation, usually `group:<name>`.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g. `artifact:<id>`, `token:<jti>`).
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g. purge counts, failure kind).
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event. Delivery failures are the backend's concern
    /// and never fail the audited operation.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation (e.g. "access_artifact")
/// - `audit.resource`: what was affected
/// - `audit.result`: "success", "denied: ..." or "failure: ..."
/// - `audit.metadata`: `k=v` pairs in key order
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata_str =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    audit.timestamp = %event.timestamp.to_rfc3339(),
                    audit.actor = %event.actor,
                    audit.action = %event.action,
                    audit.resource = %event.resource,
                    audit.result = %event.result,
                    audit.metadata = %metadata_str,
                    "audit_event"
                )
            };
        }

        match event.result {
            AuditResult::Success => emit!(info),
            AuditResult::Denied(_) => emit!(warn),
            AuditResult::Failure(_) => emit!(error),
        }
    }
}

/// No-op audit logger for environments where audit is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Resource identifier for an artifact.
pub fn artifact_resource(id: impl fmt::Display) -> String {
    format!("artifact:{id}")
}

/// Resource identifier for a token.
pub fn token_resource(id: impl fmt::Display) -> String {
    format!("token:{id}")
}

/// Actor identifier for a tenant group.
pub fn group_actor(group: &str) -> String {
    format!("group:{group}")
}
