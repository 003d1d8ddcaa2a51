//! The group-isolated artifact store.

use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use fail::fail_point;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    blob::{BlobStore, FileBlobStore, MemoryBlobStore},
    metadata::{ArtifactMetadata, MetadataLedger, MetadataMap},
};
use crate::{
    audit::{
        AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, artifact_resource,
        group_actor,
    },
    clock::Clock,
    config::StorageConfig,
    error::{StorageError, StorageResult},
    ledger::{LedgerFile, LoadStatus, STALE_TEMP_GRACE},
    size_limits::{SizeLimits, validate_artifact},
    types::{ArtifactFormat, ArtifactId},
};

const SYSTEM_ACTOR: &str = "system";

/// A stored artifact: payload bytes plus metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Metadata from the ledger.
    pub metadata: ArtifactMetadata,
    /// Payload bytes.
    pub bytes: Bytes,
}

/// Which artifacts a purge sweep removes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeFilter {
    /// Artifacts whose age is at least this are purged. Zero purges all.
    pub older_than: Duration,
    /// Restrict the sweep to one group.
    pub group: Option<String>,
}

impl PurgeFilter {
    /// Purge everything at least `older_than` old, in every group.
    #[must_use]
    pub fn older_than(older_than: Duration) -> Self {
        Self { older_than, group: None }
    }

    /// Restrict the sweep to `group`.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    fn matches_group(&self, meta: &ArtifactMetadata) -> bool {
        self.group.as_deref().is_none_or(|g| g == meta.group)
    }
}

/// Persists rendered artifacts under per-group ownership.
///
/// Payloads and metadata are written in an order that keeps the ledger
/// honest across crashes:
///
/// - `store` writes the payload first, then commits the ledger entry. A
///   crash in between leaves an orphaned payload, never a dangling entry.
/// - `delete` and `purge` remove the ledger entry first, then the payload.
///   A crash in between again leaves only an orphan.
///
/// Orphans are harmless and are removed by [`sweep_orphans`](Self::sweep_orphans).
///
/// Ledger mutations are serialized; payload writes for different ids run
/// in parallel. Reads never wait for a mutation in progress.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use gplot_common_storage::{ArtifactFormat, ArtifactStore, StorageError};
/// use gplot_common_storage::clock::SystemClock;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = ArtifactStore::in_memory(Arc::new(SystemClock));
/// let id = store.store(&b"<svg/>"[..], "finance", ArtifactFormat::Svg).await.unwrap();
///
/// let artifact = store.get(&id, "finance").await.unwrap();
/// assert_eq!(&artifact.bytes[..], b"<svg/>");
///
/// assert!(matches!(store.get(&id, "ops").await, Err(StorageError::PermissionDenied { .. })));
/// # });
/// ```
pub struct ArtifactStore {
    ledger: MetadataLedger,
    blobs: Arc<dyn BlobStore>,
    limits: SizeLimits,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLogger>,
    /// Ids whose payload is written but whose ledger entry is not yet
    /// committed. The orphan sweep must not touch them.
    pending: Mutex<HashSet<ArtifactId>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("blobs", &self.blobs)
            .field("limits", &self.limits)
            .field("artifacts", &self.len())
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Opens the on-disk store described by `config`, logging audit events
    /// through [`TracingAuditLogger`].
    ///
    /// A corrupt metadata ledger does not fail the open: it is quarantined
    /// and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the data directory
    /// cannot be created, or the ledger cannot be read.
    pub async fn open(config: &StorageConfig, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        Self::open_with_audit(config, clock, Arc::new(TracingAuditLogger)).await
    }

    /// Like [`open`](Self::open) with an explicit audit logger.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    #[tracing::instrument(skip_all, fields(data_dir = %config.data_dir().display()))]
    pub async fn open_with_audit(
        config: &StorageConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditLogger>,
    ) -> StorageResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(config.data_dir()).await.map_err(|e| {
            StorageError::io_with_source(
                format!("failed to create data directory {}", config.data_dir().display()),
                e,
            )
        })?;

        let ledger =
            MetadataLedger::open(LedgerFile::new(config.metadata_path(), Arc::clone(&clock)))
                .await?;

        if let LoadStatus::Recovered { quarantined_to, reason } = ledger.load_status() {
            let mut metadata = BTreeMap::new();
            metadata.insert("reason".to_owned(), reason.clone());
            if let Some(path) = quarantined_to {
                metadata.insert("quarantined_to".to_owned(), path.display().to_string());
            }
            audit
                .log(
                    &AuditEvent::builder()
                        .timestamp(clock.now())
                        .actor(SYSTEM_ACTOR)
                        .action(AuditAction::RecoverLedger)
                        .resource(config.metadata_path().display().to_string())
                        .result(AuditResult::Success)
                        .metadata(metadata)
                        .build(),
                )
                .await;
        }

        info!(artifacts = ledger.snapshot().len(), "artifact store opened");

        Ok(Self {
            ledger,
            blobs: Arc::new(FileBlobStore::new(config.blob_path())),
            limits: config.size_limits(),
            clock,
            audit,
            pending: Mutex::new(HashSet::new()),
        })
    }

    /// Creates a store that keeps metadata and payloads in memory only.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: MetadataLedger::in_memory(),
            blobs: Arc::new(MemoryBlobStore::new()),
            limits: SizeLimits::default(),
            clock,
            audit: Arc::new(TracingAuditLogger),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the audit logger.
    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the size limits.
    #[must_use]
    pub fn with_size_limits(mut self, limits: SizeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns `true` if the ledger was rebuilt empty at open because the
    /// persisted file was corrupt.
    #[must_use]
    pub fn recovered_from_corruption(&self) -> bool {
        self.ledger.load_status().is_recovered()
    }

    /// How the metadata ledger loaded at open.
    #[must_use]
    pub fn load_status(&self) -> &LoadStatus {
        self.ledger.load_status()
    }

    /// Number of artifacts in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger.snapshot().len()
    }

    /// Returns `true` if no artifacts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a payload for `group` and returns its new id.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidInput`] for an empty payload or group
    /// - [`StorageError::SizeLimitExceeded`] if the payload or group is too large
    /// - [`StorageError::Io`] if the payload or ledger cannot be written
    #[tracing::instrument(skip(self, bytes), fields(size = tracing::field::Empty, id = tracing::field::Empty))]
    pub async fn store(
        &self,
        bytes: impl Into<Bytes>,
        group: &str,
        format: ArtifactFormat,
    ) -> StorageResult<ArtifactId> {
        let bytes = bytes.into();
        let span = tracing::Span::current();
        span.record("size", bytes.len() as u64);
        validate_artifact(&bytes, group, &self.limits)?;

        let id = ArtifactId::generate();
        span.record("id", tracing::field::display(id));
        let metadata = ArtifactMetadata {
            id,
            group: group.to_owned(),
            created_at: self.clock.now(),
            format,
            byte_length: bytes.len() as u64,
        };

        self.pending.lock().insert(id);
        let result = self.write_and_commit(metadata, bytes).await;
        self.pending.lock().remove(&id);

        match result {
            Ok(()) => {
                self.audit_event(group, AuditAction::StoreArtifact, id, AuditResult::Success).await;
                Ok(id)
            },
            Err(e) => {
                self.audit_event(
                    group,
                    AuditAction::StoreArtifact,
                    id,
                    AuditResult::Failure(e.to_string()),
                )
                .await;
                Err(e)
            },
        }
    }

    async fn write_and_commit(&self, metadata: ArtifactMetadata, bytes: Bytes) -> StorageResult<()> {
        let id = metadata.id;
        let format = metadata.format;
        self.blobs.put(id, format, bytes).await?;

        fail_point!("artifact-before-ledger-commit", |_| {
            Err(StorageError::internal("injected failure at artifact-before-ledger-commit"))
        });

        let txn = self.ledger.begin().await;
        let mut next = txn.current().clone();
        next.insert(id, metadata);
        if let Err(e) = txn.commit(next).await {
            if let Err(cleanup) = self.blobs.delete(id, format).await {
                warn!(%id, error = %cleanup, "failed to remove payload after ledger commit failure");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Reads an artifact on behalf of `group`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no ledger entry exists for `id`
    /// - [`StorageError::PermissionDenied`] if the entry belongs to another group
    /// - [`StorageError::Io`] if the payload cannot be read
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn get(&self, id: &ArtifactId, group: &str) -> StorageResult<Artifact> {
        let metadata = self.authorize(id, group, AuditAction::AccessArtifact).await?;

        let Some(bytes) = self.blobs.get(*id, metadata.format).await? else {
            warn!(%id, "ledger entry has no payload");
            return Err(StorageError::not_found(id.to_string()));
        };

        self.audit_event(group, AuditAction::AccessArtifact, *id, AuditResult::Success).await;
        Ok(Artifact { metadata, bytes })
    }

    /// Returns an artifact's metadata on behalf of `group` without reading
    /// the payload.
    ///
    /// # Errors
    ///
    /// Same authorization errors as [`get`](Self::get).
    pub async fn metadata(&self, id: &ArtifactId, group: &str) -> StorageResult<ArtifactMetadata> {
        self.authorize(id, group, AuditAction::AccessArtifact).await
    }

    /// Returns whether a ledger entry exists for `id`, regardless of group.
    #[must_use]
    pub fn exists(&self, id: &ArtifactId) -> bool {
        self.ledger.get(id).is_some()
    }

    async fn authorize(
        &self,
        id: &ArtifactId,
        group: &str,
        action: AuditAction,
    ) -> StorageResult<ArtifactMetadata> {
        let Some(metadata) = self.ledger.get(id) else {
            return Err(StorageError::not_found(id.to_string()));
        };
        if metadata.group != group {
            self.audit_event(
                group,
                action,
                *id,
                AuditResult::Denied("artifact belongs to another group".to_owned()),
            )
            .await;
            return Err(StorageError::permission_denied(id.to_string(), group));
        }
        Ok(metadata)
    }

    /// Deletes an artifact on behalf of `group` and returns its metadata.
    ///
    /// The ledger entry is removed first. If removing it fails, nothing
    /// changes. If the payload delete fails afterwards, the artifact is
    /// already gone for readers and the payload is left for
    /// [`sweep_orphans`](Self::sweep_orphans).
    ///
    /// # Errors
    ///
    /// Same authorization errors as [`get`](Self::get), plus
    /// [`StorageError::Io`] if the ledger cannot be written.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &ArtifactId, group: &str) -> StorageResult<ArtifactMetadata> {
        let txn = self.ledger.begin().await;
        let existing = txn.current().get(id).cloned();
        let metadata = match existing {
            None => return Err(StorageError::not_found(id.to_string())),
            Some(meta) if meta.group != group => {
                drop(txn);
                self.audit_event(
                    group,
                    AuditAction::DeleteArtifact,
                    *id,
                    AuditResult::Denied("artifact belongs to another group".to_owned()),
                )
                .await;
                return Err(StorageError::permission_denied(id.to_string(), group));
            },
            Some(meta) => meta,
        };

        let mut next = txn.current().clone();
        next.remove(id);
        txn.commit(next).await?;

        self.remove_payload(&metadata).await;
        self.audit_event(group, AuditAction::DeleteArtifact, *id, AuditResult::Success).await;
        Ok(metadata)
    }

    /// Removes every artifact whose age is at least `older_than`, in every
    /// group. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the ledger cannot be written.
    pub async fn purge(&self, older_than: Duration) -> StorageResult<usize> {
        self.purge_matching(&PurgeFilter::older_than(older_than)).await
    }

    /// Removes the artifacts selected by `filter`. Returns the number
    /// removed.
    ///
    /// Entries in scope whose payload is already missing are dropped too,
    /// whatever their age, and count towards the total.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the ledger cannot be written or a
    /// payload's existence cannot be checked.
    #[tracing::instrument(skip(self), fields(older_than = ?filter.older_than, group = ?filter.group))]
    pub async fn purge_matching(&self, filter: &PurgeFilter) -> StorageResult<usize> {
        let now = self.clock.now();
        let txn = self.ledger.begin().await;

        let mut doomed = Vec::new();
        let mut dangling = 0usize;
        for meta in txn.current().values().filter(|m| filter.matches_group(m)) {
            if meta.age_at(now) >= filter.older_than {
                doomed.push(meta.clone());
            } else if !self.blobs.contains(meta.id, meta.format).await? {
                dangling += 1;
                doomed.push(meta.clone());
            }
        }

        if doomed.is_empty() {
            debug!("nothing to purge");
            return Ok(0);
        }

        let mut next = txn.current().clone();
        for meta in &doomed {
            next.remove(&meta.id);
        }
        txn.commit(next).await?;

        for meta in &doomed {
            self.remove_payload(meta).await;
        }

        info!(purged = doomed.len(), dangling, "purged artifacts");

        let mut metadata = BTreeMap::new();
        metadata.insert("purged".to_owned(), doomed.len().to_string());
        metadata.insert("older_than_secs".to_owned(), filter.older_than.as_secs().to_string());
        if let Some(group) = &filter.group {
            metadata.insert("group".to_owned(), group.clone());
        }
        self.audit
            .log(
                &AuditEvent::builder()
                    .timestamp(now)
                    .actor(SYSTEM_ACTOR)
                    .action(AuditAction::PurgeArtifacts)
                    .resource("artifacts")
                    .result(AuditResult::Success)
                    .metadata(metadata)
                    .build(),
            )
            .await;

        Ok(doomed.len())
    }

    /// Lists artifact metadata, optionally restricted to one group.
    ///
    /// The listing reads from a snapshot taken now: it is finite, it is not
    /// disturbed by concurrent stores or deletes, and
    /// [`rewind`](ArtifactListing::rewind) restarts it.
    #[must_use]
    pub fn list(&self, group: Option<&str>) -> ArtifactListing {
        ArtifactListing {
            snapshot: self.ledger.snapshot(),
            group: group.map(str::to_owned),
            cursor: None,
        }
    }

    /// Deletes payloads that have no ledger entry, plus partial payload
    /// writes older than [`STALE_TEMP_GRACE`]. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload store cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_orphans(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for (id, format) in self.blobs.list().await? {
            // Pending is checked first: a store publishes its ledger entry
            // before leaving the pending set.
            if self.pending.lock().contains(&id)
                || self.ledger.get(&id).is_some_and(|m| m.format == format)
            {
                continue;
            }
            match self.blobs.delete(id, format).await {
                Ok(true) => removed += 1,
                Ok(false) => {},
                Err(e) => warn!(%id, error = %e, "failed to delete orphaned payload"),
            }
        }
        removed += self.blobs.remove_stale_partials(STALE_TEMP_GRACE).await;
        if removed > 0 {
            info!(removed, "swept orphaned payloads");
        }
        Ok(removed)
    }

    async fn remove_payload(&self, meta: &ArtifactMetadata) {
        match self.blobs.delete(meta.id, meta.format).await {
            Ok(true) => {},
            Ok(false) => debug!(id = %meta.id, "payload already missing"),
            Err(e) => warn!(id = %meta.id, error = %e, "payload left orphaned after ledger removal"),
        }
    }

    async fn audit_event(
        &self,
        group: &str,
        action: AuditAction,
        id: ArtifactId,
        result: AuditResult,
    ) {
        let event = AuditEvent::builder()
            .timestamp(self.clock.now())
            .actor(group_actor(group))
            .action(action)
            .resource(artifact_resource(id))
            .result(result)
            .build();
        self.audit.log(&event).await;
    }
}

/// Lazy, restartable listing over a snapshot of the metadata ledger.
///
/// Yields entries in id order.
#[derive(Debug, Clone)]
pub struct ArtifactListing {
    snapshot: Arc<MetadataMap>,
    group: Option<String>,
    cursor: Option<ArtifactId>,
}

impl ArtifactListing {
    /// Restarts the listing from the beginning of the same snapshot.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }
}

impl Iterator for ArtifactListing {
    type Item = ArtifactMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        let lower = match self.cursor {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let group = self.group.as_deref();
        let next = self
            .snapshot
            .range((lower, Bound::Unbounded))
            .map(|(_, meta)| meta)
            .find(|meta| group.is_none_or(|g| g == meta.group))?
            .clone();
        self.cursor = Some(next.id);
        Some(next)
    }
}
