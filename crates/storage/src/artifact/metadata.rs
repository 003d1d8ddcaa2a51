//! Artifact metadata and the ledger that indexes it.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::{
    clock::elapsed_between,
    error::StorageResult,
    ledger::{LedgerFile, LoadStatus, STALE_TEMP_GRACE},
    types::{ArtifactFormat, ArtifactId},
};

/// Metadata describing one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Unique artifact id.
    pub id: ArtifactId,
    /// Owning group. Never changes after creation.
    pub group: String,
    /// When the artifact was stored.
    pub created_at: DateTime<Utc>,
    /// Payload format.
    pub format: ArtifactFormat,
    /// Payload length in bytes.
    pub byte_length: u64,
}

impl ArtifactMetadata {
    /// MIME type of the payload.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Age of the artifact at `now` (zero if `now` precedes creation).
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.created_at, now)
    }

    fn to_record(&self) -> MetadataRecord {
        MetadataRecord {
            group: self.group.clone(),
            created_at: self.created_at,
            content_type: self.format,
            byte_length: self.byte_length,
        }
    }
}

/// On-disk form of an [`ArtifactMetadata`], keyed by id in the ledger.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataRecord {
    group: String,
    created_at: DateTime<Utc>,
    content_type: ArtifactFormat,
    byte_length: u64,
}

pub(crate) type MetadataMap = BTreeMap<ArtifactId, ArtifactMetadata>;

/// In-memory index of artifact metadata, optionally backed by a
/// [`LedgerFile`].
///
/// Readers take a cheap `Arc` snapshot and never wait on disk I/O.
/// Mutations run one at a time through [`MetadataLedger::begin`]: the
/// writer builds a new map, persists it, and only then publishes it.
#[derive(Debug)]
pub(crate) struct MetadataLedger {
    snapshot: RwLock<Arc<MetadataMap>>,
    writer: Mutex<()>,
    file: Option<LedgerFile>,
    load_status: LoadStatus,
}

impl MetadataLedger {
    /// Creates an empty ledger that lives only in memory.
    pub(crate) fn in_memory() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(BTreeMap::new())),
            writer: Mutex::new(()),
            file: None,
            load_status: LoadStatus::Missing,
        }
    }

    /// Loads the ledger from `file`, recovering from corruption.
    pub(crate) async fn open(file: LedgerFile) -> StorageResult<Self> {
        file.remove_stale_temp_files(STALE_TEMP_GRACE).await;
        let loaded = file.load::<MetadataRecord>().await?;

        let mut map = BTreeMap::new();
        for (key, record) in loaded.records {
            let Ok(id) = ArtifactId::parse(&key) else {
                warn!(key = %key, "skipping metadata record with malformed id");
                continue;
            };
            map.insert(
                id,
                ArtifactMetadata {
                    id,
                    group: record.group,
                    created_at: record.created_at,
                    format: record.content_type,
                    byte_length: record.byte_length,
                },
            );
        }

        Ok(Self {
            snapshot: RwLock::new(Arc::new(map)),
            writer: Mutex::new(()),
            file: Some(file),
            load_status: loaded.status,
        })
    }

    pub(crate) fn load_status(&self) -> &LoadStatus {
        &self.load_status
    }

    /// Returns the current published map.
    pub(crate) fn snapshot(&self) -> Arc<MetadataMap> {
        Arc::clone(&self.snapshot.read())
    }

    pub(crate) fn get(&self, id: &ArtifactId) -> Option<ArtifactMetadata> {
        self.snapshot.read().get(id).cloned()
    }

    /// Starts a mutation. Only one is in flight at a time; the returned
    /// guard sees the latest published map.
    pub(crate) async fn begin(&self) -> LedgerTxn<'_> {
        let guard = self.writer.lock().await;
        LedgerTxn { ledger: self, base: self.snapshot(), _guard: guard }
    }
}

/// An exclusive mutation of a [`MetadataLedger`].
///
/// Dropping it without calling [`commit`](Self::commit) leaves the ledger
/// unchanged.
pub(crate) struct LedgerTxn<'a> {
    ledger: &'a MetadataLedger,
    base: Arc<MetadataMap>,
    _guard: MutexGuard<'a, ()>,
}

impl LedgerTxn<'_> {
    /// The map as of the start of this mutation.
    pub(crate) fn current(&self) -> &MetadataMap {
        &self.base
    }

    /// Persists `next` and publishes it. If persistence fails the
    /// published map is left as it was.
    pub(crate) async fn commit(self, next: MetadataMap) -> StorageResult<()> {
        if let Some(file) = &self.ledger.file {
            let records: BTreeMap<String, MetadataRecord> =
                next.iter().map(|(id, meta)| (id.to_string(), meta.to_record())).collect();
            file.persist(&records).await?;
        }
        *self.ledger.snapshot.write() = Arc::new(next);
        Ok(())
    }
}
