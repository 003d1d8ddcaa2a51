//! Durable record of issued and revoked token ids.
//!
//! Every issued id is tracked with its owning group and expiry. Revoking
//! flips a flag; records are pruned once the token they describe has
//! expired, since an expired token is rejected regardless.
//!
//! The ledger follows the same discipline as the artifact metadata ledger:
//! lookups read an `Arc` snapshot without waiting on disk I/O, and
//! mutations run one at a time, building the next map off to the side,
//! persisting it whole, and only then publishing it.
//!
//! Several processes may share one ledger file. A mutation holds the
//! file's cross-process lock, merges the current file into its view, then
//! applies the change and persists. Merging never forgets a record and
//! never un-revokes one: the union of ids is kept and a revoked flag on
//! either side wins.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    path::Path,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use gplot_common_storage::{Clock, FileStamp, LedgerFile, LoadStatus, STALE_TEMP_GRACE};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AuthError, Result};

/// Ledger entry for one issued token id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Group the token was issued to.
    pub group: String,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
    /// Whether the token has been revoked.
    #[serde(default)]
    pub revoked: bool,
    /// When the token was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RevocationRecord {
    /// Creates an unrevoked record.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self { group: group.into(), created_at, expires_at, revoked: false, revoked_at: None }
    }

    /// Returns `true` once `now` reaches the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A tracked token id with its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedToken {
    /// Token id.
    pub id: String,
    /// Ledger record.
    pub record: RevocationRecord,
}

/// Result of looking up a token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Tracked and not revoked.
    Active,
    /// Tracked and revoked.
    Revoked,
    /// Not tracked.
    Unknown,
}

type RevocationMap = BTreeMap<String, RevocationRecord>;

/// Folds the records of another view of the ledger into `ours`.
fn merge(ours: &mut RevocationMap, theirs: RevocationMap) {
    for (id, their_record) in theirs {
        match ours.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(their_record);
            },
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if their_record.revoked && !record.revoked {
                    record.revoked = true;
                    record.revoked_at = their_record.revoked_at;
                }
            },
        }
    }
}

/// Token id ledger, optionally persisted to a [`LedgerFile`].
#[derive(Debug)]
pub struct RevocationLedger {
    snapshot: RwLock<Arc<RevocationMap>>,
    writer: Mutex<()>,
    file: Option<LedgerFile>,
    /// Version of the ledger file this view last synchronized with.
    seen: SyncMutex<Option<FileStamp>>,
    clock: Arc<dyn Clock>,
    load_status: LoadStatus,
}

impl RevocationLedger {
    /// Creates an empty ledger that lives only in memory.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(BTreeMap::new())),
            writer: Mutex::new(()),
            file: None,
            seen: SyncMutex::new(None),
            clock,
            load_status: LoadStatus::Missing,
        }
    }

    /// Loads the ledger at `path`. A corrupt file is quarantined and the
    /// ledger starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file exists but cannot be read.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let file = LedgerFile::new(path.as_ref(), Arc::clone(&clock));
        file.remove_stale_temp_files(STALE_TEMP_GRACE).await;
        let loaded = file.load::<RevocationRecord>().await?;
        info!(tokens = loaded.records.len(), "revocation ledger opened");

        Ok(Self {
            snapshot: RwLock::new(Arc::new(loaded.records)),
            writer: Mutex::new(()),
            file: Some(file),
            seen: SyncMutex::new(loaded.stamp),
            clock,
            load_status: loaded.status,
        })
    }

    /// How the ledger loaded at open.
    #[must_use]
    pub fn load_status(&self) -> &LoadStatus {
        &self.load_status
    }

    /// Number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Returns `true` if no ids are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up `id` in the current snapshot.
    #[must_use]
    pub fn lookup(&self, id: &str) -> RevocationStatus {
        match self.snapshot.read().get(id) {
            Some(record) if record.revoked => RevocationStatus::Revoked,
            Some(_) => RevocationStatus::Active,
            None => RevocationStatus::Unknown,
        }
    }

    /// Returns the record for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RevocationRecord> {
        self.snapshot.read().get(id).cloned()
    }

    /// Tracked ids, optionally restricted to one group, in id order.
    #[must_use]
    pub fn records(&self, group: Option<&str>) -> Vec<TrackedToken> {
        self.snapshot
            .read()
            .iter()
            .filter(|(_, record)| group.is_none_or(|g| record.group == g))
            .map(|(id, record)| TrackedToken { id: id.clone(), record: record.clone() })
            .collect()
    }

    /// Starts tracking a newly issued id. Expired records are pruned in the
    /// same write.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidArgument`] if `id` is already tracked,
    /// or [`AuthError::Storage`] if the ledger cannot be persisted.
    pub async fn track(&self, id: &str, record: RevocationRecord) -> Result<()> {
        let now = self.clock.now();
        self.mutate(|map| {
            let before = map.len();
            map.retain(|_, r| !r.is_expired_at(now));
            let pruned = before - map.len();
            if pruned > 0 {
                debug!(pruned, "pruned expired token records");
            }
            if map.contains_key(id) {
                return Err(AuthError::invalid_argument(format!(
                    "token id '{id}' is already issued"
                )));
            }
            map.insert(id.to_owned(), record);
            Ok(((), true))
        })
        .await
    }

    /// Marks `id` revoked.
    ///
    /// Returns `true` if the id was tracked and not already revoked.
    /// Unknown and already-revoked ids are a no-op and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let now = self.clock.now();
        self.mutate(|map| match map.get_mut(id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.revoked_at = Some(now);
                Ok((true, true))
            },
            _ => Ok((false, false)),
        })
        .await
    }

    /// Revokes every tracked, unexpired, unrevoked id of `group`.
    ///
    /// Returns the number of ids revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    pub async fn revoke_group(&self, group: &str) -> Result<usize> {
        let now = self.clock.now();
        self.mutate(|map| {
            let mut revoked = 0;
            for record in map.values_mut() {
                if record.group == group && !record.revoked && !record.is_expired_at(now) {
                    record.revoked = true;
                    record.revoked_at = Some(now);
                    revoked += 1;
                }
            }
            Ok((revoked, revoked > 0))
        })
        .await
    }

    /// Removes records whose token has expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the ledger cannot be persisted.
    pub async fn prune_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        self.mutate(|map| {
            let before = map.len();
            map.retain(|_, r| !r.is_expired_at(now));
            let pruned = before - map.len();
            Ok((pruned, pruned > 0))
        })
        .await
    }

    /// Re-reads the ledger file and merges it into this view, picking up
    /// ids issued or revoked by other processes sharing it. Nothing known
    /// locally is dropped. A no-op for in-memory ledgers.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file exists but cannot be read.
    pub async fn reload(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let _guard = self.writer.lock().await;
        let loaded = file.load::<RevocationRecord>().await?;
        let mut next = RevocationMap::clone(&self.snapshot.read());
        merge(&mut next, loaded.records);
        debug!(tokens = next.len(), "revocation ledger reloaded");
        *self.snapshot.write() = Arc::new(next);
        *self.seen.lock() = loaded.stamp;
        Ok(())
    }

    /// Reloads if the ledger file was replaced since this view last read
    /// or wrote it. Returns `true` if a reload happened.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file cannot be inspected or
    /// read.
    pub async fn refresh(&self) -> Result<bool> {
        let Some(file) = &self.file else {
            return Ok(false);
        };
        let seen = self.seen.lock().clone();
        if !file.changed_since(seen.as_ref()).await? {
            return Ok(false);
        }
        self.reload().await?;
        Ok(true)
    }

    /// Applies `f` to the current map merged with the file on disk. When
    /// `f` reports a change the result is persisted and then published;
    /// otherwise nothing is written.
    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut RevocationMap) -> Result<(R, bool)>,
    ) -> Result<R> {
        let _guard = self.writer.lock().await;
        let mut next = RevocationMap::clone(&self.snapshot.read());

        let Some(file) = &self.file else {
            let (result, changed) = f(&mut next)?;
            if changed {
                *self.snapshot.write() = Arc::new(next);
            }
            return Ok(result);
        };

        let _file_lock = file.lock().await?;
        let loaded = file.load::<RevocationRecord>().await?;
        merge(&mut next, loaded.records);

        let (result, changed) = f(&mut next)?;
        let stamp = if changed {
            file.persist(&next).await?;
            // Still under the file lock, so this is the version just written.
            file.stamp().await.ok().flatten()
        } else {
            loaded.stamp
        };
        *self.snapshot.write() = Arc::new(next);
        *self.seen.lock() = stamp;
        Ok(result)
    }
}
