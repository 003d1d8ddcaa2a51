//! Durable, whole-file ledgers.
//!
//! A ledger is a JSON object mapping record keys to records. It is never
//! edited in place: every persist writes a complete new file next to the
//! old one, fsyncs it, and renames it over the original, so a reader (or a
//! process restarting after a crash) sees either the previous ledger or the
//! new one, never a torn mix.
//!
//! Loading is forgiving. A file that cannot be parsed at all is moved aside
//! to `<name>.corrupt-<unix-seconds>` and the ledger starts empty; a file
//! whose top level parses but that contains malformed records keeps the
//! valid records and skips the rest.
//!
//! Processes sharing one ledger file serialize their read-modify-write
//! cycles through [`LedgerFile::lock`], an exclusive `<name>.lock` file
//! next to the ledger.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use fail::fail_point;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::{StorageError, StorageResult},
};

/// Temp files younger than this may belong to a write still in flight and
/// are never swept.
pub const STALE_TEMP_GRACE: Duration = Duration::from_secs(60);

/// A lock file older than this is assumed to belong to a dead process.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// How a ledger load went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// No ledger file existed; the ledger starts empty.
    Missing,
    /// The file was parsed. `skipped` counts malformed records that were
    /// dropped.
    Loaded {
        /// Records that failed to decode.
        skipped: usize,
    },
    /// The file could not be parsed and the ledger was rebuilt empty.
    Recovered {
        /// Where the corrupt bytes were moved, if the move succeeded.
        quarantined_to: Option<PathBuf>,
        /// Parser error that triggered recovery.
        reason: String,
    },
}

impl LoadStatus {
    /// Returns `true` if the ledger was rebuilt after corruption.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Identity of one version of a ledger file.
///
/// Every persist renames a fresh file into place, so a stamp that differs
/// from the one taken at the last load means another writer replaced the
/// ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    #[cfg(unix)]
    inode: u64,
}

impl FileStamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;

        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            #[cfg(unix)]
            inode: meta.ino(),
        }
    }
}

/// Records read from a ledger file, plus how the load went.
#[derive(Debug)]
pub struct Loaded<T> {
    /// Decoded records by key.
    pub records: BTreeMap<String, T>,
    /// Load outcome.
    pub status: LoadStatus,
    /// Version of the file that was read. `None` if there was no file.
    pub stamp: Option<FileStamp>,
}

/// Exclusive hold on a ledger file across processes. Released on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LedgerLock {
    path: PathBuf,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release ledger lock");
        }
    }
}

/// A ledger persisted as a single JSON file.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LedgerFile {
    /// Creates a handle for the ledger at `path`. Nothing is read or
    /// written until [`load`](Self::load) or [`persist`](Self::persist).
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { path: path.into(), clock }
    }

    /// Returns the ledger path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the ledger.
    ///
    /// Corruption is recovered locally and reported through
    /// [`LoadStatus::Recovered`]; only I/O failures other than "file not
    /// found" are returned as errors.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load<T: DeserializeOwned>(&self) -> StorageResult<Loaded<T>> {
        let (bytes, stamp) = match self.read_versioned().await {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("ledger file does not exist, starting empty");
                return Ok(Loaded {
                    records: BTreeMap::new(),
                    status: LoadStatus::Missing,
                    stamp: None,
                });
            },
            Err(e) => {
                return Err(StorageError::io_with_source(
                    format!("failed to read ledger {}", self.path.display()),
                    e,
                ));
            },
        };

        let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(&bytes)
        {
            Ok(raw) => raw,
            Err(e) => {
                let reason = if bytes.is_empty() { "empty file".to_owned() } else { e.to_string() };
                let quarantined_to = self.quarantine().await;
                warn!(
                    path = %self.path.display(),
                    quarantined_to = ?quarantined_to,
                    error = %reason,
                    "ledger file is corrupt, recovered to an empty ledger"
                );
                return Ok(Loaded {
                    records: BTreeMap::new(),
                    status: LoadStatus::Recovered { quarantined_to, reason },
                    stamp: None,
                });
            },
        };

        let mut records = BTreeMap::new();
        let mut skipped = 0;
        for (key, value) in raw {
            match serde_json::from_value::<T>(value) {
                Ok(record) => {
                    records.insert(key, record);
                },
                Err(e) => {
                    skipped += 1;
                    warn!(key = %key, error = %e, "skipping malformed ledger record");
                },
            }
        }

        debug!(records = records.len(), skipped, "ledger loaded");
        Ok(Loaded { records, status: LoadStatus::Loaded { skipped }, stamp: Some(stamp) })
    }

    /// Reads the file and its stamp through one handle, so the stamp
    /// describes exactly the bytes returned.
    async fn read_versioned(&self) -> io::Result<(Vec<u8>, FileStamp)> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let stamp = FileStamp::of(&file.metadata().await?);
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        Ok((bytes, stamp))
    }

    /// Current version of the file on disk, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be inspected.
    pub async fn stamp(&self) -> StorageResult<Option<FileStamp>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(Some(FileStamp::of(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io_with_source(
                format!("failed to stat ledger {}", self.path.display()),
                e,
            )),
        }
    }

    /// Returns `true` if the file on disk is no longer the version `seen`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be inspected.
    pub async fn changed_since(&self, seen: Option<&FileStamp>) -> StorageResult<bool> {
        Ok(self.stamp().await?.as_ref() != seen)
    }

    /// Replaces the ledger on disk with `records`.
    ///
    /// On error the previous file is left untouched. Callers sharing the
    /// file with other processes hold [`lock`](Self::lock) across their
    /// load, merge and persist.
    #[tracing::instrument(skip(self, records), fields(path = %self.path.display(), records = records.len()))]
    pub async fn persist<T: Serialize>(&self, records: &BTreeMap<String, T>) -> StorageResult<()> {
        fail_point!("ledger-persist", |_| {
            Err(StorageError::internal("injected failure at ledger-persist"))
        });

        let bytes = serde_json::to_vec_pretty(records).map_err(|e| {
            StorageError::serialization_with_source(
                format!("failed to encode ledger {}", self.path.display()),
                e,
            )
        })?;
        write_atomic(&self.path, &bytes).await
    }

    /// Takes the cross-process lock on this ledger, waiting for another
    /// holder to release it.
    ///
    /// A lock file older than [`STALE_LOCK_AFTER`] is broken.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the lock cannot be created or is
    /// still held by a live process after ten seconds.
    pub async fn lock(&self) -> StorageResult<LedgerLock> {
        let path = self.sibling(".lock");
        let dir = parent_dir(&self.path);
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            StorageError::io_with_source(format!("failed to create directory {}", dir.display()), e)
        })?;

        let deadline = tokio::time::Instant::now() + LOCK_TIMEOUT;
        loop {
            match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok(LedgerLock { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_older_than(&path, STALE_LOCK_AFTER).await {
                        warn!(path = %path.display(), "breaking stale ledger lock");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StorageError::io(format!(
                            "timed out waiting for ledger lock {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                },
                Err(e) => {
                    return Err(StorageError::io_with_source(
                        format!("failed to create ledger lock {}", path.display()),
                        e,
                    ));
                },
            }
        }
    }

    /// Removes temp files left by persists that crashed before their
    /// rename. Only files older than `grace` are touched, so a write in
    /// flight in another process is left alone. Returns the number removed.
    pub async fn remove_stale_temp_files(&self, grace: Duration) -> usize {
        let Some(name) = self.path.file_name() else {
            return 0;
        };
        let prefix = format!(".{}.", name.to_string_lossy());
        remove_stale_temp_files(parent_dir(&self.path), &prefix, grace).await
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    async fn quarantine(&self) -> Option<PathBuf> {
        let mut target = self.sibling(&format!(".corrupt-{}", self.clock.unix_seconds()));
        if tokio::fs::try_exists(&target).await.unwrap_or(true) {
            // Never rename over an earlier forensic copy.
            let mut name = target.file_name().unwrap_or_default().to_os_string();
            name.push(format!("-{}", uuid::Uuid::new_v4().simple()));
            target = target.with_file_name(name);
        }
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to quarantine corrupt ledger");
                None
            },
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

async fn is_older_than(path: &Path, age: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed > age)
}

/// Removes `<prefix>*.tmp` files in `dir` older than `grace`.
pub(crate) async fn remove_stale_temp_files(dir: &Path, prefix: &str, grace: Duration) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !(file_name.starts_with(prefix) && file_name.ends_with(".tmp")) {
            continue;
        }
        if !is_older_than(&entry.path(), grace).await {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!(file = %file_name, "removed stale temp file");
                removed += 1;
            },
            Err(e) => debug!(file = %file_name, error = %e, "failed to remove stale temp file"),
        }
    }
    removed
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename over the target, then fsync the directory.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = parent_dir(path);
    let name = path
        .file_name()
        .ok_or_else(|| StorageError::io(format!("{} has no file name", path.display())))?;

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        StorageError::io_with_source(format!("failed to create directory {}", dir.display()), e)
    })?;

    let temp_path =
        dir.join(format!(".{}.{}.tmp", name.to_string_lossy(), uuid::Uuid::new_v4().simple()));

    if let Err(e) = write_and_sync(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::io_with_source(
            format!("failed to write temp file {}", temp_path.display()),
            e,
        ));
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::io_with_source(
            format!("failed to rename temp file over {}", path.display()),
            e,
        ));
    }

    sync_dir(dir).await;
    Ok(())
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Makes a completed rename durable. Best-effort: not every platform
/// allows opening a directory.
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        match tokio::fs::File::open(dir).await {
            Ok(handle) => {
                if let Err(e) = handle.sync_all().await {
                    debug!(dir = %dir.display(), error = %e, "directory fsync failed");
                }
            },
            Err(e) => debug!(dir = %dir.display(), error = %e, "failed to open directory for fsync"),
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
