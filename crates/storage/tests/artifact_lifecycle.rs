//! End-to-end artifact store behavior against the on-disk layout.

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use gplot_common_storage::{
    ArtifactFormat, ArtifactId, ArtifactStore, ManualClock, PurgeFilter, STALE_TEMP_GRACE,
    StorageConfig, StorageError,
};
use rstest::rstest;

async fn open(dir: &Path, clock: Arc<ManualClock>) -> ArtifactStore {
    let config = StorageConfig::builder().data_dir(dir).build().expect("config");
    ArtifactStore::open(&config, clock).await.expect("open")
}

fn payload_path(dir: &Path, id: &ArtifactId, format: ArtifactFormat) -> std::path::PathBuf {
    dir.join("blobs").join(format!("{id}.{}", format.extension()))
}

#[rstest]
#[case(ArtifactFormat::Png)]
#[case(ArtifactFormat::Jpg)]
#[case(ArtifactFormat::Jpeg)]
#[case(ArtifactFormat::Svg)]
#[case(ArtifactFormat::Pdf)]
#[tokio::test]
async fn payload_file_is_named_by_id_and_extension(#[case] format: ArtifactFormat) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(dir.path(), Arc::new(ManualClock::at_unix(0))).await;

    let id = store.store(b"bytes".to_vec(), "ops", format).await.expect("store");
    assert!(payload_path(dir.path(), &id, format).exists());
}

#[tokio::test]
async fn ledger_records_group_time_type_and_length() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(dir.path(), Arc::new(ManualClock::at_unix(1_700_000_000))).await;
    let id = store.store(vec![7u8; 42], "finance", ArtifactFormat::Svg).await.expect("store");

    let raw: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("metadata.json")).expect("read ledger"),
    )
    .expect("ledger is JSON");
    let record = &raw[id.to_string()];
    assert_eq!(record["group"], "finance");
    assert_eq!(record["content_type"], "svg");
    assert_eq!(record["byte_length"], 42);
    assert!(record["created_at"].as_str().expect("timestamp").starts_with("2023-11-14"));
}

#[tokio::test]
async fn purge_tolerates_payloads_already_gone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::at_unix(1_000));
    let store = open(dir.path(), clock.clone()).await;

    let a = store.store(b"a".to_vec(), "ops", ArtifactFormat::Png).await.expect("store");
    let b = store.store(b"b".to_vec(), "ops", ArtifactFormat::Png).await.expect("store");
    std::fs::remove_file(payload_path(dir.path(), &a, ArtifactFormat::Png)).expect("remove");

    clock.advance(Duration::from_secs(3600));
    assert_eq!(store.purge(Duration::from_secs(60)).await.expect("purge"), 2);
    assert!(!store.exists(&a));
    assert!(!store.exists(&b));
}

#[tokio::test]
async fn purge_drops_young_entries_whose_payload_is_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(dir.path(), Arc::new(ManualClock::at_unix(1_000))).await;

    let dangling = store.store(b"x".to_vec(), "ops", ArtifactFormat::Pdf).await.expect("store");
    let healthy = store.store(b"y".to_vec(), "ops", ArtifactFormat::Pdf).await.expect("store");
    std::fs::remove_file(payload_path(dir.path(), &dangling, ArtifactFormat::Pdf))
        .expect("remove");

    // A dangling entry reads as not found rather than as an I/O failure.
    assert!(matches!(store.get(&dangling, "ops").await, Err(StorageError::NotFound { .. })));

    assert_eq!(store.purge(Duration::from_secs(3600)).await.expect("purge"), 1);
    assert!(!store.exists(&dangling));
    assert!(store.exists(&healthy));
}

#[tokio::test]
async fn purge_by_group_leaves_other_groups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::at_unix(1_000));
    let store = open(dir.path(), clock.clone()).await;

    for group in ["finance", "finance", "ops"] {
        store.store(b"p".to_vec(), group, ArtifactFormat::Png).await.expect("store");
    }
    clock.advance(Duration::from_secs(120));

    let filter = PurgeFilter::older_than(Duration::from_secs(60)).in_group("finance");
    assert_eq!(store.purge_matching(&filter).await.expect("purge"), 2);
    assert_eq!(store.list(None).map(|m| m.group).collect::<Vec<_>>(), vec!["ops".to_owned()]);
}

#[tokio::test]
async fn sweep_removes_only_unreferenced_payloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(dir.path(), Arc::new(ManualClock::at_unix(0))).await;
    let id = store.store(b"live".to_vec(), "ops", ArtifactFormat::Png).await.expect("store");

    let orphan = ArtifactId::generate();
    std::fs::write(payload_path(dir.path(), &orphan, ArtifactFormat::Svg), b"orphan")
        .expect("write orphan");
    std::fs::write(dir.path().join("blobs").join("README"), b"not a payload").expect("write");

    assert_eq!(store.sweep_orphans().await.expect("sweep"), 1);
    assert!(payload_path(dir.path(), &id, ArtifactFormat::Png).exists());
    assert!(!payload_path(dir.path(), &orphan, ArtifactFormat::Svg).exists());
    assert!(dir.path().join("blobs").join("README").exists());
}

#[tokio::test]
async fn sweep_removes_partial_payload_writes_after_grace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open(dir.path(), Arc::new(ManualClock::at_unix(0))).await;
    let id = store.store(b"live".to_vec(), "ops", ArtifactFormat::Png).await.expect("store");

    // Partial writes as a crash mid-put leaves them.
    let blobs = dir.path().join("blobs");
    let crashed = blobs.join(format!(".{}.png.0badc0de.tmp", ArtifactId::generate()));
    let in_flight = blobs.join(format!(".{}.svg.0ddba11.tmp", ArtifactId::generate()));
    std::fs::write(&crashed, b"half a png").expect("write");
    std::fs::write(&in_flight, b"half an svg").expect("write");
    std::fs::File::options()
        .write(true)
        .open(&crashed)
        .and_then(|f| f.set_modified(SystemTime::now() - STALE_TEMP_GRACE * 2))
        .expect("backdate");

    assert_eq!(store.sweep_orphans().await.expect("sweep"), 1);
    assert!(!crashed.exists());
    assert!(in_flight.exists(), "a write still in flight must survive");
    assert!(store.get(&id, "ops").await.is_ok());
}

#[tokio::test]
async fn malformed_id_is_distinct_from_missing() {
    assert!(matches!(ArtifactId::parse("../metadata.json"), Err(StorageError::InvalidId { .. })));
}

#[tokio::test]
async fn oversized_payload_touches_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig::builder()
        .data_dir(dir.path())
        .max_artifact_size(8)
        .build()
        .expect("config");
    let store = ArtifactStore::open(&config, Arc::new(ManualClock::at_unix(0))).await.expect("open");

    let result = store.store(vec![0u8; 9], "ops", ArtifactFormat::Png).await;
    assert!(matches!(result, Err(StorageError::SizeLimitExceeded { .. })));
    assert!(!dir.path().join("blobs").exists());
    assert!(!dir.path().join("metadata.json").exists());
}
