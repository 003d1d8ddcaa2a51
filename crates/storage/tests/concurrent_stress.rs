//! Concurrent access tests for the artifact store and the rate limiter.
//!
//! These exercise the public operations from many tasks at once on a
//! multi-threaded runtime to catch lost updates, id collisions, and
//! cross-contaminated payloads.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use gplot_common_storage::{
    ArtifactFormat, ArtifactId, ArtifactStore, ManualClock, RateLimitConfig, RateLimiter,
    RateLimiterConfig, StorageConfig, StorageError,
};
use tokio::task::JoinSet;

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of artifacts each task stores.
const OPS_PER_TASK: usize = 10;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_payload(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-art{seq:03}").into_bytes()
}

async fn file_store(dir: &std::path::Path) -> Arc<ArtifactStore> {
    let config = StorageConfig::builder().data_dir(dir).build().expect("config");
    let store = ArtifactStore::open(&config, Arc::new(ManualClock::at_unix(1_700_000_000)))
        .await
        .expect("open");
    Arc::new(store)
}

// ---------------------------------------------------------------------------
// Test: parallel stores get distinct ids and keep their own bytes
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_stores_never_collide_or_mix_payloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(dir.path()).await;

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let mut written = Vec::with_capacity(OPS_PER_TASK);
            for seq in 0..OPS_PER_TASK {
                let payload = make_payload(task, seq);
                let id = store
                    .store(payload.clone(), &format!("group-{}", task % 4), ArtifactFormat::Png)
                    .await
                    .expect("store should succeed");
                written.push((id, task, payload));
            }
            written
        });
    }

    let mut all = Vec::new();
    while let Some(result) = set.join_next().await {
        all.extend(result.expect("task panicked"));
    }

    let ids: HashSet<ArtifactId> = all.iter().map(|(id, _, _)| *id).collect();
    assert_eq!(ids.len(), CONCURRENCY * OPS_PER_TASK, "every store must yield a fresh id");
    assert_eq!(store.len(), CONCURRENCY * OPS_PER_TASK);

    for (id, task, payload) in &all {
        let artifact =
            store.get(id, &format!("group-{}", task % 4)).await.expect("get should succeed");
        assert_eq!(&artifact.bytes[..], &payload[..], "payload mismatch for {id}");
    }

    // Nothing was lost between the in-memory index and the ledger file.
    drop(store);
    let reopened = file_store(dir.path()).await;
    assert_eq!(reopened.len(), CONCURRENCY * OPS_PER_TASK);
    assert_eq!(reopened.sweep_orphans().await.expect("sweep"), 0);
}

// ---------------------------------------------------------------------------
// Test: mixed store/delete/list/purge workload
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_workload_keeps_ledger_consistent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(dir.path()).await;

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let group = format!("tenant-{task}");
            let mut kept = 0usize;
            for seq in 0..OPS_PER_TASK {
                let id = store
                    .store(make_payload(task, seq), &group, ArtifactFormat::Svg)
                    .await
                    .expect("store should succeed");
                if seq % 2 == 0 {
                    store.delete(&id, &group).await.expect("delete should succeed");
                } else {
                    kept += 1;
                }
                // Listings never observe a half-applied mutation.
                for meta in store.list(Some(group.as_str())) {
                    assert_eq!(meta.group, group);
                }
            }
            (group, kept)
        });
    }

    let mut expected_total = 0;
    let mut groups = Vec::new();
    while let Some(result) = set.join_next().await {
        let (group, kept) = result.expect("task panicked");
        expected_total += kept;
        groups.push((group, kept));
    }

    assert_eq!(store.len(), expected_total);
    for (group, kept) in groups {
        assert_eq!(store.list(Some(group.as_str())).count(), kept);
    }

    assert_eq!(store.purge(Duration::ZERO).await.expect("purge"), expected_total);
    assert!(store.is_empty());
}

// ---------------------------------------------------------------------------
// Test: cross-group access under contention
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cross_group_reads_are_denied() {
    let store = Arc::new(ArtifactStore::in_memory(Arc::new(ManualClock::at_unix(0))));
    let id = store.store(b"secret".to_vec(), "finance", ArtifactFormat::Pdf).await.expect("store");

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let group = if task % 2 == 0 { "finance" } else { "ops" };
            (group, store.get(&id, group).await)
        });
    }

    while let Some(result) = set.join_next().await {
        match result.expect("task panicked") {
            ("finance", Ok(artifact)) => assert_eq!(&artifact.bytes[..], b"secret"),
            ("ops", Err(StorageError::PermissionDenied { .. })) => {},
            (group, other) => panic!("unexpected outcome for {group}: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Test: one hot key admits exactly its capacity
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hot_bucket_admits_exactly_capacity() {
    const CAPACITY: u32 = 50;
    let config = RateLimiterConfig::builder()
        .default_limit(RateLimitConfig::new(CAPACITY, Duration::from_secs(3600)).expect("shape"))
        .build();
    let limiter = Arc::new(RateLimiter::new(config, Arc::new(ManualClock::at_unix(0))));

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let limiter = Arc::clone(&limiter);
        set.spawn(async move {
            let mut admitted = 0u32;
            for _ in 0..10 {
                if limiter.check("10.0.0.1", "render").is_ok() {
                    admitted += 1;
                }
            }
            admitted
        });
    }

    let mut admitted = 0;
    while let Some(result) = set.join_next().await {
        admitted += result.expect("task panicked");
    }
    assert_eq!(admitted, CAPACITY);

    let stats = limiter.stats();
    assert_eq!(stats.allowed, u64::from(CAPACITY));
    assert_eq!(stats.rejected, (CONCURRENCY as u64 * 10) - u64::from(CAPACITY));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_clients_do_not_share_buckets() {
    let config = RateLimiterConfig::builder()
        .default_limit(RateLimitConfig::new(3, Duration::from_secs(3600)).expect("shape"))
        .build();
    let limiter = Arc::new(RateLimiter::new(config, Arc::new(ManualClock::at_unix(0))));

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let limiter = Arc::clone(&limiter);
        set.spawn(async move {
            let client = format!("client-{task}");
            (0..5).filter(|_| limiter.check(&client, "render").is_ok()).count()
        });
    }

    while let Some(result) = set.join_next().await {
        assert_eq!(result.expect("task panicked"), 3);
    }
    assert_eq!(limiter.stats().clients, CONCURRENCY);
}
