//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on artifact store and ledger operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use gplot_common_storage::{ArtifactFormat, ArtifactId, ArtifactStore, ManualClock};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn memory_store() -> ArtifactStore {
    ArtifactStore::in_memory(Arc::new(ManualClock::at_unix(1_700_000_000)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_and_get_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = memory_store();
    let id = store.store(b"png".to_vec(), "ops", ArtifactFormat::Png).await.expect("store");
    store.get(&id, "ops").await.expect("get");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "store"), "expected a 'store' span, got: {recorded:?}");
    assert!(recorded.iter().any(|s| s == "get"), "expected a 'get' span, got: {recorded:?}");
}

#[tokio::test]
async fn delete_creates_span_even_when_missing() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = memory_store();
    let _ = store.delete(&ArtifactId::generate(), "ops").await;

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "delete"), "expected a 'delete' span, got: {recorded:?}");
}

#[tokio::test]
async fn purge_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = memory_store();
    let _ = store.purge(std::time::Duration::ZERO).await;

    let recorded = spans.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|s| s == "purge_matching"),
        "expected a 'purge_matching' span, got: {recorded:?}"
    );
}

#[tokio::test]
async fn opening_a_file_store_creates_ledger_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().expect("tempdir");
    let config = gplot_common_storage::StorageConfig::builder()
        .data_dir(dir.path())
        .build()
        .expect("config");
    let store = ArtifactStore::open(&config, Arc::new(ManualClock::at_unix(1_700_000_000)))
        .await
        .expect("open");
    store.store(b"pdf".to_vec(), "ops", ArtifactFormat::Pdf).await.expect("store");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["open_with_audit", "load", "persist"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}
