//! Tokens, rate limits, and artifact storage wired together the way a
//! front end uses them: verify the token, admit the request, then scope
//! every artifact operation to the verified group.
#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use gplot_common_authn::{AuthConfig, IssueRequest, TokenService};
use gplot_common_storage::{
    ArtifactFormat, ArtifactStore, ManualClock, RateLimitConfig, RateLimiter, RateLimiterConfig,
    StorageConfig, StorageError, assert_not_found, assert_permission_denied,
};

const START: i64 = 1_700_000_000;

struct Backend {
    tokens: TokenService,
    limiter: RateLimiter,
    artifacts: ArtifactStore,
    clock: Arc<ManualClock>,
    _dir: tempfile::TempDir,
}

async fn backend() -> Backend {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::at_unix(START));

    let auth = AuthConfig::builder()
        .secret("isolation-test-secret-0123456789")
        .ledger_path(dir.path().join("tokens.json"))
        .build()
        .expect("auth config");
    let tokens = TokenService::new(auth, clock.clone()).await.expect("token service");

    let limiter = RateLimiter::new(
        RateLimiterConfig::builder()
            .default_limit(RateLimitConfig::new(100, Duration::from_secs(60)).expect("limit"))
            .build(),
        clock.clone(),
    );
    limiter
        .configure_endpoint("render", 3, Duration::from_secs(60))
        .expect("configure render");

    let storage = StorageConfig::builder().data_dir(dir.path().join("data")).build().expect("cfg");
    let artifacts = ArtifactStore::open(&storage, clock.clone()).await.expect("artifact store");

    Backend { tokens, limiter, artifacts, clock, _dir: dir }
}

async fn token_for(backend: &Backend, group: &str) -> String {
    backend
        .tokens
        .issue(IssueRequest::builder().group(group).ttl(Duration::from_secs(60)).build())
        .await
        .expect("issue")
        .token
}

#[tokio::test]
async fn finance_artifact_is_invisible_to_ops() {
    let backend = backend().await;
    let finance_token = token_for(&backend, "finance").await;
    let ops_token = token_for(&backend, "ops").await;

    let finance = backend.tokens.verify(&finance_token, None).await.expect("finance verifies");
    let id = backend
        .artifacts
        .store(b"<svg>q3 revenue</svg>".to_vec(), &finance.group, ArtifactFormat::Svg)
        .await
        .expect("store");

    let again = backend.tokens.verify(&finance_token, None).await.expect("finance verifies");
    let artifact = backend.artifacts.get(&id, &again.group).await.expect("finance reads");
    assert_eq!(&artifact.bytes[..], b"<svg>q3 revenue</svg>");

    let ops = backend.tokens.verify(&ops_token, None).await.expect("ops verifies");
    assert_permission_denied!(backend.artifacts.get(&id, &ops.group).await);
    assert_permission_denied!(backend.artifacts.delete(&id, &ops.group).await);
    assert!(backend.artifacts.exists(&id), "a denied delete must leave the artifact");

    assert_eq!(backend.artifacts.list(Some(ops.group.as_str())).count(), 0);
    assert_eq!(backend.artifacts.list(Some(finance.group.as_str())).count(), 1);
}

#[tokio::test]
async fn group_claim_is_case_sensitive() {
    let backend = backend().await;
    let upper = backend
        .tokens
        .verify(&token_for(&backend, "Finance").await, None)
        .await
        .expect("verify");
    let id = backend
        .artifacts
        .store(b"%PDF-1.7".to_vec(), "finance", ArtifactFormat::Pdf)
        .await
        .expect("store");

    assert_permission_denied!(backend.artifacts.get(&id, &upper.group).await);
}

#[tokio::test]
async fn revoking_a_group_cuts_off_its_artifacts() {
    let backend = backend().await;
    let token = token_for(&backend, "finance").await;
    let group = backend.tokens.verify(&token, None).await.expect("verify").group;
    let id = backend
        .artifacts
        .store(b"png".to_vec(), &group, ArtifactFormat::Png)
        .await
        .expect("store");

    assert_eq!(backend.tokens.revoke_group("finance").await.expect("revoke group"), 1);
    assert!(backend.tokens.verify(&token, None).await.is_err());
    // The artifact is still there for a freshly issued token.
    let fresh = token_for(&backend, "finance").await;
    let group = backend.tokens.verify(&fresh, None).await.expect("fresh token").group;
    assert!(backend.artifacts.get(&id, &group).await.is_ok());
}

#[tokio::test]
async fn render_endpoint_is_rate_limited_per_client() {
    let backend = backend().await;
    let token = token_for(&backend, "ops").await;
    let client = backend.tokens.verify(&token, None).await.expect("verify").group;

    for _ in 0..3 {
        backend.limiter.check(&client, "render").expect("within budget");
    }
    let err = backend.limiter.check(&client, "render").expect_err("fourth render");
    let retry = err.retry_after_secs().expect("retry hint");
    assert!((retry - 20.0).abs() < 1e-6, "retry after {retry}");

    // Other endpoints and other clients are unaffected.
    backend.limiter.check(&client, "list").expect("list has its own bucket");
    backend.limiter.check("finance", "render").expect("other client");

    backend.clock.advance(Duration::from_secs(21));
    backend.limiter.check(&client, "render").expect("one token refilled");
}

#[tokio::test]
async fn purge_ignores_groups_and_missing_ids_are_not_found() {
    let backend = backend().await;
    for group in ["finance", "ops", "finance"] {
        backend.artifacts.store(b"x".to_vec(), group, ArtifactFormat::Png).await.expect("store");
    }
    assert_eq!(backend.artifacts.purge(Duration::ZERO).await.expect("purge"), 3);
    assert_eq!(backend.artifacts.purge(Duration::ZERO).await.expect("purge"), 0);

    let never = gplot_common_storage::ArtifactId::generate();
    assert_not_found!(backend.artifacts.get(&never, "finance").await);
    assert!(matches!(
        gplot_common_storage::ArtifactId::parse("not-an-id"),
        Err(StorageError::InvalidId { .. })
    ));
}
