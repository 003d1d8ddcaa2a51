//! Security-focused authentication tests.
//!
//! These tests verify the verification pipeline's resistance to common
//! token attacks: algorithm substitution, forged payloads, wrong secrets,
//! expired and future tokens, stolen tokens presented from another device,
//! and malformed token structures.
#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gplot_common_authn::{
    AuthConfig, AuthError, AuthErrorKind, Fingerprint, IssueRequest, SigningAlgorithm, TokenService,
};
use gplot_common_storage::{Clock, ManualClock};
use jsonwebtoken::{EncodingKey, Header};
use rstest::rstest;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SECRET: &str = "security-test-secret-0123456789abcdef";
const START: i64 = 1_700_000_000;

async fn service_with(config: AuthConfig) -> (TokenService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(START));
    let service = TokenService::new(config, clock.clone()).await.expect("service");
    (service, clock)
}

async fn service() -> (TokenService, Arc<ManualClock>) {
    service_with(AuthConfig::builder().secret(SECRET).build().expect("config")).await
}

/// Sign claims with the given algorithm and secret.
fn sign(claims: &serde_json::Value, alg: jsonwebtoken::Algorithm, secret: &str) -> String {
    jsonwebtoken::encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("Failed to encode test token")
}

/// Create a raw token string from header and payload JSON (with a fake signature).
fn craft_raw_token(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json.to_string().as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.to_string().as_bytes());
    let fake_sig = URL_SAFE_NO_PAD.encode(b"fake-signature");
    format!("{header_b64}.{payload_b64}.{fake_sig}")
}

fn valid_claims(group: &str) -> serde_json::Value {
    json!({ "group": group, "iat": START, "exp": START + 3600 })
}

async fn issue(service: &TokenService, group: &str) -> gplot_common_authn::IssuedToken {
    service
        .issue(IssueRequest::builder().group(group).ttl(Duration::from_secs(3600)).build())
        .await
        .expect("issue")
}

// ===========================================================================
// 1. Algorithm substitution: `alg: "none"` must be rejected
// ===========================================================================

#[rstest]
#[case("")]
#[case("fake-signature")]
#[tokio::test]
async fn test_algorithm_none_rejected(#[case] signature: &str) {
    let (service, _) = service().await;
    let mut token = craft_raw_token(&json!({ "alg": "none", "typ": "JWT" }), &valid_claims("ops"));
    let cut = token.rfind('.').expect("three segments") + 1;
    token.truncate(cut);
    token.push_str(signature);

    let err = service.verify(&token, None).await.expect_err("alg none must fail");
    assert!(
        matches!(err, AuthError::Malformed(ref msg) if msg.contains("not allowed for security reasons")),
        "unexpected error: {err:?}"
    );
}

// ===========================================================================
// 2. Algorithm confusion: a valid signature under a different algorithm
// ===========================================================================

#[rstest]
#[case(jsonwebtoken::Algorithm::HS384)]
#[case(jsonwebtoken::Algorithm::HS512)]
#[tokio::test]
async fn test_other_hmac_algorithm_rejected(#[case] alg: jsonwebtoken::Algorithm) {
    let (service, _) = service().await;
    // Correct secret and claims; only the algorithm differs from the pinned HS256.
    let token = sign(&valid_claims("ops"), alg, SECRET);

    let err = service.verify(&token, None).await.expect_err("must be rejected");
    assert_eq!(err.kind(), AuthErrorKind::Malformed);
}

#[tokio::test]
async fn test_pinned_non_default_algorithm() {
    let config = AuthConfig::builder()
        .secret(SECRET)
        .algorithm(SigningAlgorithm::Hs512)
        .build()
        .expect("config");
    let (service, _) = service_with(config).await;

    let issued = issue(&service, "ops").await;
    let header: serde_json::Value = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(issued.token.split('.').next().expect("header"))
            .expect("base64"),
    )
    .expect("json");
    assert_eq!(header["alg"], "HS512");
    assert!(service.verify(&issued.token, None).await.is_ok());

    let hs256 = sign(&valid_claims("ops"), jsonwebtoken::Algorithm::HS256, SECRET);
    assert_eq!(
        service.verify(&hs256, None).await.expect_err("HS256").kind(),
        AuthErrorKind::Malformed
    );
}

#[rstest]
#[case("RS256")]
#[case("EdDSA")]
#[case("ES256")]
#[tokio::test]
async fn test_asymmetric_algorithm_headers_rejected(#[case] alg: &str) {
    let (service, _) = service().await;
    let token = craft_raw_token(&json!({ "alg": alg }), &valid_claims("ops"));
    assert_eq!(
        service.verify(&token, None).await.expect_err("must fail").kind(),
        AuthErrorKind::Malformed
    );
}

// ===========================================================================
// 3. Forgery: wrong secret, tampered payload, tampered signature
// ===========================================================================

#[tokio::test]
async fn test_wrong_secret_rejected() {
    let (service, _) = service().await;
    let token = sign(&valid_claims("ops"), jsonwebtoken::Algorithm::HS256, "attacker-secret");

    let err = service.verify(&token, None).await.expect_err("must fail");
    assert!(matches!(err, AuthError::Malformed(ref msg) if msg.contains("signature")));
}

#[tokio::test]
async fn test_tampered_group_rejected() {
    let (service, _) = service().await;
    let issued = issue(&service, "ops").await;

    let mut parts: Vec<String> = issued.token.split('.').map(str::to_owned).collect();
    let mut payload: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).expect("base64")).expect("json");
    payload["group"] = json!("finance");
    parts[1] = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    let forged = parts.join(".");

    let err = service.verify(&forged, None).await.expect_err("forged payload must fail");
    assert_eq!(err.kind(), AuthErrorKind::Malformed);
}

#[tokio::test]
async fn test_tampered_signature_rejected() {
    let (service, _) = service().await;
    let issued = issue(&service, "ops").await;

    let mut forged = issued.token.clone();
    let last = forged.pop().expect("non-empty");
    forged.push(if last == 'A' { 'B' } else { 'A' });

    assert_eq!(
        service.verify(&forged, None).await.expect_err("must fail").kind(),
        AuthErrorKind::Malformed
    );
}

#[tokio::test]
async fn test_secret_rotation_invalidates_old_tokens() {
    let (old_service, _) = service().await;
    let issued = issue(&old_service, "ops").await;

    let rotated = AuthConfig::builder().secret("rotated-secret-fedcba9876543210").build();
    let (new_service, _) = service_with(rotated.expect("config")).await;
    assert_eq!(
        new_service.verify(&issued.token, None).await.expect_err("old secret").kind(),
        AuthErrorKind::Malformed
    );
}

// ===========================================================================
// 4. Expiry boundary with 1-second granularity
// ===========================================================================

#[tokio::test]
async fn test_token_expired_one_second_ago() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START - 60, "exp": START - 1 }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    assert!(matches!(service.verify(&token, None).await, Err(AuthError::TokenExpired)));
}

#[tokio::test]
async fn test_token_expiring_exactly_now_rejected() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START - 60, "exp": START }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    assert!(matches!(service.verify(&token, None).await, Err(AuthError::TokenExpired)));
}

#[tokio::test]
async fn test_token_valid_one_second_from_now() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START - 60, "exp": START + 1 }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    assert_eq!(service.verify(&token, None).await.expect("valid").group, "ops");
}

#[tokio::test]
async fn test_expired_token_never_validates_again() {
    let (service, clock) = service().await;
    let issued = issue(&service, "ops").await;

    clock.advance(Duration::from_secs(3600));
    for _ in 0..3 {
        assert!(matches!(service.verify(&issued.token, None).await, Err(AuthError::TokenExpired)));
        clock.advance(Duration::from_secs(86_400));
    }
}

// ===========================================================================
// 5. Future `iat` / `nbf`
// ===========================================================================

#[tokio::test]
async fn test_future_nbf_rejected() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START, "exp": START + 600, "nbf": START + 300 }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    let err = service.verify(&token, None).await.expect_err("future nbf");
    assert!(matches!(err, AuthError::TokenNotYetValid));
}

#[tokio::test]
async fn test_future_iat_rejected() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START + 300, "exp": START + 600 }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    assert!(matches!(service.verify(&token, None).await, Err(AuthError::TokenNotYetValid)));
}

#[tokio::test]
async fn test_nbf_in_past_accepted() {
    let (service, _) = service().await;
    let token = sign(
        &json!({ "group": "ops", "iat": START - 10, "exp": START + 600, "nbf": START - 5 }),
        jsonwebtoken::Algorithm::HS256,
        SECRET,
    );
    assert!(service.verify(&token, None).await.is_ok());
}

// ===========================================================================
// 6. Stolen token replayed from another device
// ===========================================================================

#[tokio::test]
async fn test_stolen_token_rejected_on_other_device() {
    let (service, _) = service().await;
    let owner = Fingerprint::derive(Some("Mozilla/5.0 (X11)"), Some("198.51.100.4"));
    let thief = Fingerprint::derive(Some("Mozilla/5.0 (X11)"), Some("203.0.113.99"));
    let issued = service
        .issue(
            IssueRequest::builder()
                .group("finance")
                .ttl(Duration::from_secs(600))
                .fingerprint(owner.clone())
                .build(),
        )
        .await
        .expect("issue");

    assert!(service.verify(&issued.token, Some(&owner)).await.is_ok());
    let err = service.verify(&issued.token, Some(&thief)).await.expect_err("other device");
    assert!(matches!(err, AuthError::FingerprintMismatch));
    assert!(err.is_rejection());
}

#[tokio::test]
async fn test_fingerprint_cannot_be_stripped() {
    let (service, _) = service().await;
    let owner = Fingerprint::derive(Some("agent"), Some("10.1.1.1"));
    let issued = service
        .issue(
            IssueRequest::builder()
                .group("ops")
                .ttl(Duration::from_secs(600))
                .fingerprint(owner)
                .build(),
        )
        .await
        .expect("issue");

    // Removing the claim invalidates the signature.
    let mut parts: Vec<String> = issued.token.split('.').map(str::to_owned).collect();
    let mut payload: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).expect("base64")).expect("json");
    payload.as_object_mut().expect("object").remove("fingerprint");
    parts[1] = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());

    assert_eq!(
        service.verify(&parts.join("."), None).await.expect_err("stripped").kind(),
        AuthErrorKind::Malformed
    );
}

// ===========================================================================
// 7. Malformed token structure
// ===========================================================================

#[rstest]
#[case::empty("")]
#[case::one_part("eyJhbGciOiJIUzI1NiJ9")]
#[case::two_parts("eyJhbGciOiJIUzI1NiJ9.e30")]
#[case::extra_segments("eyJhbGciOiJIUzI1NiJ9.e30.c2ln.c2ln")]
#[case::garbage_header("!!!.e30.c2ln")]
#[case::invalid_base64_payload("eyJhbGciOiJIUzI1NiJ9.!!!.c2ln")]
#[case::bearer_prefix("Bearer eyJhbGciOiJIUzI1NiJ9.e30.c2ln")]
#[tokio::test]
async fn test_malformed_structure(#[case] token: &str) {
    let (service, _) = service().await;
    let err = service.verify(token, None).await.expect_err("malformed");
    assert_eq!(err.kind(), AuthErrorKind::Malformed, "{token:?} gave {err:?}");
}

#[rstest]
#[case::missing_group(json!({ "iat": START, "exp": START + 60 }))]
#[case::empty_group(json!({ "group": "", "iat": START, "exp": START + 60 }))]
#[case::missing_exp(json!({ "group": "ops", "iat": START }))]
#[case::exp_before_iat(json!({ "group": "ops", "iat": START, "exp": START - 1 }))]
#[case::string_exp(json!({ "group": "ops", "iat": START, "exp": "tomorrow" }))]
#[case::empty_jti(json!({ "group": "ops", "iat": START, "exp": START + 60, "jti": "" }))]
#[tokio::test]
async fn test_validly_signed_but_malformed_claims(#[case] claims: serde_json::Value) {
    let (service, _) = service().await;
    let token = sign(&claims, jsonwebtoken::Algorithm::HS256, SECRET);
    let err = service.verify(&token, None).await.expect_err("malformed claims");
    assert_eq!(err.kind(), AuthErrorKind::Malformed, "{claims} gave {err:?}");
}

#[tokio::test]
async fn test_failure_kinds_are_distinct() {
    let (service, clock) = service().await;
    let owner = Fingerprint::derive(Some("a"), Some("b"));
    let bound = service
        .issue(
            IssueRequest::builder()
                .group("ops")
                .ttl(Duration::from_secs(60))
                .fingerprint(owner)
                .build(),
        )
        .await
        .expect("issue");
    let revoked = issue(&service, "ops").await;
    service.revoke(&revoked.id).await.expect("revoke");

    let mut kinds = vec![
        service.verify("not-a-token", None).await.expect_err("malformed").kind(),
        service.verify(&revoked.token, None).await.expect_err("revoked").kind(),
        service.verify(&bound.token, None).await.expect_err("fingerprint").kind(),
    ];
    clock.advance(Duration::from_secs(3600));
    kinds.push(service.verify(&bound.token, None).await.expect_err("expired").kind());

    assert_eq!(
        kinds,
        [
            AuthErrorKind::Malformed,
            AuthErrorKind::Revoked,
            AuthErrorKind::Fingerprint,
            AuthErrorKind::Expired
        ]
    );
    assert_eq!(clock.unix_seconds(), (START + 3600) as u64);
}
