//! Token-crafting helpers for tests.
//!
//! Feature-gated behind `testutil` so they never reach production builds.
//! Downstream crates enable it for their integration tests:
//!
//! ```toml
//! [dev-dependencies]
//! gplot-common-authn = { path = "../authn", features = ["testutil"] }
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{EncodingKey, Header};

use crate::{config::AuthConfig, validation::SigningAlgorithm};

/// Secret used by [`test_config`] and [`sign_claims`].
pub const TEST_SECRET: &str = "test-secret-with-enough-entropy-for-hmac";

/// A configuration with [`TEST_SECRET`] and otherwise default settings.
///
/// # Panics
///
/// Never in practice; the configuration is statically valid.
#[allow(clippy::expect_used)]
pub fn test_config() -> AuthConfig {
    AuthConfig::builder().secret(TEST_SECRET).build().expect("test config is valid")
}

/// Signs arbitrary JSON claims with [`TEST_SECRET`].
///
/// Lets tests mint tokens the service itself would never issue (legacy
/// payloads without optional claims, foreign audiences, untracked ids).
///
/// # Panics
///
/// Panics if encoding fails.
#[allow(clippy::expect_used)]
pub fn sign_claims(claims: &serde_json::Value, alg: SigningAlgorithm) -> String {
    sign_claims_with(claims, alg, TEST_SECRET.as_bytes())
}

/// Signs arbitrary JSON claims with the given secret.
///
/// # Panics
///
/// Panics if encoding fails.
#[allow(clippy::expect_used)]
pub fn sign_claims_with(claims: &serde_json::Value, alg: SigningAlgorithm, secret: &[u8]) -> String {
    jsonwebtoken::encode(
        &Header::new(alg.jwt_algorithm()),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("failed to encode test token")
}

/// Builds a raw token from header and payload JSON with a fake signature.
///
/// Used for attack tests (`alg: none`, substituted algorithms, forged
/// payloads) that a real encoder refuses to produce.
pub fn craft_raw_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    let fake_sig = URL_SAFE_NO_PAD.encode(b"fake-signature");
    format!("{header_b64}.{payload_b64}.{fake_sig}")
}

/// Replaces the payload segment of a signed token, keeping its header and
/// signature.
///
/// # Panics
///
/// Panics if `token` does not have three segments.
#[allow(clippy::panic)]
pub fn replace_payload(token: &str, payload: &serde_json::Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    let [header, _, signature] = parts.as_slice() else {
        panic!("token must have three segments");
    };
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{payload_b64}.{signature}")
}
