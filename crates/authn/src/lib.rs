//! # gofr-plot Common Authentication
//!
//! Signed access tokens carrying a tenant group claim, shared by every
//! gofr-plot front end.
//!
//! This crate provides:
//! - **Issuance**: HMAC-signed tokens with expiry, optional not-before, audience, and device
//!   fingerprint binding
//! - **Verification**: algorithm pinning, validity window with configurable leeway, audience and
//!   fingerprint checks, each failure a distinct [`AuthErrorKind`]
//! - **Revocation**: a durable [`RevocationLedger`] of issued ids, revocable one at a time or per
//!   group, shareable between processes through its ledger file
//!
//! ## Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use gplot_common_authn::{AuthConfig, Fingerprint, IssueRequest, TokenService};
//! use gplot_common_storage::SystemClock;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = AuthConfig::builder().secret("change-me-in-production").build()?;
//! let service = TokenService::new(config, Arc::new(SystemClock)).await?;
//!
//! let device = Fingerprint::derive(Some("curl/8.5"), Some("203.0.113.7"));
//! let issued = service
//!     .issue(
//!         IssueRequest::builder()
//!             .group("finance")
//!             .ttl(Duration::from_secs(3600))
//!             .fingerprint(device.clone())
//!             .build(),
//!     )
//!     .await?;
//!
//! let verified = service.verify(&issued.token, Some(&device)).await?;
//! assert_eq!(verified.group, "finance");
//!
//! service.revoke(&issued.id).await?;
//! assert!(service.verify(&issued.token, Some(&device)).await.is_err());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Token claims.
pub mod claims;
/// Token service configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Device fingerprints.
pub mod fingerprint;
/// Revocation ledger.
pub mod revocation;
/// Token issuance and verification.
pub mod service;
/// Token-crafting helpers for tests.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Algorithm pinning.
pub mod validation;

pub use claims::TokenClaims;
pub use config::{AuthConfig, UnknownTokenPolicy};
pub use error::{AuthError, AuthErrorKind, Result};
pub use fingerprint::Fingerprint;
pub use revocation::{RevocationLedger, RevocationRecord, RevocationStatus, TrackedToken};
pub use service::{IssueRequest, IssuedToken, TokenService, VerifiedToken};
pub use validation::{SigningAlgorithm, validate_header_algorithm};
