//! Request admission core.
//!
//! Every protected route runs through the same chain: a per-client
//! fixed-window [`RateLimiter`], then a [`CredentialVerifier`] (static API
//! key or signed token), then the business handler. The chain is assembled
//! per route group with [`Admission`] and short-circuits on the first
//! failure with an [`AdmissionError`] that maps onto an HTTP status.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gatekeep::{Admission, AdmissionConfig, ApiKeySet, ApiKeyVerifier, RateLimiter};
//!
//! # async fn demo() {
//! let config = AdmissionConfig::default().with_api_keys(["api_key_1"]);
//! let limiter = RateLimiter::start(&config.rate_limit).expect("valid rate limit config");
//! let admission = Admission::new()
//!     .rate_limited(Arc::clone(limiter.limiter()))
//!     .verified_by(Arc::new(ApiKeyVerifier::new(ApiKeySet::new(config.api_keys))));
//!
//! let result = admission.admit("203.0.113.7", Some("Bearer api_key_1"));
//! assert!(result.is_ok());
//! limiter.shutdown().await;
//! # }
//! ```
//!
//! Nothing here is distributed: limiter state is in-process and tokens are
//! not revocable before they expire.

pub mod auth;
pub mod client_key;
pub mod config;
pub mod error;
pub mod password;
pub mod pipeline;
pub mod rate_limit;
pub mod token;

pub use auth::{
    ApiKeySet, ApiKeyVerifier, AuthOutcome, CredentialVerifier, Principal, TokenVerifier,
    parse_bearer,
};
pub use client_key::ClientKey;
pub use config::{AdmissionConfig, ConfigError, RateLimitConfig, TokenConfig};
pub use error::{AdmissionError, PasswordError, TokenError};
pub use password::{
    PASSWORD_POLICY_MESSAGE, check_password_policy, hash_password, verify_password,
    verify_password_decoy,
};
pub use pipeline::Admission;
pub use rate_limit::{ClientWindowState, RateDecision, RateLimiter, RateLimiterHandle};
pub use token::{ClaimFields, IdentityClaim, TokenCodec};
