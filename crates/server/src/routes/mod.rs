//! API route handlers
//!
//! Routes are organized by functionality:
//!
//! - `auth`: login and token issuance
//! - `users`: registration and user listing
//! - `data`: OCR passthrough
//! - `upload`: file upload to the object store
//! - `health`: liveness and metrics

pub mod auth;
pub mod data;
pub mod health;
pub mod upload;
pub mod users;

use crate::error::{ServerError, ServerResult};
use axum::body::Bytes;
use serde::de::DeserializeOwned;

/// Parse a JSON body, reporting any failure with the uniform error shape
/// rather than the extractor's plain-text rejection.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ServerResult<T> {
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "rejecting malformed JSON body");
        ServerError::validation("Invalid request body")
    })
}

/// A JSON field that is present, a string, and not blank.
pub(crate) fn string_field(value: Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
