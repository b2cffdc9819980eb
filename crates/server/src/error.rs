use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gatekeep::AdmissionError;
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
///
/// `Display` is the message shown to the client. Dependency and internal
/// failures carry a separate detail that is logged but never returned.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("Rate limit exceeded. Please try again after {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Dependency {
        message: &'static str,
        detail: String,
    },

    #[error("Not found")]
    NotFound,

    #[error("Internal server error")]
    Internal(String),
}

/// Uniform error body: `{ "error": ..., "status": ... }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl ServerError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServerError::Validation(message.into())
    }

    pub fn dependency(message: &'static str, detail: impl ToString) -> Self {
        ServerError::Dependency {
            message,
            detail: detail.to_string(),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Dependency { .. } | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match &self {
            ServerError::Dependency { message, detail } => {
                tracing::error!(detail = %detail, "{message}");
            }
            ServerError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal server error");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        });

        let mut response = (status, body).into_response();
        if let ServerError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

impl From<AdmissionError> for ServerError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::RateLimited { retry_after_secs } => {
                ServerError::RateLimited { retry_after_secs }
            }
            AdmissionError::Unauthorized(message) => ServerError::Authentication(message),
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("blocking task failed: {err}"))
    }
}
