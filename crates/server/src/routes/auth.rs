use crate::error::{ServerError, ServerResult};
use crate::routes::users::normalize_email;
use crate::routes::{parse_json, string_field};
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use gatekeep::{verify_password, verify_password_decoy, ClaimFields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const LOGIN_FAILED: &str = "An error occurred during login";
/// Same message for unknown email and wrong password.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<Value>,
    #[serde(default)]
    pub password: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: &'static str,
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Exchange email and password for a signed token.
///
/// # Example
/// ```json
/// // Request
/// { "email": "user@example.com", "password": "Password123" }
///
/// // Response
/// {
///   "success": true,
///   "message": "Login successful",
///   "token": "eyJ...",
///   "user": { "id": "1", "username": "user", "email": "user@example.com" }
/// }
/// ```
pub async fn login(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let request: LoginRequest = parse_json(&body)?;
    let email = string_field(request.email)
        .map(|e| normalize_email(&e))
        .ok_or_else(|| ServerError::validation("Email is required"))?;
    let password =
        string_field(request.password).ok_or_else(|| ServerError::validation("Password is required"))?;

    let found = state
        .users
        .find_by_email(&email)
        .await
        .map_err(|e| ServerError::dependency(LOGIN_FAILED, e))?;
    let Some(user) = found else {
        // Same hashing cost as a wrong password.
        tokio::task::spawn_blocking(move || verify_password_decoy(&password)).await?;
        return Err(ServerError::Authentication(INVALID_CREDENTIALS.to_string()));
    };

    let stored_hash = user.credential_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await?
        .map_err(|e| ServerError::dependency(LOGIN_FAILED, e))?;
    if !matches {
        tracing::debug!(user_id = user.id, "password mismatch");
        return Err(ServerError::Authentication(INVALID_CREDENTIALS.to_string()));
    }

    let token = state
        .tokens
        .issue(&ClaimFields {
            subject_id: user.id.to_string(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        })
        .map_err(|e| ServerError::dependency(LOGIN_FAILED, e))?;

    tracing::info!(user_id = user.id, "login succeeded");

    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful",
        token,
        user: LoginUser {
            id: user.id.to_string(),
            username: user.display_name,
            email: user.email,
        },
    }))
}
