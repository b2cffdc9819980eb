use crate::error::{ServerError, ServerResult};
use crate::routes::{parse_json, string_field};
use crate::state::ServerState;
use crate::store::{NewUser, PublicUser, StoreError};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gatekeep::{check_password_policy, hash_password};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const REGISTRATION_FAILED: &str = "An error occurred during registration";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
    #[serde(default)]
    pub password: Option<Value>,
    #[serde(default)]
    pub confirm_password: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: &'static str,
    pub user: PublicUser,
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Register a new user
///
/// Validation runs before any hashing or store access; the first failing
/// rule is reported.
pub async fn register(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let request: RegisterRequest = parse_json(&body)?;

    let username = string_field(request.username)
        .map(|u| u.trim().to_string())
        .ok_or_else(|| ServerError::validation("Username is required"))?;
    let email = string_field(request.email)
        .map(|e| normalize_email(&e))
        .ok_or_else(|| ServerError::validation("Email is required"))?;
    if !is_valid_email(&email) {
        return Err(ServerError::validation("Invalid email format"));
    }
    let password =
        string_field(request.password).ok_or_else(|| ServerError::validation("Password is required"))?;
    check_password_policy(&password).map_err(ServerError::validation)?;
    let confirm = string_field(request.confirm_password).unwrap_or_default();
    if confirm != password {
        return Err(ServerError::validation("Passwords do not match"));
    }

    // Cheap pre-check; the insert below still enforces uniqueness.
    let existing = state
        .users
        .find_by_email(&email)
        .await
        .map_err(|e| ServerError::dependency(REGISTRATION_FAILED, e))?;
    if existing.is_some() {
        return Err(ServerError::Conflict("Email already registered".into()));
    }

    let credential_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await?
        .map_err(|e| ServerError::dependency(REGISTRATION_FAILED, e))?;

    let user = state
        .users
        .insert(NewUser {
            display_name: username,
            email,
            credential_hash,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ServerError::Conflict("Email already registered".into()),
            other => ServerError::dependency(REGISTRATION_FAILED, other),
        })?;

    tracing::info!(user_id = user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: "User registered successfully",
            user: PublicUser::from(&user),
        }),
    ))
}

/// List registered users (API key required)
pub async fn list_users(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let users = state
        .users
        .list()
        .await
        .map_err(|e| ServerError::dependency("Failed to load users", e))?;

    Ok(Json(users.iter().map(PublicUser::from).collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        for ok in ["a@example.com", "first.last@sub.example.org"] {
            assert!(is_valid_email(ok), "{ok}");
        }
        for bad in ["", "no-at.example.com", "@example.com", "a@example", "a@.com", "a@b@c.com", "a b@example.com", "a@example."] {
            assert!(!is_valid_email(bad), "{bad}");
        }
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
