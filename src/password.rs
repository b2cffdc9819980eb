//! Password hashing and the registration password policy.
//!
//! Hashes are Argon2id PHC strings. Hashing is deliberately slow; async
//! callers should run these functions on a blocking thread.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;

use crate::error::PasswordError;

pub const PASSWORD_POLICY_MESSAGE: &str =
    "Password must be at least 8 characters and contain uppercase, lowercase letters and numbers";

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// `Ok(false)` on mismatch; `Err` only when `stored` is not a valid hash.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Run a full verification against a throwaway hash.
///
/// For lookups that found no account, so the miss costs as much as a
/// wrong password and response timing does not reveal which emails exist.
pub fn verify_password_decoy(password: &str) {
    if let Some(hash) = decoy_hash() {
        let _ = verify_password(password, hash);
    }
}

fn decoy_hash() -> Option<&'static str> {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();
    DECOY
        .get_or_init(|| hash_password(&uuid::Uuid::new_v4().to_string()).ok())
        .as_deref()
}

/// Returns the policy message when `password` is too weak.
pub fn check_password_policy(password: &str) -> Result<(), &'static str> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LEN;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(PASSWORD_POLICY_MESSAGE)
    }
}
