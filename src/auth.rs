//! Credential verification.
//!
//! Two strategies share one interface: a static API-key check and a signed
//! token check. Both read the `Authorization: Bearer <credential>` header
//! and produce an [`AuthOutcome`]; neither ever panics on bad input.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};

use crate::error::TokenError;
use crate::token::{IdentityClaim, TokenCodec};

pub const MISSING_HEADER: &str = "Authorization header is required";
pub const INVALID_API_KEY_FORMAT: &str = "Invalid authorization format. Use: Bearer <api_key>";
pub const INVALID_TOKEN_FORMAT: &str = "Invalid authorization format. Use: Bearer <token>";
pub const INVALID_API_KEY: &str = "Invalid API key";
pub const TOKEN_EXPIRED: &str = "JWT token has expired";
pub const TOKEN_INVALID: &str = "Invalid or corrupted JWT token";

/// Identity attached to a request after token verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
}

impl From<IdentityClaim> for Principal {
    fn from(claim: IdentityClaim) -> Self {
        Self {
            subject_id: claim.subject_id,
            email: claim.email,
            display_name: claim.display_name,
        }
    }
}

/// Result of one credential check.
///
/// A failed outcome always carries a non-empty reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub principal: Option<Principal>,
    pub error: Option<String>,
}

impl AuthOutcome {
    pub fn granted(principal: Option<Principal>) -> Self {
        Self {
            authenticated: true,
            principal,
            error: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug_assert!(!reason.is_empty());
        Self {
            authenticated: false,
            principal: None,
            error: Some(reason),
        }
    }

    /// Collapse into the principal on success or the reason on failure.
    pub fn into_result(self) -> Result<Option<Principal>, String> {
        if self.authenticated {
            Ok(self.principal)
        } else {
            Err(self.error.unwrap_or_else(|| "Unauthorized".to_string()))
        }
    }
}

/// A way of checking the `Authorization` header of a request.
pub trait CredentialVerifier: Send + Sync {
    fn check(&self, authorization: Option<&str>) -> AuthOutcome;
}

/// Extract the credential from `Bearer <credential>`.
///
/// Exactly one space separates the scheme from a non-empty credential.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let credential = header.strip_prefix("Bearer ")?;
    if credential.is_empty() || credential.contains(' ') {
        return None;
    }
    Some(credential)
}

/// Shared, replaceable set of accepted API keys.
///
/// Clones share the same set, so a reload through one handle is seen by
/// every verifier on the next check.
#[derive(Debug, Clone, Default)]
pub struct ApiKeySet {
    keys: Arc<RwLock<HashSet<String>>>,
}

impl ApiKeySet {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Arc::new(RwLock::new(keys.into_iter().map(Into::into).collect())),
        }
    }

    pub fn replace<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: HashSet<String> = keys.into_iter().map(Into::into).collect();
        let count = fresh.len();
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::info!(count, "api key set replaced");
    }

    /// Exact, case-sensitive membership. Every stored key is compared in
    /// constant time so the scan does not leak which key matched.
    pub fn contains(&self, candidate: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let mut found = Choice::from(0);
        for key in keys.iter() {
            found |= key.as_bytes().ct_eq(candidate.as_bytes());
        }
        found.into()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accepts requests bearing one of the configured API keys.
#[derive(Debug, Clone)]
pub struct ApiKeyVerifier {
    keys: ApiKeySet,
}

impl ApiKeyVerifier {
    pub fn new(keys: ApiKeySet) -> Self {
        Self { keys }
    }
}

impl CredentialVerifier for ApiKeyVerifier {
    fn check(&self, authorization: Option<&str>) -> AuthOutcome {
        let Some(header) = authorization else {
            return AuthOutcome::denied(MISSING_HEADER);
        };
        let Some(key) = parse_bearer(header) else {
            return AuthOutcome::denied(INVALID_API_KEY_FORMAT);
        };
        if !self.keys.contains(key) {
            return AuthOutcome::denied(INVALID_API_KEY);
        }
        AuthOutcome::granted(None)
    }
}

/// Accepts requests bearing a valid, unexpired signed token.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    codec: Arc<TokenCodec>,
}

impl TokenVerifier {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

impl CredentialVerifier for TokenVerifier {
    fn check(&self, authorization: Option<&str>) -> AuthOutcome {
        let Some(header) = authorization else {
            return AuthOutcome::denied(MISSING_HEADER);
        };
        let Some(token) = parse_bearer(header) else {
            return AuthOutcome::denied(INVALID_TOKEN_FORMAT);
        };
        match self.codec.verify(token) {
            Ok(claim) => AuthOutcome::granted(Some(claim.into())),
            Err(TokenError::Expired) => AuthOutcome::denied(TOKEN_EXPIRED),
            Err(_) => AuthOutcome::denied(TOKEN_INVALID),
        }
    }
}
