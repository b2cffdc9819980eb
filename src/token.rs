//! Signed identity tokens (HS256 JWT).

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::TokenConfig;
use crate::error::TokenError;

/// Identity fields a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFields {
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
}

/// Claim set carried inside a token. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    #[serde(rename = "userId")]
    pub subject_id: String,
    pub email: String,
    #[serde(rename = "username")]
    pub display_name: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl IdentityClaim {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn fields(&self) -> ClaimFields {
        ClaimFields {
            subject_id: self.subject_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Issues and verifies tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.secret.as_bytes(), config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, fields: &ClaimFields) -> Result<String, TokenError> {
        self.issue_at(fields, chrono::Utc::now().timestamp())
    }

    /// Sign `fields` as if issued at `now` (unix seconds).
    pub fn issue_at(&self, fields: &ClaimFields, now: i64) -> Result<String, TokenError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claim = IdentityClaim {
            subject_id: fields.subject_id.clone(),
            email: fields.email.clone(),
            display_name: fields.display_name.clone(),
            issued_at: now,
            expires_at: now.saturating_add(ttl),
        };

        encode(&Header::new(Algorithm::HS256), &claim, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<IdentityClaim, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Check signature and structure first, then expiry against `now`.
    ///
    /// The decoder also enforces `exp` against the wall clock; the explicit
    /// comparison below still runs so an expired claim is never accepted
    /// whatever the decoder's settings.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<IdentityClaim, TokenError> {
        let data = decode::<IdentityClaim>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected by decoder");
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            }
        })?;

        let claim = data.claims;
        if claim.is_expired_at(now) {
            return Err(TokenError::Expired);
        }

        Ok(claim)
    }
}
