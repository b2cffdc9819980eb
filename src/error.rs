use thiserror::Error;

/// Why a token failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Signature mismatch, malformed structure, or undecodable claims.
    #[error("token signature is invalid or the token is malformed")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("failed to encode token: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(String),

    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Terminal rejection produced by the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Rate limit exceeded. Please try again after {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Unauthorized(String),
}

impl AdmissionError {
    /// HTTP status that mirrors this rejection.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::RateLimited { .. } => 429,
            AdmissionError::Unauthorized(_) => 401,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AdmissionError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            AdmissionError::Unauthorized(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_message_names_the_wait() {
        let err = AdmissionError::RateLimited {
            retry_after_secs: 42,
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.retry_after_secs(), Some(42));
        assert_eq!(
            err.message(),
            "Rate limit exceeded. Please try again after 42 seconds."
        );
    }

    #[test]
    fn unauthorized_passes_message_through() {
        let err = AdmissionError::Unauthorized("Invalid API key".into());
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.message(), "Invalid API key");
        assert_eq!(err.retry_after_secs(), None);
    }
}
