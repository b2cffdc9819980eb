//! Admission configuration.
//!
//! Every field carries a serde default so a partially populated source
//! (file, environment, or a literal in a test) deserializes into a usable
//! config. Values are validated once with [`AdmissionConfig::validate`]
//! before any service is constructed from them.
//!
//! ```yaml
//! rate_limit:
//!   window_secs: 60
//!   max_requests: 5
//!   sweep_interval_secs: 60
//!   client_address_header: "cf-connecting-ip"
//! token:
//!   secret: "change-me"
//!   ttl_secs: 86400
//! api_keys: ["api_key_1", "api_key_2"]
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a configuration cannot back a running service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,

    #[error("rate limit max_requests must be greater than zero")]
    ZeroRequestCap,

    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    #[error("token signing secret must not be empty")]
    EmptySecret,

    #[error("token ttl must be greater than zero")]
    ZeroTokenTtl,
}

/// Fixed-window limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per client within one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// How often stale client entries are evicted.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Header carrying the trusted client address.
    #[serde(default = "default_client_address_header")]
    pub client_address_header: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            sweep_interval_secs: default_sweep_interval_secs(),
            client_address_header: default_client_address_header(),
        }
    }
}

impl RateLimitConfig {
    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    pub fn with_max_requests(mut self, max: u32) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    pub fn with_client_address_header(mut self, header: impl Into<String>) -> Self {
        self.client_address_header = header.into();
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroRequestCap);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Signed-token settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HMAC secret used to sign and verify tokens.
    #[serde(default)]
    pub secret: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: default_token_ttl_secs(),
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret_len", &self.secret.len())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl TokenConfig {
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.ttl_secs = secs;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::ZeroTokenTtl);
        }
        Ok(())
    }
}

/// Everything the admission core consumes from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub token: TokenConfig,

    /// Static API keys accepted by the key verifier.
    #[serde(default)]
    pub api_keys: HashSet<String>,
}

impl AdmissionConfig {
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_token(mut self, token: TokenConfig) -> Self {
        self.token = token;
        self
    }

    pub fn with_api_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;
        self.token.validate()
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_client_address_header() -> String {
    "cf-connecting-ip".to_string()
}

fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AdmissionConfig::default();
        assert_eq!(cfg.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.rate_limit.client_address_header, "cf-connecting-ip");
        assert_eq!(cfg.token.ttl(), Duration::from_secs(86_400));
        assert!(cfg.api_keys.is_empty());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: AdmissionConfig = serde_json::from_str(
            r#"{"rate_limit": {"max_requests": 10}, "token": {"secret": "s3cret"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 10);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.token.secret, "s3cret");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let base = AdmissionConfig::default().with_token(TokenConfig::default().with_secret("k"));
        assert!(base.validate().is_ok());

        let zero_window = base
            .clone()
            .with_rate_limit(RateLimitConfig::default().with_window_secs(0));
        assert_eq!(zero_window.validate(), Err(ConfigError::ZeroWindow));

        let zero_cap = base
            .clone()
            .with_rate_limit(RateLimitConfig::default().with_max_requests(0));
        assert_eq!(zero_cap.validate(), Err(ConfigError::ZeroRequestCap));

        let no_secret = base.with_token(TokenConfig::default());
        assert_eq!(no_secret.validate(), Err(ConfigError::EmptySecret));
    }

    #[test]
    fn token_debug_hides_secret() {
        let cfg = TokenConfig::default().with_secret("super-secret-value");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("secret_len"));
    }
}
