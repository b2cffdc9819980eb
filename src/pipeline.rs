//! Admission pipeline: rate limit, then credentials, then the handler.
//!
//! The order is fixed. A throttled client is turned away before any
//! credential material is parsed, and the handler only runs once both
//! checks pass.

use std::future::Future;
use std::sync::Arc;

use crate::auth::{CredentialVerifier, Principal};
use crate::error::AdmissionError;
use crate::rate_limit::{RateDecision, RateLimiter};

/// Checks applied in front of one group of routes.
#[derive(Clone, Default)]
pub struct Admission {
    limiter: Option<Arc<RateLimiter>>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("rate_limited", &self.limiter.is_some())
            .field("verified", &self.verifier.is_some())
            .finish()
    }
}

impl Admission {
    /// An admission with no checks; every request passes.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_limited(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn verified_by(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn is_verified(&self) -> bool {
        self.verifier.is_some()
    }

    /// Run the configured checks for one request.
    ///
    /// Returns the authenticated principal, if the verifier produced one.
    pub fn admit(
        &self,
        client_key: &str,
        authorization: Option<&str>,
    ) -> Result<Option<Principal>, AdmissionError> {
        if let Some(limiter) = &self.limiter {
            if let RateDecision::Limited { retry_after_secs } = limiter.check(client_key) {
                return Err(AdmissionError::RateLimited { retry_after_secs });
            }
        }

        match &self.verifier {
            Some(verifier) => verifier
                .check(authorization)
                .into_result()
                .map_err(AdmissionError::Unauthorized),
            None => Ok(None),
        }
    }

    /// Admit the request and, only on success, invoke `handler` with the
    /// principal. The handler's output is returned unchanged.
    pub async fn run<F, Fut, T>(
        &self,
        client_key: &str,
        authorization: Option<&str>,
        handler: F,
    ) -> Result<T, AdmissionError>
    where
        F: FnOnce(Option<Principal>) -> Fut,
        Fut: Future<Output = T>,
    {
        let principal = self.admit(client_key, authorization)?;
        Ok(handler(principal).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::auth::{ApiKeySet, ApiKeyVerifier, AuthOutcome, INVALID_API_KEY, TokenVerifier};
    use crate::config::RateLimitConfig;
    use crate::token::{ClaimFields, TokenCodec};

    /// Verifier that counts how often it was consulted.
    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl CredentialVerifier for CountingVerifier {
        fn check(&self, _authorization: Option<&str>) -> AuthOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AuthOutcome::granted(None)
        }
    }

    fn limiter(max_requests: u32) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            &RateLimitConfig::default().with_max_requests(max_requests),
        ))
    }

    #[tokio::test]
    async fn no_checks_passes_through() {
        let out = Admission::new().run("k", None, |p| async move { p }).await;
        assert_eq!(out, Ok(None));
    }

    #[tokio::test]
    async fn rate_limit_runs_before_credentials() {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let admission = Admission::new()
            .rate_limited(limiter(1))
            .verified_by(verifier.clone());

        assert!(admission.admit("client", None).is_ok());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

        let err = admission.admit("client", None).unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert!(err.message().starts_with("Rate limit exceeded"));
        // credentials were never looked at for the throttled request
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_not_invoked_on_rejection() {
        let admission = Admission::new().verified_by(Arc::new(ApiKeyVerifier::new(
            ApiKeySet::new(["good"]),
        )));
        let invoked = AtomicUsize::new(0);

        let result = admission
            .run("k", Some("Bearer bad"), |_| async {
                invoked.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(
            result,
            Err(AdmissionError::Unauthorized(INVALID_API_KEY.to_string()))
        );
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_receives_principal_and_output_propagates() {
        let codec = Arc::new(TokenCodec::new(b"pipeline", Duration::from_secs(60)));
        let token = codec
            .issue(&ClaimFields {
                subject_id: "9".into(),
                email: "lin@example.com".into(),
                display_name: "lin".into(),
            })
            .unwrap();
        let admission = Admission::new()
            .rate_limited(limiter(5))
            .verified_by(Arc::new(TokenVerifier::new(codec)));

        let header = format!("Bearer {token}");
        let out = admission
            .run("k", Some(&header), |principal| async move {
                principal.map(|p| p.email)
            })
            .await;

        assert_eq!(out, Ok(Some("lin@example.com".to_string())));
    }
}
