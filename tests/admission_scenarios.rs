use std::sync::Arc;
use std::time::Duration;

use gatekeep::{
    Admission, AdmissionConfig, AdmissionError, ApiKeySet, ApiKeyVerifier, ClaimFields, ClientKey,
    CredentialVerifier, RateLimitConfig, RateLimiter, TokenCodec, TokenConfig, TokenVerifier,
    hash_password, verify_password,
};

fn config() -> AdmissionConfig {
    AdmissionConfig::default()
        .with_rate_limit(RateLimitConfig::default().with_max_requests(3))
        .with_token(TokenConfig::default().with_secret("scenario-secret"))
        .with_api_keys(["api_key_1", "api_key_2"])
}

fn fields() -> ClaimFields {
    ClaimFields {
        subject_id: "7".into(),
        email: "ada@example.com".into(),
        display_name: "ada".into(),
    }
}

#[test]
fn api_key_route_rate_limits_before_checking_keys() {
    let config = config();
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let verifier: Arc<dyn CredentialVerifier> =
        Arc::new(ApiKeyVerifier::new(ApiKeySet::new(config.api_keys.clone())));
    let admission = Admission::new()
        .rate_limited(Arc::clone(&limiter))
        .verified_by(verifier);

    assert!(admission.admit("10.0.0.1", Some("Bearer api_key_2")).is_ok());
    assert!(matches!(
        admission.admit("10.0.0.1", Some("Bearer wrong")),
        Err(AdmissionError::Unauthorized(msg)) if msg == "Invalid API key"
    ));
    assert!(matches!(
        admission.admit("10.0.0.1", None),
        Err(AdmissionError::Unauthorized(msg)) if msg == "Authorization header is required"
    ));

    // Fourth request: a valid key does not bypass the limit.
    let err = admission
        .admit("10.0.0.1", Some("Bearer api_key_1"))
        .unwrap_err();
    assert_eq!(err.status_code(), 429);
    assert_eq!(err.retry_after_secs(), Some(60));
    assert_eq!(
        err.message(),
        "Rate limit exceeded. Please try again after 60 seconds."
    );

    assert!(admission.admit("10.0.0.2", Some("Bearer api_key_1")).is_ok());
    assert_eq!(limiter.len(), 2);
}

#[tokio::test]
async fn login_token_admits_the_same_principal() {
    let config = config();
    let codec = Arc::new(TokenCodec::from_config(&config.token));
    let admission = Admission::new().verified_by(Arc::new(TokenVerifier::new(Arc::clone(&codec))));

    let hash = hash_password("Password123").unwrap();
    assert!(verify_password("Password123", &hash).unwrap());

    let token = codec.issue(&fields()).unwrap();
    let header = format!("Bearer {token}");

    let seen = admission
        .run("10.0.0.3", Some(&header), |principal| async move { principal })
        .await
        .unwrap()
        .expect("token routes yield a principal");
    assert_eq!(seen.subject_id, "7");
    assert_eq!(seen.email, "ada@example.com");
    assert_eq!(seen.display_name, "ada");
}

#[tokio::test]
async fn rejected_requests_never_reach_the_handler() {
    let codec = Arc::new(TokenCodec::new(b"scenario-secret", Duration::from_secs(60)));
    let admission = Admission::new().verified_by(Arc::new(TokenVerifier::new(codec)));

    let mut invoked = false;
    let result = admission
        .run("10.0.0.4", Some("Bearer not.a.token"), |_| {
            invoked = true;
            async {}
        })
        .await;

    assert!(matches!(
        result,
        Err(AdmissionError::Unauthorized(msg)) if msg == "Invalid or corrupted JWT token"
    ));
    assert!(!invoked);
}

#[test]
fn tokens_from_another_secret_are_rejected() {
    let ours = TokenCodec::new(b"ours", Duration::from_secs(60));
    let theirs = TokenCodec::new(b"theirs", Duration::from_secs(60));
    let foreign = theirs.issue(&fields()).unwrap();

    let verifier = TokenVerifier::new(Arc::new(ours));
    let outcome = verifier.check(Some(&format!("Bearer {foreign}")));
    assert!(!outcome.authenticated);
    assert_eq!(outcome.error.as_deref(), Some("Invalid or corrupted JWT token"));
}

#[test]
fn key_reload_is_seen_by_existing_verifiers() {
    let keys = ApiKeySet::new(["old"]);
    let verifier = ApiKeyVerifier::new(keys.clone());
    assert!(verifier.check(Some("Bearer old")).authenticated);

    keys.replace(["new"]);
    assert!(!verifier.check(Some("Bearer old")).authenticated);
    assert!(verifier.check(Some("Bearer new")).authenticated);
}

#[test]
fn missing_client_address_falls_back_to_a_fresh_key() {
    let limiter = RateLimiter::new(&RateLimitConfig::default().with_max_requests(1));
    for _ in 0..3 {
        let key = ClientKey::resolve("cf-connecting-ip", |_| None);
        assert!(key.is_anonymous());
        assert!(limiter.check(key.as_str()).is_allowed());
    }
    assert_eq!(limiter.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn background_sweep_forgets_idle_clients() {
    let handle = RateLimiter::start(&RateLimitConfig::default()).unwrap();
    let limiter = Arc::clone(handle.limiter());

    limiter.check("10.0.0.5");
    assert_eq!(limiter.len(), 1);

    // One window of idleness plus one sweep period.
    tokio::time::sleep(Duration::from_secs(121)).await;
    tokio::task::yield_now().await;
    assert!(limiter.is_empty());

    handle.shutdown().await;
}
