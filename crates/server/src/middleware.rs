use crate::error::ServerError;
use crate::state::ServerState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use gatekeep::{
    Admission, AdmissionError, ApiKeyVerifier, ClientKey, CredentialVerifier, TokenVerifier,
};
use std::sync::Arc;

/// One admission policy plus what the middleware needs to apply it.
#[derive(Debug, Clone)]
pub struct RouteGate {
    admission: Admission,
    client_address_header: String,
}

impl RouteGate {
    pub fn new(admission: Admission, client_address_header: impl Into<String>) -> Self {
        Self {
            admission,
            client_address_header: client_address_header.into(),
        }
    }
}

/// The three policies routes are wired through.
#[derive(Debug, Clone)]
pub struct RouteGates {
    /// Rate limited, no credentials (login, registration)
    pub rate_limited: Arc<RouteGate>,
    /// Static API key
    pub api_key: Arc<RouteGate>,
    /// Signed login token
    pub token: Arc<RouteGate>,
}

impl RouteGates {
    pub fn from_state(state: &ServerState) -> Self {
        let header = state.config.admission.rate_limit.client_address_header.clone();
        let api_keys: Arc<dyn CredentialVerifier> =
            Arc::new(ApiKeyVerifier::new(state.api_keys.clone()));
        let tokens: Arc<dyn CredentialVerifier> =
            Arc::new(TokenVerifier::new(Arc::clone(&state.tokens)));

        Self {
            rate_limited: Arc::new(RouteGate::new(
                Admission::new().rate_limited(Arc::clone(&state.rate_limiter)),
                header.clone(),
            )),
            api_key: Arc::new(RouteGate::new(
                Admission::new().verified_by(api_keys),
                header.clone(),
            )),
            token: Arc::new(RouteGate::new(Admission::new().verified_by(tokens), header)),
        }
    }
}

/// Admission middleware
///
/// Runs the gate's checks in order (rate limit, then credentials). On
/// success the principal, if any, is placed in request extensions for the
/// handler; on failure the handler is never reached.
pub async fn admission_gate(
    State(gate): State<Arc<RouteGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let client_key = ClientKey::resolve(&gate.client_address_header, |name| {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    });
    // A non-UTF-8 header is present but unreadable: treat it as malformed.
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default());

    let admitted = gate.admission.admit(client_key.as_str(), authorization);

    match admitted {
        Ok(principal) => {
            metrics::counter!("admission_requests_total", "outcome" => "admitted").increment(1);
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            Ok(next.run(request).await)
        }
        Err(err) => {
            let outcome = match &err {
                AdmissionError::RateLimited { .. } => "rate_limited",
                AdmissionError::Unauthorized(_) => "unauthorized",
            };
            metrics::counter!("admission_requests_total", "outcome" => outcome).increment(1);
            tracing::debug!(
                client = %client_key,
                anonymous = client_key.is_anonymous(),
                reason = %err,
                "request rejected"
            );
            Err(err.into())
        }
    }
}

/// Request ID injection middleware
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Request identifier carried in extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Logging middleware
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        "Request started"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        request_id = %request_id,
        "Request completed"
    );

    response
}
