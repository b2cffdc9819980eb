use crate::config::{ObjectStoreBackend, ServerConfig};
use crate::ocr::{HttpOcrClient, OcrClient, UnconfiguredOcr};
use crate::store::{
    FilesystemObjectStore, InMemoryObjectStore, InMemoryUserStore, ObjectStore, UserStore,
};
use gatekeep::{ApiKeySet, ConfigError, RateLimiter, RateLimiterHandle, TokenCodec};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Per-client request counters, shared by every rate-limited route
    pub rate_limiter: Arc<RateLimiter>,

    /// Accepted API keys; replaceable at runtime
    pub api_keys: ApiKeySet,

    /// Signs and verifies login tokens
    pub tokens: Arc<TokenCodec>,

    pub users: Arc<dyn UserStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub ocr: Arc<dyn OcrClient>,

    /// Prometheus renderer, present once a recorder is installed
    pub metrics: Option<PrometheusHandle>,

    pub started_at: Instant,

    sweeper: Arc<Mutex<Option<RateLimiterHandle>>>,
}

impl ServerState {
    /// Create state with the collaborators selected by `config`.
    ///
    /// Starts the rate limiter's sweep, so this must run inside a tokio
    /// runtime. Call [`ServerState::shutdown`] to stop it.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
        let objects: Arc<dyn ObjectStore> = match config.object_store.backend {
            ObjectStoreBackend::Filesystem => Arc::new(FilesystemObjectStore::new(
                config.public_base_url.clone(),
                config.object_store.root_dir.clone(),
            )),
            ObjectStoreBackend::Memory => {
                tracing::warn!("Uploads are kept in memory and lost on restart");
                Arc::new(InMemoryObjectStore::with_max_bytes(
                    config.public_base_url.clone(),
                    config.object_store.memory_max_bytes,
                ))
            }
        };
        let ocr: Arc<dyn OcrClient> = match &config.ocr_endpoint {
            Some(endpoint) => Arc::new(HttpOcrClient::new(endpoint.clone(), config.timeout())),
            None => Arc::new(UnconfiguredOcr),
        };

        Self::with_collaborators(config, users, objects, ocr)
    }

    /// Create state with caller-supplied collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        users: Arc<dyn UserStore>,
        objects: Arc<dyn ObjectStore>,
        ocr: Arc<dyn OcrClient>,
    ) -> Result<Self, ConfigError> {
        config.admission.validate()?;
        let sweeper = RateLimiter::start(&config.admission.rate_limit)?;
        let rate_limiter = Arc::clone(sweeper.limiter());
        let api_keys = ApiKeySet::new(config.admission.api_keys.iter().cloned());
        let tokens = Arc::new(TokenCodec::from_config(&config.admission.token));

        Ok(Self {
            config: Arc::new(config),
            rate_limiter,
            api_keys,
            tokens,
            users,
            objects,
            ocr,
            metrics: None,
            started_at: Instant::now(),
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Swap the accepted API keys. Verifiers already wired into routes see
    /// the new set on their next check. An empty set is refused and the
    /// current keys stay in place.
    pub fn reload_api_keys<I, S>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            tracing::warn!("Ignoring API key reload with no keys");
            return false;
        }
        self.api_keys.replace(keys);
        tracing::info!(count = self.api_keys.len(), "API keys reloaded");
        true
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Stop background work owned by the state. Safe to call more than once.
    pub async fn shutdown(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}
