use gatekeep::AdmissionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Keys installed when none are configured, so a fresh checkout can be
/// exercised locally.
const DEV_API_KEYS: [&str; 2] = ["api_key_1", "api_key_2"];
const DEV_TOKEN_SECRET: &str = "gatekeep-development-secret";

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Expose Prometheus metrics on /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Prefix for URLs of uploaded objects
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// OCR service endpoint; OCR requests fail when unset
    #[serde(default)]
    pub ocr_endpoint: Option<String>,

    /// Where uploaded objects are kept
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Rate limiter, token and API key settings
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Backing store for uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreBackend {
    /// One file per object under `root_dir`
    #[default]
    Filesystem,
    /// Process memory, capped at `memory_max_bytes`; development and tests only
    Memory,
}

/// Upload storage settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub backend: ObjectStoreBackend,

    /// Directory for the filesystem backend
    #[serde(default = "default_upload_dir")]
    pub root_dir: PathBuf,

    /// Capacity of the memory backend; oldest objects are evicted beyond it
    #[serde(default = "default_memory_max_bytes")]
    pub memory_max_bytes: usize,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::default(),
            root_dir: default_upload_dir(),
            memory_max_bytes: default_memory_max_bytes(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            enable_cors: default_true(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            public_base_url: default_public_base_url(),
            ocr_endpoint: None,
            object_store: ObjectStoreConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `.env`, an optional `server.*` file, and
    /// `GATEKEEP__*` environment variables, in increasing precedence.
    ///
    /// `API_KEYS` (comma separated) and `JWT_SECRET` are honoured as flat
    /// aliases for the nested admission settings.
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("server").required(false))
            .add_source(config::Environment::with_prefix("GATEKEEP").separator("__"));

        let mut config: ServerConfig = builder.build()?.try_deserialize()?;
        config.apply_env_aliases(
            std::env::var("API_KEYS").ok().as_deref(),
            std::env::var("JWT_SECRET").ok().as_deref(),
        );
        config.fill_development_defaults();
        config.admission.validate()?;

        Ok(config)
    }

    fn apply_env_aliases(&mut self, api_keys: Option<&str>, jwt_secret: Option<&str>) {
        if let Some(keys) = api_keys {
            self.admission.api_keys.extend(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            );
        }
        if let Some(secret) = jwt_secret.filter(|s| !s.is_empty()) {
            self.admission.token.secret = secret.to_string();
        }
    }

    fn fill_development_defaults(&mut self) {
        if self.admission.api_keys.is_empty() {
            tracing::warn!("No API keys configured, using development keys");
            self.admission
                .api_keys
                .extend(DEV_API_KEYS.iter().map(|k| k.to_string()));
        }
        if self.admission.token.secret.is_empty() {
            tracing::warn!("No token secret configured, using development secret");
            self.admission.token.secret = DEV_TOKEN_SECRET.to_string();
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get max body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_public_base_url() -> String {
    "/upload/mock".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_memory_max_bytes() -> usize {
    64 * 1024 * 1024
}
