//! gatekeep-server - HTTP surface for the gatekeep admission pipeline
//!
//! Every gated route passes through the same admission middleware: an
//! optional per-client rate limit, then an optional credential check
//! (static API key or signed login token). Handlers only run for admitted
//! requests and receive the verified principal, if any, as an extension.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! ## Public
//!
//! - `GET /health` - Liveness check
//! - `GET /metrics` - Prometheus metrics
//! - `GET /upload/mock/{id}` - Serve an uploaded object
//!
//! ## Rate limited
//!
//! - `POST /auth/login` - Exchange email and password for a token
//! - `POST /users` - Register a user
//!
//! ## API key (`Authorization: Bearer <api_key>`)
//!
//! - `GET /users` - List users
//!
//! ## Token (`Authorization: Bearer <token>`)
//!
//! - `GET /data`, `POST /data` - OCR passthrough
//! - `POST /upload` - Upload a file
//!
//! Errors are always `{"error": "...", "status": <code>}`; 429 responses
//! also carry `Retry-After`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ocr;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
