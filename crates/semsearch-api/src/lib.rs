//! HTTP layer for the semantic search engine.
//!
//! Exposes health, search, ingest and Prometheus metrics over axum.
//! Handlers only call the engine's `search` and `ingest`; all retrieval
//! logic lives in `semsearch-vector`.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use metrics::ApiMetrics;
pub use routes::{create_router, start_server};
pub use state::AppState;
