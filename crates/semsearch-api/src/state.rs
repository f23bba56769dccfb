//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use semsearch_core::SemsearchConfig;
use semsearch_vector::SearchEngine;

use crate::metrics::ApiMetrics;

/// Bound on a single search request, embedding included.
pub const DEFAULT_SEARCH_DEADLINE: Duration = Duration::from_secs(30);

/// Bound on loading, embedding and indexing one ingest batch.
pub const DEFAULT_INGEST_DEADLINE: Duration = Duration::from_secs(600);

/// Shared application state. Cloned per request; every field is cheap to
/// clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub config: Arc<SemsearchConfig>,
    pub metrics: Arc<ApiMetrics>,
    pub search_deadline: Duration,
    pub ingest_deadline: Duration,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: SemsearchConfig, engine: Arc<SearchEngine>) -> prometheus::Result<Self> {
        Ok(Self {
            engine,
            config: Arc::new(config),
            metrics: Arc::new(ApiMetrics::new()?),
            search_deadline: DEFAULT_SEARCH_DEADLINE,
            ingest_deadline: DEFAULT_INGEST_DEADLINE,
            start_time: Instant::now(),
        })
    }
}
