//! Query-time over-fetch and source deduplication.

use std::collections::HashSet;

use semsearch_core::config::RetrievalConfig;
use semsearch_core::{Hit, Result};
use tracing::debug;

use crate::index::VectorStore;

/// Raw hits to request for `top_k` results: `top_k * multiplier`, capped at
/// the number of entries in the index.
pub fn overfetch_count(top_k: usize, multiplier: usize, total: usize) -> usize {
    top_k.saturating_mul(multiplier).min(total)
}

/// Keep the first hit of every source, in the order given, until `top_k`
/// sources are accepted.
///
/// `hits` must be best-first. The first hit seen for a source is then its
/// best one, so the output needs no second sort.
pub fn dedup_by_source(hits: Vec<Hit>, top_k: usize) -> Vec<Hit> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted = Vec::with_capacity(top_k.min(hits.len()));
    for hit in hits {
        if accepted.len() >= top_k {
            break;
        }
        if seen.insert(hit.record.source_key().to_string()) {
            accepted.push(hit);
        }
    }
    accepted
}

/// Turns a query vector into at most `top_k` hits with distinct sources.
#[derive(Debug, Clone)]
pub struct Retriever {
    top_k: usize,
    multiplier: usize,
    adaptive: bool,
}

impl Retriever {
    pub fn new(top_k: usize, multiplier: usize, adaptive: bool) -> Self {
        Self {
            top_k: top_k.max(1),
            multiplier: multiplier.max(1),
            adaptive,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.top_k, config.overfetch_multiplier, config.adaptive_overfetch)
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Query `store` and deduplicate.
    ///
    /// With adaptive over-fetch enabled, a window that yields fewer than
    /// `top_k` sources is doubled and re-queried until enough sources are
    /// found or the window covers the whole index.
    pub async fn retrieve(&self, store: &dyn VectorStore, query: &[f32]) -> Result<Vec<Hit>> {
        let total = store.len();
        let mut window = overfetch_count(self.top_k, self.multiplier, total);

        loop {
            if window == 0 {
                return Ok(Vec::new());
            }
            let raw = store.search(query, window).await?;
            let raw_len = raw.len();
            let hits = dedup_by_source(raw, self.top_k);

            let exhausted = window >= total || raw_len < window;
            if !self.adaptive || hits.len() >= self.top_k || exhausted {
                debug!(window, raw = raw_len, results = hits.len(), "Retrieved");
                return Ok(hits);
            }
            debug!(window, found = hits.len(), "Too few sources, widening window");
            window = window.saturating_mul(2).min(total);
        }
    }
}
