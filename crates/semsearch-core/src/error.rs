use thiserror::Error;

/// Error type shared by every semsearch crate.
///
/// An empty query and a result with fewer than `top_k` hits are normal
/// outcomes and never surface as errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A vector's length disagrees with the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A source could not be read. `origin` is the exact source identifier.
    #[error("Failed to load {origin}: {reason}")]
    LoadFailure { origin: String, reason: String },

    /// The remote vector service is unreachable or returned an error.
    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SearchError {
    /// Build a `LoadFailure` for `origin`.
    pub fn load_failure(origin: impl Into<String>, reason: impl ToString) -> Self {
        SearchError::LoadFailure {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that need operator attention rather than a
    /// different request from the caller.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            SearchError::BackendUnavailable(_) | SearchError::Timeout(_)
        )
    }
}

impl From<toml::de::Error> for SearchError {
    fn from(err: toml::de::Error) -> Self {
        SearchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SearchError {
    fn from(err: toml::ser::Error) -> Self {
        SearchError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for semsearch operations.
pub type Result<T> = std::result::Result<T, SearchError>;
