use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SearchError};

/// Top-level configuration for the search engine.
///
/// Loaded from `~/.semsearch/config.toml` by default. Every section falls
/// back to its defaults, so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemsearchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl SemsearchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SemsearchConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(SearchError::Config("chunking.chunk_size must be > 0".into()));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(SearchError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(SearchError::Config("retrieval.top_k must be > 0".into()));
        }
        if self.retrieval.overfetch_multiplier == 0 {
            return Err(SearchError::Config(
                "retrieval.overfetch_multiplier must be > 0".into(),
            ));
        }
        if self.index.ef_search == 0 || self.index.ef_construction == 0 {
            return Err(SearchError::Config(
                "index.ef_search and index.ef_construction must be > 0".into(),
            ));
        }
        if self.index.backend == BackendKind::Remote && self.remote.collection.trim().is_empty() {
            return Err(SearchError::Config(
                "remote.collection must be set when index.backend = \"remote\"".into(),
            ));
        }
        Ok(())
    }

    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// Where the embedded index is persisted.
    pub fn index_path(&self) -> PathBuf {
        if self.index.index_file.is_empty() {
            self.data_dir().join("index.bin")
        } else {
            expand_home(&self.index.index_file)
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for local uploads and the persisted index.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.semsearch/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Which embedding implementation the binary constructs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Sentence-transformer model run through ONNX Runtime.
    #[default]
    Onnx,
    /// Deterministic hash vectors. Development and tests only.
    Hash,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub model: String,
    pub provider: EmbeddingProvider,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Vector dimension used by the hash provider.
    pub dimensions: usize,
    /// Tokens kept per input before truncation.
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            provider: EmbeddingProvider::Onnx,
            model_dir: "~/.semsearch/models/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            max_tokens: 256,
        }
    }
}

/// Chunker settings, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Query-time settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum number of deduplicated results per query.
    pub top_k: usize,
    /// Raw hits fetched per result slot before deduplication.
    pub overfetch_multiplier: usize,
    /// Double the over-fetch until `top_k` distinct sources are found or the
    /// whole index has been scanned.
    pub adaptive_overfetch: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            overfetch_multiplier: 5,
            adaptive_overfetch: false,
        }
    }
}

/// Vector index backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process HNSW graph persisted to `index.index_file`.
    #[default]
    Embedded,
    /// Qdrant collection at `remote.url`.
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Embedded => f.write_str("embedded"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" => Ok(BackendKind::Embedded),
            "remote" | "qdrant" => Ok(BackendKind::Remote),
            other => Err(SearchError::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: BackendKind,
    /// Candidate frontier size while linking a new node.
    pub ef_construction: usize,
    /// Candidate frontier size while answering a query.
    pub ef_search: usize,
    /// Persisted index file. Empty means `<data_dir>/index.bin`.
    pub index_file: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Embedded,
            ef_construction: 200,
            ef_search: 32,
            index_file: String::new(),
        }
    }
}

/// Remote vector service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// gRPC address of the Qdrant service.
    pub url: String,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            collection: "semantic_search".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Ingest the data directory when the process starts with an empty index.
    pub startup_ingest: bool,
    /// File extensions picked up when a directory is ingested.
    pub extensions: Vec<String>,
    /// Skip sources that fail to load and report them, instead of aborting
    /// the whole batch.
    pub isolate_failures: bool,
    /// Timeout for fetching a remote URL.
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            startup_ingest: true,
            extensions: ["txt", "md", "html", "htm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            isolate_failures: false,
            fetch_timeout_secs: 30,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}
