use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form document metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Canonical metadata key for the originating source.
pub const SOURCE_KEY: &str = "source";

/// Metadata keys consulted, in order, when a record has no canonical source.
pub const SOURCE_FALLBACK_KEYS: [&str; 3] = ["source", "url", "file_path"];

// =============================================================================
// Ingestion
// =============================================================================

/// Raw content produced by a loader. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    /// File path or URL the content was read from.
    pub source: String,
    pub metadata: Metadata,
}

impl Document {
    /// Create a document whose metadata carries the canonical `source` key.
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        let source = source.into();
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), source.clone().into());
        Self {
            content: content.into(),
            source,
            metadata,
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A contiguous text segment of one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    /// Offset in characters from the start of the document.
    pub start_offset: usize,
    pub metadata: Metadata,
}

impl Chunk {
    /// Convert into the payload stored alongside the chunk's vector.
    pub fn into_record(self) -> ChunkRecord {
        ChunkRecord {
            text: self.text,
            source: self.source,
            offset: self.start_offset,
            metadata: self.metadata,
        }
    }
}

/// Payload stored with every index entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub source: String,
    pub offset: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChunkRecord {
    /// Deduplication key for this record.
    ///
    /// Records written by the ingestion pipeline always carry `source`. The
    /// metadata fallback only applies to payloads written by other tools.
    pub fn source_key(&self) -> &str {
        if !self.source.is_empty() {
            return &self.source;
        }
        SOURCE_FALLBACK_KEYS
            .iter()
            .filter_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

// =============================================================================
// Retrieval
// =============================================================================

/// A single query match. `score` is cosine similarity, higher is better.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Index entry id (insertion position or remote point id).
    pub id: u64,
    pub score: f32,
    #[serde(flatten)]
    pub record: ChunkRecord,
}

/// Deduplicated, ranked hits for one query. Every source appears once.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<Hit>,
}

impl SearchResult {
    /// The empty result for `query`.
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hits: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Sources in result order.
    pub fn sources(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.record.source_key()).collect()
    }
}

/// A source skipped during an ingest with failure isolation enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSource {
    pub source: String,
    pub reason: String,
}

/// Outcome of one ingest batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub batch_id: Uuid,
    /// Sources that loaded successfully.
    pub sources: Vec<String>,
    pub documents: usize,
    pub chunks: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedSource>,
}

impl IngestReport {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            sources: Vec::new(),
            documents: 0,
            chunks: 0,
            failed: Vec::new(),
        }
    }
}
