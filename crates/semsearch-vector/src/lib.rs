//! Embedding, vector indexing, ingestion and retrieval.

pub mod embedding;
pub mod engine;
pub mod index;
pub mod pipeline;
pub mod remote;
pub mod search;

pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding, OnnxEmbeddingService};
pub use engine::SearchEngine;
pub use index::{open_store, EmbeddedIndex, HnswParams, VectorStore};
pub use pipeline::{IngestionPipeline, PreparedBatch};
pub use remote::QdrantIndex;
pub use search::{dedup_by_source, overfetch_count, Retriever};
