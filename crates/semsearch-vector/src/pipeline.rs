//! Ingestion: sources -> documents -> chunks -> vectors.
//!
//! Everything here runs without touching the index. The engine inserts the
//! prepared batch afterwards under its write lock.

use std::sync::Arc;

use semsearch_core::config::SemsearchConfig;
use semsearch_core::{
    Chunk, ChunkRecord, Document, FailedSource, IngestReport, Result, SearchError, SOURCE_KEY,
};
use semsearch_ingest::{DocumentSplitter, LoaderRegistry};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::DynEmbeddingService;

/// Vectors and records ready for insertion. `vectors[i]` belongs to
/// `records[i]`.
#[derive(Debug)]
pub struct PreparedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub records: Vec<ChunkRecord>,
    pub report: IngestReport,
}

/// Loads, chunks and embeds sources.
pub struct IngestionPipeline {
    loaders: LoaderRegistry,
    splitter: DocumentSplitter,
    embedder: Arc<dyn DynEmbeddingService>,
    isolate_failures: bool,
}

impl IngestionPipeline {
    pub fn new(
        loaders: LoaderRegistry,
        splitter: DocumentSplitter,
        embedder: Arc<dyn DynEmbeddingService>,
        isolate_failures: bool,
    ) -> Self {
        Self {
            loaders,
            splitter,
            embedder,
            isolate_failures,
        }
    }

    pub fn from_config(config: &SemsearchConfig, embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        Ok(Self::new(
            LoaderRegistry::new(&config.ingest)?,
            DocumentSplitter::from_config(&config.chunking)?,
            embedder,
            config.ingest.isolate_failures,
        ))
    }

    /// Load every source and prepare the batch.
    ///
    /// The first failing source aborts the batch unless failure isolation is
    /// on, in which case it is skipped and listed in the report.
    pub async fn prepare(&self, sources: &[String], batch_id: Uuid) -> Result<PreparedBatch> {
        let mut report = IngestReport::new(batch_id);
        let mut documents = Vec::new();

        for source in sources {
            match self.loaders.load(source).await {
                Ok(docs) => {
                    debug!(source = %source, documents = docs.len(), "Loaded source");
                    report.sources.push(source.clone());
                    documents.extend(docs);
                }
                Err(err) if self.isolate_failures => {
                    warn!(source = %source, error = %err, "Skipping source that failed to load");
                    report.failed.push(FailedSource {
                        source: source.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        self.prepare_documents(documents, report).await
    }

    /// Chunk and embed already loaded documents.
    pub async fn prepare_documents(
        &self,
        documents: Vec<Document>,
        mut report: IngestReport,
    ) -> Result<PreparedBatch> {
        report.documents += documents.len();

        let chunks: Vec<Chunk> = self
            .splitter
            .split(&documents)
            .into_iter()
            .map(canonicalize_source)
            .collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let vectors = self.embedder.embed_batch_boxed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(SearchError::Embedding(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }

        let records: Vec<ChunkRecord> = chunks.into_iter().map(Chunk::into_record).collect();
        report.chunks += records.len();
        debug!(
            documents = report.documents,
            chunks = report.chunks,
            "Prepared ingest batch"
        );

        Ok(PreparedBatch {
            vectors,
            records,
            report,
        })
    }
}

/// Make `source` the single canonical place for the chunk's origin.
fn canonicalize_source(mut chunk: Chunk) -> Chunk {
    if chunk.source.is_empty() {
        if let Some(s) = chunk.metadata.get(SOURCE_KEY).and_then(|v| v.as_str()) {
            chunk.source = s.to_string();
        }
    }
    chunk
        .metadata
        .insert(SOURCE_KEY.to_string(), chunk.source.clone().into());
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use semsearch_core::Metadata;

    fn pipeline(isolate_failures: bool) -> IngestionPipeline {
        let mut config = SemsearchConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.chunk_overlap = 20;
        config.ingest.isolate_failures = isolate_failures;
        IngestionPipeline::from_config(&config, Arc::new(HashEmbedding::new(8))).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_keeps_vectors_aligned_with_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "Alpha sentence. ".repeat(20)).unwrap();
        std::fs::write(&b, "Beta only.").unwrap();
        let sources = vec![a.display().to_string(), b.display().to_string()];

        let batch = pipeline(false).prepare(&sources, Uuid::new_v4()).await.unwrap();
        assert_eq!(batch.vectors.len(), batch.records.len());
        assert!(batch.records.len() > 2);
        assert_eq!(batch.report.documents, 2);
        assert_eq!(batch.report.chunks, batch.records.len());
        assert_eq!(batch.report.sources, sources);

        let embedder = HashEmbedding::new(8);
        for (vector, record) in batch.vectors.iter().zip(&batch.records) {
            assert_eq!(vector, &embedder.hash_to_vector(&record.text));
        }
        assert_eq!(batch.records.last().unwrap().source, sources[1]);
    }

    #[tokio::test]
    async fn test_prepare_aborts_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "fine").unwrap();
        let missing = dir.path().join("missing.txt").display().to_string();
        let sources = vec![good.display().to_string(), missing.clone()];

        let err = pipeline(false).prepare(&sources, Uuid::new_v4()).await.unwrap_err();
        match err {
            SearchError::LoadFailure { origin, .. } => assert_eq!(origin, missing),
            other => panic!("Expected LoadFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_isolates_failures_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "fine").unwrap();
        let missing = dir.path().join("missing.txt").display().to_string();
        let sources = vec![missing.clone(), good.display().to_string()];

        let batch = pipeline(true).prepare(&sources, Uuid::new_v4()).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.report.failed.len(), 1);
        assert_eq!(batch.report.failed[0].source, missing);
        assert_eq!(batch.report.sources, vec![good.display().to_string()]);
    }

    #[tokio::test]
    async fn test_prepare_documents_sets_canonical_source() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), "legacy.txt".into());
        let doc = Document {
            content: "text from elsewhere".into(),
            source: String::new(),
            metadata,
        };
        let batch = pipeline(false)
            .prepare_documents(vec![doc], IngestReport::new(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(batch.records[0].source, "legacy.txt");
        assert_eq!(batch.records[0].metadata["source"], serde_json::json!("legacy.txt"));
    }

    #[tokio::test]
    async fn test_prepare_empty_sources() {
        let batch = pipeline(false).prepare(&[], Uuid::new_v4()).await.unwrap();
        assert!(batch.vectors.is_empty());
        assert_eq!(batch.report.chunks, 0);
    }
}
