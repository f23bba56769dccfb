//! The search engine: one vector store, an ingestion pipeline and a
//! retriever.
//!
//! Construct it once at process start and share it behind an `Arc`. Queries
//! hold the store's read lock only for the index lookup; ingestion loads and
//! embeds first and holds the write lock only for the insert. Persists are
//! serialized so each one writes a complete snapshot.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use semsearch_core::config::{BackendKind, SemsearchConfig};
use semsearch_core::{Document, IngestReport, Result, SearchError, SearchResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::embedding::DynEmbeddingService;
use crate::index::{open_store, VectorStore};
use crate::pipeline::{IngestionPipeline, PreparedBatch};
use crate::search::Retriever;

pub struct SearchEngine {
    store: RwLock<Box<dyn VectorStore>>,
    persist_lock: Mutex<()>,
    embedder: Arc<dyn DynEmbeddingService>,
    pipeline: IngestionPipeline,
    retriever: Retriever,
    backend: BackendKind,
    index_path: PathBuf,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("backend", &self.backend)
            .field("index_path", &self.index_path)
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl SearchEngine {
    /// Validate `config`, open the configured backend and build the engine.
    pub async fn from_config(
        config: &SemsearchConfig,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Result<Self> {
        config.validate()?;
        let store = open_store(config, embedder.dimensions()).await?;
        Self::with_store(config, embedder, store)
    }

    /// Build around an already opened store.
    pub fn with_store(
        config: &SemsearchConfig,
        embedder: Arc<dyn DynEmbeddingService>,
        store: Box<dyn VectorStore>,
    ) -> Result<Self> {
        if store.dimension() != embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimensions(),
            });
        }
        let backend = store.backend();
        info!(
            backend = %backend,
            dimension = store.dimension(),
            entries = store.len(),
            model = %config.embedding.model,
            "Search engine ready"
        );
        Ok(Self {
            pipeline: IngestionPipeline::from_config(config, Arc::clone(&embedder))?,
            retriever: Retriever::from_config(&config.retrieval),
            store: RwLock::new(store),
            persist_lock: Mutex::new(()),
            embedder,
            backend,
            index_path: config.index_path(),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Entries currently in the index.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Load, chunk, embed and index `sources`.
    #[instrument(skip_all, fields(sources = sources.len(), batch_id = tracing::field::Empty))]
    pub async fn ingest(&self, sources: &[String]) -> Result<IngestReport> {
        let batch_id = Uuid::new_v4();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));
        let batch = self.pipeline.prepare(sources, batch_id).await?;
        self.commit(batch).await
    }

    /// Index documents that were loaded elsewhere.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn ingest_documents(&self, documents: Vec<Document>) -> Result<IngestReport> {
        let report = IngestReport::new(Uuid::new_v4());
        let batch = self.pipeline.prepare_documents(documents, report).await?;
        self.commit(batch).await
    }

    async fn commit(&self, batch: PreparedBatch) -> Result<IngestReport> {
        let PreparedBatch {
            vectors,
            records,
            report,
        } = batch;
        if records.is_empty() {
            debug!("Nothing to insert");
            return Ok(report);
        }

        let total = {
            let mut store = self.store.write().await;
            store.insert(vectors, records).await?;
            store.len()
        };
        info!(
            batch_id = %report.batch_id,
            documents = report.documents,
            chunks = report.chunks,
            failed = report.failed.len(),
            total,
            "Ingest complete"
        );
        Ok(report)
    }

    /// Top results for `query`, at most one per source. An empty query
    /// returns an empty result without embedding anything.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn search(&self, query: &str) -> Result<SearchResult> {
        if query.trim().is_empty() {
            debug!("Empty query");
            return Ok(SearchResult::empty(query));
        }

        let vector = self.embedder.embed_query_boxed(query).await?;
        let hits = {
            let store = self.store.read().await;
            self.retriever.retrieve(&**store, &vector).await?
        };
        debug!(results = hits.len(), "Search complete");
        Ok(SearchResult {
            query: query.to_string(),
            hits,
        })
    }

    /// `search` bounded by `deadline`.
    pub async fn search_within(&self, query: &str, deadline: Duration) -> Result<SearchResult> {
        with_deadline(deadline, self.search(query)).await
    }

    /// `ingest` bounded by `deadline`. A batch cut off before its insert
    /// starts leaves the index untouched; an insert already handed to the
    /// index runs to completion.
    pub async fn ingest_within(&self, sources: &[String], deadline: Duration) -> Result<IngestReport> {
        with_deadline(deadline, self.ingest(sources)).await
    }

    /// Persist to the configured index path.
    pub async fn persist(&self) -> Result<()> {
        self.persist_to(&self.index_path).await
    }

    pub async fn persist_to(&self, path: &Path) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.store.read().await.persist(path).await
    }
}

async fn with_deadline<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| SearchError::Timeout(deadline.as_millis() as u64))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::index::{EmbeddedIndex, HnswParams};

    fn config(dir: &Path) -> SemsearchConfig {
        let mut config = SemsearchConfig::default();
        config.general.data_dir = dir.display().to_string();
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 20;
        config
    }

    async fn engine(dir: &Path) -> SearchEngine {
        SearchEngine::from_config(&config(dir), Arc::new(HashEmbedding::new(16)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_engine_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        assert!(engine.is_empty().await);
        assert_eq!(engine.backend(), BackendKind::Embedded);
        assert_eq!(engine.dimension(), 16);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.chunking.chunk_overlap = 500;
        let err = SearchEngine::from_config(&config, Arc::new(HashEmbedding::new(16)))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[tokio::test]
    async fn test_store_dimension_must_match_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(EmbeddedIndex::new(8, HnswParams::default()).unwrap());
        let err = SearchEngine::with_store(&config(dir.path()), Arc::new(HashEmbedding::new(16)), store)
            .unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 8, actual: 16 }));
    }

    #[tokio::test]
    async fn test_ingest_files_then_search() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "The quick brown fox.").unwrap();
        let engine = engine(dir.path()).await;

        let report = engine.ingest(&[a.display().to_string()]).await.unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(engine.len().await, 1);

        let result = engine.search("The quick brown fox.").await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].record.source, a.display().to_string());
        assert!((result.hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_failed_ingest_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let err = engine
            .ingest(&["/no/such/file.txt".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::LoadFailure { .. }));
        assert!(engine.is_empty().await);
    }

    #[tokio::test]
    async fn test_search_empty_index_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let result = engine.search("anything").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.query, "anything");
    }

    #[tokio::test]
    async fn test_persist_writes_index_path() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .ingest_documents(vec![Document::new("mem://a", "persist me")])
            .await
            .unwrap();
        engine.persist().await.unwrap();
        assert!(engine.index_path().exists());

        let reopened = SearchEngine::from_config(&config(dir.path()), Arc::new(HashEmbedding::new(16)))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(dir.path()).await);
        let documents = (0..3000)
            .map(|i| Document::new(format!("mem://doc{i}"), format!("entry number {i}")))
            .collect();
        engine.ingest_documents(documents).await.unwrap();

        for _ in 0..20 {
            let a = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.persist().await }
            });
            let b = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.persist().await }
            });
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();
        }

        let reopened = SearchEngine::from_config(&config(dir.path()), Arc::new(HashEmbedding::new(16)))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 3000);
    }

    #[tokio::test]
    async fn test_ingest_within_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "bounded ingest").unwrap();
        let engine = engine(dir.path()).await;
        let report = engine
            .ingest_within(&[a.display().to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(engine.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_within_generous_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine
            .ingest_documents(vec![Document::new("mem://a", "deadline text")])
            .await
            .unwrap();
        let result = engine
            .search_within("deadline text", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let err = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SearchError::Timeout(10)));
    }
}
