//! Vector index abstraction and the embedded HNSW backend.
//!
//! `VectorStore` is the capability set the engine relies on: insert, search
//! and persist. The engine picks one implementation at construction through
//! [`open_store`] and never looks at the backend again.
//!
//! The embedded backend wraps rust-cv/hnsw. Graph construction and file
//! writes are CPU and disk bound, so the async entry points run them on the
//! blocking pool.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use hnsw::{Hnsw, Params, Searcher};
use rand::rngs::StdRng;
use semsearch_core::config::{BackendKind, SemsearchConfig};
use semsearch_core::{ChunkRecord, Hit, Metadata, Result, SearchError};
use serde::{Deserialize, Serialize};
use space::{Metric, Neighbor};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::remote::QdrantIndex;

/// Searchable collection of (vector, record) pairs.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Dimension every inserted and queried vector must have.
    fn dimension(&self) -> usize;

    /// Number of entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `vectors[i]` with `records[i]`. Either every pair is inserted or
    /// none is. Returns the ids assigned.
    async fn insert(&mut self, vectors: Vec<Vec<f32>>, records: Vec<ChunkRecord>) -> Result<Vec<u64>>;

    /// Up to `k` hits, best first.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>>;

    /// Make the current contents durable at `path`.
    async fn persist(&self, path: &Path) -> Result<()>;
}

/// Build the store selected by `config.index.backend`.
///
/// The embedded backend loads `config.index_path()` when it exists and starts
/// empty otherwise.
pub async fn open_store(config: &SemsearchConfig, dimension: usize) -> Result<Box<dyn VectorStore>> {
    match config.index.backend {
        BackendKind::Embedded => {
            let params = HnswParams {
                ef_construction: config.index.ef_construction,
                ef_search: config.index.ef_search,
            };
            let path = config.index_path();
            let index = blocking(move || EmbeddedIndex::open_or_create(&path, dimension, params)).await?;
            Ok(Box::new(index))
        }
        BackendKind::Remote => {
            let index = QdrantIndex::connect(&config.remote, dimension).await?;
            Ok(Box::new(index))
        }
    }
}

pub(crate) fn check_lengths(vectors: &[Vec<f32>], records: &[ChunkRecord]) -> Result<()> {
    if vectors.len() != records.len() {
        return Err(SearchError::Index(format!(
            "{} vectors but {} records",
            vectors.len(),
            records.len()
        )));
    }
    Ok(())
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SearchError::Index(format!("index task panicked: {e}")))?
}

pub(crate) fn check_dimensions(vectors: &[Vec<f32>], dimension: usize) -> Result<()> {
    match vectors.iter().find(|v| v.len() != dimension) {
        Some(bad) => Err(SearchError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Embedded backend
// ---------------------------------------------------------------------------

/// Bumped whenever the persisted layout changes.
const FORMAT_VERSION: u32 = 2;
const MAGIC: [u8; 4] = *b"SSIX";

/// Neighbours per node above layer 0.
const M: usize = 16;
/// Neighbours per node on layer 0.
const M0: usize = 32;

/// Cosine distances in `[0, 2]` are scaled onto the `u32` range.
const DISTANCE_SCALE: f32 = u32::MAX as f32 / 2.0;

type Graph = Hnsw<CosineDistance, Box<[f32]>, StdRng, M, M0>;

/// Frontier sizes for building and querying the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Candidates considered while linking a new node.
    pub ef_construction: usize,
    /// Candidates considered while answering a query. Raised to `k` when a
    /// query asks for more.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            ef_construction: 200,
            ef_search: 32,
        }
    }
}

/// `1 - cosine_similarity`, scaled to `u32`. Zero vectors are maximally far
/// from everything.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return u32::MAX;
        }
        let distance = 1.0 - dot / (norm_a * norm_b);
        // Float to int casts saturate, so rounding noise below 0 lands on 0.
        (distance * DISTANCE_SCALE) as u32
    }
}

fn unscale(distance: u32) -> f32 {
    distance as f32 / DISTANCE_SCALE
}

/// Graph, raw vectors and records. Position `i` in each belongs to the same
/// entry.
struct IndexState {
    graph: Graph,
    searcher: Searcher<u32>,
    ef_construction: usize,
    vectors: Vec<Vec<f32>>,
    records: Vec<ChunkRecord>,
}

impl IndexState {
    fn new(ef_construction: usize) -> Self {
        Self {
            graph: Hnsw::new_params(CosineDistance, Params::new().ef_construction(ef_construction)),
            searcher: Searcher::default(),
            ef_construction,
            vectors: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Callers validate dimensions first; nothing here can fail half way.
    fn append(&mut self, vectors: Vec<Vec<f32>>, records: Vec<ChunkRecord>) -> Vec<usize> {
        let mut ids = Vec::with_capacity(vectors.len());
        for (vector, record) in vectors.into_iter().zip(records) {
            let id = self
                .graph
                .insert(vector.clone().into_boxed_slice(), &mut self.searcher);
            debug_assert_eq!(id, self.records.len());
            self.vectors.push(vector);
            self.records.push(record);
            ids.push(id);
        }
        ids
    }

    fn nearest(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(usize, f32)> {
        let k = k.min(self.records.len());
        if k == 0 {
            return Vec::new();
        }
        let query: Box<[f32]> = query.into();
        let mut searcher = Searcher::default();
        let mut dest = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            k
        ];
        let mut found: Vec<(usize, u32)> = self
            .graph
            .nearest(&query, ef_search.max(k), &mut searcher, &mut dest)
            .iter()
            .filter(|n| n.index != !0)
            .map(|n| (n.index, n.distance))
            .collect();
        found.sort_by_key(|&(id, distance)| (distance, id));
        found
            .into_iter()
            .map(|(id, distance)| (id, unscale(distance)))
            .collect()
    }
}

/// In-process HNSW graph with a parallel record store. Entry `i` of the
/// record store belongs to graph node `i`.
///
/// The state sits behind an `Arc` so inserts and saves can move to the
/// blocking pool.
pub struct EmbeddedIndex {
    state: Arc<RwLock<IndexState>>,
    dimension: usize,
    params: HnswParams,
}

impl std::fmt::Debug for EmbeddedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedIndex")
            .field("dimension", &self.dimension)
            .field("params", &self.params)
            .field("entries", &self.len())
            .finish()
    }
}

/// Record as written to disk. Metadata travels as JSON text because bincode
/// cannot decode self-describing values.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    text: String,
    source: String,
    offset: u64,
    metadata_json: String,
}

/// Written ahead of the body so foreign files are rejected before the body
/// is decoded.
#[derive(Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
}

#[derive(Deserialize)]
struct IndexBody {
    dimension: u64,
    ef_construction: u64,
    vectors: Vec<Vec<f32>>,
    records: Vec<StoredRecord>,
}

/// Write-side mirror of [`IndexBody`]; encodes identically.
#[derive(Serialize)]
struct IndexBodyRef<'a> {
    dimension: u64,
    ef_construction: u64,
    vectors: &'a [Vec<f32>],
    records: Vec<StoredRecord>,
}

impl EmbeddedIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Result<Self> {
        if dimension == 0 {
            return Err(SearchError::Config("index dimension must be > 0".into()));
        }
        if params.ef_construction == 0 || params.ef_search == 0 {
            return Err(SearchError::Config(
                "ef_construction and ef_search must be > 0".into(),
            ));
        }
        Ok(Self {
            state: Arc::new(RwLock::new(IndexState::new(params.ef_construction))),
            dimension,
            params,
        })
    }

    /// Load `path` if it exists, otherwise start empty. A persisted index
    /// with a different dimension is rejected. The search frontier always
    /// comes from `params`; the build frontier of a loaded index is the one
    /// it was built with.
    pub fn open_or_create(path: &Path, dimension: usize, params: HnswParams) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No persisted index, starting empty");
            return Self::new(dimension, params);
        }
        let mut index = Self::load(path)?;
        if index.dimension() != dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: index.dimension(),
            });
        }
        index.set_ef_search(params.ef_search);
        Ok(index)
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }

    pub fn record(&self, id: usize) -> Option<ChunkRecord> {
        self.read().records.get(id).cloned()
    }

    /// Validate everything up front, then append. Nothing is added when any
    /// vector has the wrong dimension.
    pub fn insert_entries(
        &mut self,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<Vec<usize>> {
        check_lengths(&vectors, &records)?;
        check_dimensions(&vectors, self.dimension)?;
        Ok(self.write().append(vectors, records))
    }

    /// Raw `(internal_id, distance)` pairs, ascending distance.
    pub fn search_ids(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.check_query(query)?;
        Ok(self.read().nearest(query, k, self.params.ef_search))
    }

    /// Hits with records attached. `score = 1 - distance`.
    pub fn search_hits(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.check_query(query)?;
        let state = self.read();
        state
            .nearest(query, k, self.params.ef_search)
            .into_iter()
            .map(|(id, distance)| {
                let record = state.records.get(id).cloned().ok_or_else(|| {
                    SearchError::Index(format!("no record for node {id}"))
                })?;
                Ok(Hit {
                    id: id as u64,
                    score: 1.0 - distance,
                    record,
                })
            })
            .collect()
    }

    /// Write the index to `path` through a uniquely named temp file in the
    /// same directory, then rename it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        save_state(&self.read(), self.dimension, path)
    }

    /// Read `path` and rebuild the graph from its vectors. Insertion order
    /// and the level RNG are the same as when the index was built, so the
    /// rebuilt graph answers queries identically.
    pub fn load(path: &Path) -> Result<Self> {
        let corrupt = |e: bincode::Error| {
            SearchError::Index(format!("corrupt index file {}: {e}", path.display()))
        };
        let mut reader = BufReader::new(File::open(path)?);
        let header: FileHeader = bincode::deserialize_from(&mut reader).map_err(corrupt)?;
        if header.magic != MAGIC {
            return Err(SearchError::Index(format!("{} is not an index file", path.display())));
        }
        if header.version != FORMAT_VERSION {
            return Err(SearchError::Index(format!(
                "unsupported index format version {} (expected {FORMAT_VERSION})",
                header.version
            )));
        }
        let body: IndexBody = bincode::deserialize_from(&mut reader).map_err(corrupt)?;
        if body.vectors.len() != body.records.len() {
            return Err(SearchError::Index(format!(
                "index holds {} vectors but {} records",
                body.vectors.len(),
                body.records.len()
            )));
        }

        let params = HnswParams {
            ef_construction: body.ef_construction as usize,
            ..HnswParams::default()
        };
        let mut index = Self::new(body.dimension as usize, params)?;
        let records = body
            .records
            .into_iter()
            .map(|r| {
                let metadata: Metadata = serde_json::from_str(&r.metadata_json)?;
                Ok(ChunkRecord {
                    text: r.text,
                    source: r.source,
                    offset: r.offset as usize,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        index.insert_entries(body.vectors, records)?;

        info!(path = %path.display(), entries = index.len(), "Loaded embedded index");
        Ok(index)
    }
}

fn save_state(state: &IndexState, dimension: usize, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let records = state
        .records
        .iter()
        .map(|r| {
            Ok(StoredRecord {
                text: r.text.clone(),
                source: r.source.clone(),
                offset: r.offset as u64,
                metadata_json: serde_json::to_string(&r.metadata)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let header = FileHeader {
        magic: MAGIC,
        version: FORMAT_VERSION,
    };
    let body = IndexBodyRef {
        dimension: dimension as u64,
        ef_construction: state.ef_construction as u64,
        vectors: &state.vectors,
        records,
    };

    let tmp = NamedTempFile::new_in(&parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        let encode = |e: bincode::Error| SearchError::Serialization(e.to_string());
        bincode::serialize_into(&mut writer, &header).map_err(encode)?;
        bincode::serialize_into(&mut writer, &body).map_err(encode)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!(path = %path.display(), entries = state.records.len(), "Persisted embedded index");
    Ok(())
}

#[async_trait]
impl VectorStore for EmbeddedIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        EmbeddedIndex::len(self)
    }

    #[instrument(skip_all, fields(entries = vectors.len()))]
    async fn insert(&mut self, vectors: Vec<Vec<f32>>, records: Vec<ChunkRecord>) -> Result<Vec<u64>> {
        check_lengths(&vectors, &records)?;
        check_dimensions(&vectors, self.dimension)?;
        let state = Arc::clone(&self.state);
        let ids = blocking(move || {
            let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
            Ok(state.append(vectors, records))
        })
        .await?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.search_hits(query, k)
    }

    async fn persist(&self, path: &Path) -> Result<()> {
        let state = Arc::clone(&self.state);
        let dimension = self.dimension;
        let path = path.to_path_buf();
        blocking(move || {
            let state = state.read().unwrap_or_else(PoisonError::into_inner);
            save_state(&state, dimension, &path)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn record(source: &str, text: &str) -> ChunkRecord {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!(source));
        metadata.insert("lang".into(), json!("en"));
        ChunkRecord {
            text: text.to_string(),
            source: source.to_string(),
            offset: 0,
            metadata,
        }
    }

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i % dim] = 1.0;
        v[(i + 1) % dim] = 0.1 * (i / dim + 1) as f32;
        v
    }

    fn populated(n: usize, dim: usize) -> EmbeddedIndex {
        let mut index = EmbeddedIndex::new(dim, HnswParams::default()).unwrap();
        let vectors = (0..n).map(|i| axis(dim, i)).collect();
        let records = (0..n).map(|i| record(&format!("doc{i}"), &format!("chunk {i}"))).collect();
        index.insert_entries(vectors, records).unwrap();
        index
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        1.0 - dot / (na * nb)
    }

    fn random_index(n: usize, dim: usize) -> (EmbeddedIndex, Vec<Vec<f32>>) {
        let vectors = random_vectors(n, dim, 7);
        let mut index = EmbeddedIndex::new(dim, HnswParams::default()).unwrap();
        let records = (0..n).map(|i| record(&format!("doc{i}"), "x")).collect();
        index.insert_entries(vectors.clone(), records).unwrap();
        (index, vectors)
    }

    #[test]
    fn test_rejects_invalid_construction() {
        assert!(EmbeddedIndex::new(0, HnswParams::default()).is_err());
        let params = HnswParams {
            ef_search: 0,
            ..HnswParams::default()
        };
        assert!(EmbeddedIndex::new(4, params).is_err());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = EmbeddedIndex::new(4, HnswParams::default()).unwrap();
        assert!(index.search_ids(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = populated(4, 4);
        let err = index.search_ids(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_self_match_is_top_hit() {
        let (index, vectors) = random_index(500, 16);
        for (i, v) in vectors.iter().enumerate().step_by(25) {
            let hits = index.search_ids(v, 1).unwrap();
            assert_eq!(hits[0].0, i);
            assert!(hits[0].1 < 1e-5);
        }
    }

    #[test]
    fn test_recall_against_brute_force() {
        let (mut index, vectors) = random_index(1000, 12);
        index.set_ef_search(100);
        let queries = random_vectors(20, 12, 99);
        let mut matched = 0;
        for q in &queries {
            let mut exact: Vec<(usize, f32)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i, cosine_distance(v, q)))
                .collect();
            exact.sort_by(|a, b| a.1.total_cmp(&b.1));
            let approx: Vec<usize> = index.search_ids(q, 10).unwrap().into_iter().map(|h| h.0).collect();
            matched += exact[..10].iter().filter(|(id, _)| approx.contains(id)).count();
        }
        let recall = matched as f64 / (queries.len() * 10) as f64;
        assert!(recall > 0.9, "recall too low: {recall}");
    }

    #[test]
    fn test_results_sorted_ascending() {
        let (index, vectors) = random_index(200, 8);
        let hits = index.search_ids(&vectors[3], 20).unwrap();
        assert_eq!(hits.len(), 20);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let mut index = EmbeddedIndex::new(3, HnswParams::default()).unwrap();
        let ids = index
            .insert_entries(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]], vec![record("a", "x"), record("b", "y")])
            .unwrap();
        assert_eq!(ids, vec![0, 1]);
        let more = index
            .insert_entries(vec![vec![0.0, 0.0, 1.0]], vec![record("c", "z")])
            .unwrap();
        assert_eq!(more, vec![2]);
        assert_eq!(index.record(2).unwrap().source, "c");
    }

    #[test]
    fn test_insert_rejects_length_mismatch() {
        let mut index = EmbeddedIndex::new(2, HnswParams::default()).unwrap();
        let err = index
            .insert_entries(vec![vec![1.0, 0.0]], vec![record("a", "x"), record("b", "y")])
            .unwrap_err();
        assert!(matches!(err, SearchError::Index(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_inserts_nothing() {
        let mut index = populated(4, 4);
        let err = index
            .insert_entries(
                vec![vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0]],
                vec![record("x", "ok"), record("y", "short")],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_search_hits_attach_records() {
        let index = populated(8, 8);
        let hits = index.search_hits(&axis(8, 5), 3).unwrap();
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[0].record.source, "doc5");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_never_returns_more_than_len() {
        let index = populated(6, 4);
        let hits = index.search_ids(&axis(4, 0), 100).unwrap();
        assert_eq!(hits.len(), 6);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.bin");
        let index = populated(50, 8);
        index.save(&path).unwrap();

        let loaded = EmbeddedIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 50);
        assert_eq!(loaded.dimension(), 8);
        assert_eq!(loaded.record(7), index.record(7));
        assert_eq!(loaded.record(7).unwrap().metadata["lang"], json!("en"));

        for axis_index in [0usize, 13, 42] {
            let q = axis(8, axis_index);
            let before: Vec<usize> = index.search_ids(&q, 3).unwrap().into_iter().map(|h| h.0).collect();
            let after: Vec<usize> = loaded.search_ids(&q, 3).unwrap().into_iter().map(|h| h.0).collect();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_open_or_create_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = EmbeddedIndex::open_or_create(&dir.path().join("none.bin"), 4, HnswParams::default()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), 4);
    }

    #[test]
    fn test_open_or_create_rejects_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        populated(5, 4).save(&path).unwrap();
        let err = EmbeddedIndex::open_or_create(&path, 8, HnswParams::default()).unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { expected: 8, actual: 4 }));
    }

    #[test]
    fn test_open_or_create_applies_search_frontier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        populated(5, 4).save(&path).unwrap();
        let params = HnswParams {
            ef_search: 77,
            ..HnswParams::default()
        };
        let index = EmbeddedIndex::open_or_create(&path, 4, params).unwrap();
        assert_eq!(index.params().ef_search, 77);
    }

    #[test]
    fn test_concurrent_saves_to_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let index = populated(300, 8);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| index.save(&path))).collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });
        assert_eq!(EmbeddedIndex::load(&path).unwrap().len(), 300);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_load_rejects_other_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let header = FileHeader {
            magic: MAGIC,
            version: FORMAT_VERSION + 1,
        };
        std::fs::write(&path, bincode::serialize(&header).unwrap()).unwrap();
        let err = EmbeddedIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported index format version"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"definitely not an index").unwrap();
        assert!(EmbeddedIndex::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_vector_store_contract() {
        let mut store: Box<dyn VectorStore> = Box::new(EmbeddedIndex::new(3, HnswParams::default()).unwrap());
        assert_eq!(store.backend(), BackendKind::Embedded);
        assert!(store.is_empty());
        let ids = store
            .insert(vec![vec![1.0, 0.0, 0.0]], vec![record("a", "x")])
            .await
            .unwrap();
        assert_eq!(ids, vec![0]);
        let hits = store.search(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "x");
    }

    #[tokio::test]
    async fn test_open_store_embedded_uses_index_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SemsearchConfig::default();
        config.general.data_dir = dir.path().display().to_string();
        populated(3, 4).save(&config.index_path()).unwrap();

        let store = open_store(&config, 4).await.unwrap();
        assert_eq!(store.backend(), BackendKind::Embedded);
        assert_eq!(store.len(), 3);
    }
}
