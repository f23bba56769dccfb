//! Embedding providers.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with the HuggingFace
//!   tokenizers crate. Batched, masked mean pooling, L2-normalized.
//! - `HashEmbedding` derives deterministic unit vectors from a text hash, for
//!   development setups without a model and for tests.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use semsearch_core::{Result, SearchError};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Inputs per forward pass.
const MAX_BATCH: usize = 32;

/// Maps text to fixed-dimension dense vectors.
pub trait EmbeddingService: Send + Sync {
    /// One vector per input, in input order. An empty input yields an empty
    /// output.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Embed a single query. Same result as `embed_batch(&[text])[0]`.
    fn embed_query(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send {
        async move {
            let batch = vec![text.to_string()];
            self.embed_batch(&batch)
                .await?
                .pop()
                .ok_or_else(|| SearchError::Embedding("provider returned no vector".into()))
        }
    }

    /// Dimensionality of every vector this provider produces.
    fn dimensions(&self) -> usize;
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe form of [`EmbeddingService`], so the engine can hold an
/// `Arc<dyn DynEmbeddingService>` chosen at startup.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

    fn embed_query_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn embed_query_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.embed_query(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Width of the single vector embedded from a sample input.
fn sample_dimension(sample: Vec<Vec<f32>>) -> Result<usize> {
    match sample.as_slice() {
        [vector] if !vector.is_empty() => Ok(vector.len()),
        [_] => Err(SearchError::Embedding("model produced an empty vector".into())),
        other => Err(SearchError::Embedding(format!(
            "expected one sample vector, model produced {}",
            other.len()
        ))),
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime sentence-transformer.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// The model takes `input_ids`, `attention_mask` and `token_type_ids` as i64
/// tensors of shape `[batch, seq]` and returns token embeddings of shape
/// `[batch, seq, hidden]`.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
    max_tokens: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn from_directory(model_dir: &Path, max_tokens: usize) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(SearchError::Embedding(format!(
                    "model file not found at {}",
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| SearchError::Embedding(format!("ONNX session builder: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| SearchError::Embedding(format!("ONNX set threads: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| SearchError::Embedding(format!("ONNX load model: {e}")))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| SearchError::Embedding(format!("load tokenizer: {e}")))?;

        let mut service = Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: 0,
            max_tokens: max_tokens.max(1),
        };
        // Output shapes are often dynamic; the width is whatever the model emits.
        service.dimensions = sample_dimension(service.embed_sync(&["test".to_string()])?)?;

        info!(
            model = %model_path.display(),
            dimensions = service.dimensions,
            max_tokens,
            "Loaded ONNX embedding model"
        );
        Ok(service)
    }

    /// Tokenize, pad, run one forward pass and mean-pool each row.
    fn embed_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut rows = Vec::with_capacity(texts.len());
        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| SearchError::Embedding(format!("tokenization failed: {e}")))?;
            let take = encoding.get_ids().len().min(self.max_tokens);
            rows.push((
                encoding.get_ids()[..take].to_vec(),
                encoding.get_attention_mask()[..take].to_vec(),
                encoding.get_type_ids()[..take].to_vec(),
            ));
        }

        let batch = rows.len();
        let seq_len = rows.iter().map(|(ids, _, _)| ids.len()).max().unwrap_or(0).max(1);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (row, (ids, mask, types)) in rows.iter().enumerate() {
            let base = row * seq_len;
            for (t, &id) in ids.iter().enumerate() {
                input_ids[base + t] = id as i64;
                attention_mask[base + t] = mask[t] as i64;
                token_type_ids[base + t] = types[t] as i64;
            }
        }

        let shape = (batch, seq_len);
        let ids_array = ndarray::Array2::from_shape_vec(shape, input_ids)
            .map_err(|e| SearchError::Embedding(format!("input_ids array: {e}")))?;
        let mask_array = ndarray::Array2::from_shape_vec(shape, attention_mask.clone())
            .map_err(|e| SearchError::Embedding(format!("attention_mask array: {e}")))?;
        let type_array = ndarray::Array2::from_shape_vec(shape, token_type_ids)
            .map_err(|e| SearchError::Embedding(format!("token_type_ids array: {e}")))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| SearchError::Embedding(format!("TensorRef input_ids: {e}")))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| SearchError::Embedding(format!("TensorRef attention_mask: {e}")))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| SearchError::Embedding(format!("TensorRef token_type_ids: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SearchError::Embedding(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| SearchError::Embedding(format!("ONNX inference failed: {e}")))?;

        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SearchError::Embedding(format!("extract embeddings: {e}")))?;
        let dims: Vec<i64> = out_shape.iter().copied().collect();
        let hidden = match dims.as_slice() {
            [b, s, h] if *b as usize == batch && *s as usize == seq_len && *h > 0 => *h as usize,
            _ => {
                return Err(SearchError::Embedding(format!(
                    "unexpected output shape {dims:?} for batch {batch}x{seq_len}"
                )))
            }
        };

        let mut vectors = Vec::with_capacity(batch);
        for row in 0..batch {
            let mut pooled = vec![0.0f32; hidden];
            let mut count = 0.0f32;
            for t in 0..seq_len {
                if attention_mask[row * seq_len + t] > 0 {
                    let offset = (row * seq_len + t) * hidden;
                    for (acc, v) in pooled.iter_mut().zip(&data[offset..offset + hidden]) {
                        *acc += v;
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                for v in &mut pooled {
                    *v /= count;
                }
            }
            l2_normalize(&mut pooled);
            vectors.push(pooled);
        }
        Ok(vectors)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            // Inference is CPU-bound; keep it off the async workers.
            let svc = self.clone();
            let batch = batch.to_vec();
            let mut out = tokio::task::spawn_blocking(move || svc.embed_sync(&batch))
                .await
                .map_err(|e| SearchError::Embedding(format!("embedding task panicked: {e}")))??;
            vectors.append(&mut out);
        }
        debug!(inputs = texts.len(), "Embedded batch");
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding
// ---------------------------------------------------------------------------

/// Deterministic hash-based embeddings.
///
/// Identical inputs always map to identical unit vectors; there is no
/// semantic similarity between different inputs.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_to_vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
