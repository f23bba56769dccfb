//! Remote backend: a Qdrant collection.
//!
//! Points carry caller-supplied integer ids, so re-inserting an id overwrites
//! it. New ids start above the highest numeric id already stored. The payload holds the chunk record, which comes back inline with each
//! search hit. Transport and server errors surface as `BackendUnavailable`
//! and are never retried here.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    vectors_config, CountPointsBuilder, CreateCollectionBuilder, Distance, ListValue, PointId,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, Struct, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Qdrant, QdrantError};
use semsearch_core::config::{BackendKind, RemoteConfig};
use semsearch_core::{ChunkRecord, Hit, Metadata, Result, SearchError};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::index::{check_dimensions, check_lengths, VectorStore};

/// Points fetched per page while scanning for the highest id.
const SCROLL_PAGE: u32 = 1000;

fn unavailable(context: &str, err: QdrantError) -> SearchError {
    SearchError::BackendUnavailable(format!("{context}: {err}"))
}

/// Client for one Qdrant collection.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
    /// Points in the collection.
    points: u64,
    /// Next id handed out by `insert`; one above the highest stored id.
    next_id: u64,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .field("points", &self.points)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl QdrantIndex {
    /// Connect and make sure the collection exists with cosine distance and
    /// the given dimension.
    pub async fn connect(config: &RemoteConfig, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| unavailable("connect", e))?;
        let collection = config.collection.clone();

        let exists = client
            .collection_exists(collection.as_str())
            .await
            .map_err(|e| unavailable("collection_exists", e))?;
        if exists {
            if let Some(actual) = Self::collection_dimension(&client, &collection).await? {
                if actual != dimension {
                    return Err(SearchError::DimensionMismatch {
                        expected: dimension,
                        actual,
                    });
                }
            }
        } else {
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection.as_str())
                        .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
                )
                .await
                .map_err(|e| unavailable("create_collection", e))?;
            info!(collection = %collection, dimension, "Created Qdrant collection");
        }

        let points = client
            .count(CountPointsBuilder::new(collection.as_str()).exact(true))
            .await
            .map_err(|e| unavailable("count", e))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);
        let next_id = if points == 0 {
            0
        } else {
            Self::scan_next_id(&client, &collection).await?
        };

        info!(url = %config.url, collection = %collection, points, next_id, "Connected to Qdrant");
        Ok(Self {
            client,
            collection,
            dimension,
            points,
            next_id,
        })
    }

    /// Page through every point id and return one past the highest numeric
    /// id. Ids need not be contiguous, so the point count is not enough.
    async fn scan_next_id(client: &Qdrant, collection: &str) -> Result<u64> {
        let mut next_id = 0;
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(collection)
                .limit(SCROLL_PAGE)
                .with_payload(false)
                .with_vectors(false);
            if let Some(start) = offset.take() {
                request = request.offset(start);
            }
            let page = client
                .scroll(request)
                .await
                .map_err(|e| unavailable("scroll", e))?;
            next_id = next_id.max(next_free_id(page.result.iter().map(|p| p.id.as_ref())));
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(next_id)
    }

    async fn collection_dimension(client: &Qdrant, collection: &str) -> Result<Option<usize>> {
        let info = client
            .collection_info(collection)
            .await
            .map_err(|e| unavailable("collection_info", e))?;
        Ok(info
            .result
            .and_then(|i| i.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(params) => Some(params.size as usize),
                _ => None,
            }))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Write points under explicit ids. Existing ids are overwritten.
    pub async fn upsert(
        &self,
        ids: &[u64],
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<()> {
        check_lengths(&vectors, &records)?;
        check_dimensions(&vectors, self.dimension)?;
        if ids.len() != vectors.len() {
            return Err(SearchError::Index(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = ids
            .iter()
            .zip(vectors)
            .zip(records)
            .map(|((&id, vector), record)| PointStruct::new(id, vector, record_to_payload(&record)))
            .collect();
        let count = points.len();

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.as_str(), points).wait(true))
            .await
            .map_err(|e| unavailable("upsert_points", e))?;
        debug!(collection = %self.collection, points = count, "Upserted points");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantIndex {
    fn backend(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.points as usize
    }

    async fn insert(&mut self, vectors: Vec<Vec<f32>>, records: Vec<ChunkRecord>) -> Result<Vec<u64>> {
        let ids: Vec<u64> = (self.next_id..self.next_id + vectors.len() as u64).collect();
        self.upsert(&ids, vectors, records).await?;
        self.next_id += ids.len() as u64;
        self.points += ids.len() as u64;
        Ok(ids)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.as_str(), query.to_vec(), k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| unavailable("search_points", e))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| Hit {
                id: point_id_to_u64(point.id.as_ref()),
                score: point.score,
                record: record_from_payload(point.payload),
            })
            .collect())
    }

    async fn persist(&self, _path: &Path) -> Result<()> {
        debug!(collection = %self.collection, "Remote backend persists server-side");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload conversion
// ---------------------------------------------------------------------------

/// One past the highest numeric id in `ids`, or 0 when there is none. UUID
/// ids never collide with the integers handed out here.
fn next_free_id<'a>(ids: impl IntoIterator<Item = Option<&'a PointId>>) -> u64 {
    ids.into_iter()
        .filter_map(|id| match id.and_then(|id| id.point_id_options.as_ref()) {
            Some(PointIdOptions::Num(n)) => Some(n.saturating_add(1)),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

fn point_id_to_u64(id: Option<&PointId>) -> u64 {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => *n,
        _ => 0,
    }
}

fn record_to_payload(record: &ChunkRecord) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert("text".to_string(), QdrantValue::from(record.text.clone()));
    payload.insert("source".to_string(), QdrantValue::from(record.source.clone()));
    payload.insert("offset".to_string(), QdrantValue::from(record.offset as i64));
    payload.insert(
        "metadata".to_string(),
        json_to_qdrant(JsonValue::Object(record.metadata.clone())),
    );
    payload
}

/// Decode a payload into a record. Points written by other tools may keep
/// the text and source under different keys; the first non-empty candidate
/// wins.
pub fn record_from_payload(payload: HashMap<String, QdrantValue>) -> ChunkRecord {
    let fields: serde_json::Map<String, JsonValue> = payload
        .iter()
        .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
        .collect();

    let nested = |outer: &str, key: &str| -> Option<String> {
        fields
            .get(outer)
            .and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let top = |key: &str| -> Option<String> {
        fields
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let source = top("source")
        .or_else(|| nested("metadata", "source"))
        .or_else(|| nested("meta", "source"))
        .or_else(|| nested("payload", "source"))
        .unwrap_or_default();
    let text = top("text")
        .or_else(|| top("page_content"))
        .or_else(|| top("document"))
        .unwrap_or_default();
    let offset = fields
        .get("offset")
        .or_else(|| fields.get("metadata").and_then(|m| m.get("start_index")))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let metadata: Metadata = fields
        .get("metadata")
        .or_else(|| fields.get("meta"))
        .and_then(|m| m.as_object())
        .cloned()
        .unwrap_or_default();

    ChunkRecord {
        text,
        source,
        offset,
        metadata,
    }
}

fn json_to_qdrant(value: JsonValue) -> QdrantValue {
    let kind = match value {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        JsonValue::String(s) => Kind::StringValue(s),
        JsonValue::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        JsonValue::Object(map) => Kind::StructValue(Struct {
            fields: map.into_iter().map(|(k, v)| (k, json_to_qdrant(v))).collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json(value: &QdrantValue) -> JsonValue {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Kind::IntegerValue(i)) => JsonValue::from(*i),
        Some(Kind::DoubleValue(f)) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(st)) => JsonValue::Object(
            st.fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_from_json(value: JsonValue) -> HashMap<String, QdrantValue> {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), json_to_qdrant(v.clone())))
            .collect()
    }

    #[test]
    fn test_json_conversion_preserves_nested_values() {
        let original = json!({
            "s": "text",
            "i": 42,
            "f": 1.5,
            "b": true,
            "n": null,
            "list": [1, "two", {"three": 3}],
            "obj": {"inner": {"deep": false}}
        });
        let back = qdrant_to_json(&json_to_qdrant(original.clone()));
        assert_eq!(back, original);
    }

    #[test]
    fn test_record_payload_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!("a.txt"));
        metadata.insert("title".into(), json!("Alpha"));
        let record = ChunkRecord {
            text: "chunk body".into(),
            source: "a.txt".into(),
            offset: 1200,
            metadata,
        };
        let decoded = record_from_payload(record_to_payload(&record));
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_source_fallback_chain() {
        let meta_shape = payload_from_json(json!({
            "page_content": "body",
            "meta": {"source": "from-meta.pdf"}
        }));
        let decoded = record_from_payload(meta_shape);
        assert_eq!(decoded.source, "from-meta.pdf");
        assert_eq!(decoded.text, "body");

        let payload_shape = payload_from_json(json!({
            "text": "body",
            "payload": {"source": "https://example.com"}
        }));
        assert_eq!(record_from_payload(payload_shape).source, "https://example.com");

        let metadata_shape = payload_from_json(json!({
            "text": "body",
            "source": "",
            "metadata": {"source": "m.txt", "start_index": 400}
        }));
        let decoded = record_from_payload(metadata_shape);
        assert_eq!(decoded.source, "m.txt");
        assert_eq!(decoded.offset, 400);
    }

    #[test]
    fn test_point_id_conversion() {
        assert_eq!(point_id_to_u64(Some(&PointId::from(17u64))), 17);
        assert_eq!(point_id_to_u64(None), 0);
    }

    #[test]
    fn test_next_free_id_skips_past_gaps() {
        let ids = [PointId::from(0u64), PointId::from(5u64)];
        assert_eq!(next_free_id(ids.iter().map(Some)), 6);
        assert_eq!(next_free_id(std::iter::empty()), 0);

        let uuid = PointId::from("5b6f3c1e-8d4a-4c1b-9f3e-2a7d6e0b1c9f".to_string());
        assert_eq!(next_free_id([Some(&uuid), None]), 0);
        let mixed = [uuid.clone(), PointId::from(41u64)];
        assert_eq!(next_free_id(mixed.iter().map(Some)), 42);
    }

    fn local_config() -> RemoteConfig {
        RemoteConfig {
            collection: format!("semsearch_test_{}", uuid::Uuid::new_v4().simple()),
            ..RemoteConfig::default()
        }
    }

    #[tokio::test]
    #[ignore] // Requires a Qdrant server on localhost:6334
    async fn test_insert_and_search_roundtrip() {
        let mut index = QdrantIndex::connect(&local_config(), 3).await.unwrap();
        let record = |s: &str| ChunkRecord {
            text: format!("text of {s}"),
            source: s.to_string(),
            offset: 0,
            metadata: Metadata::new(),
        };
        let ids = index
            .insert(
                vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
                vec![record("a"), record("b")],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(index.len(), 2);

        let hits = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].record.source, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    #[ignore] // Requires a Qdrant server on localhost:6334
    async fn test_upsert_same_id_overwrites() {
        let index = QdrantIndex::connect(&local_config(), 2).await.unwrap();
        let record = |s: &str| ChunkRecord {
            text: s.to_string(),
            source: s.to_string(),
            offset: 0,
            metadata: Metadata::new(),
        };
        index.upsert(&[5], vec![vec![1.0, 0.0]], vec![record("old")]).await.unwrap();
        index.upsert(&[5], vec![vec![1.0, 0.0]], vec![record("new")]).await.unwrap();
        let hits = index.search(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.source, "new");
    }

    #[tokio::test]
    #[ignore] // Requires a Qdrant server on localhost:6334
    async fn test_reconnect_never_reuses_sparse_ids() {
        let config = local_config();
        let record = |s: &str| ChunkRecord {
            text: s.to_string(),
            source: s.to_string(),
            offset: 0,
            metadata: Metadata::new(),
        };
        let index = QdrantIndex::connect(&config, 2).await.unwrap();
        index
            .upsert(&[0, 5], vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![record("zero"), record("five")])
            .await
            .unwrap();

        let mut reopened = QdrantIndex::connect(&config, 2).await.unwrap();
        assert_eq!(reopened.len(), 2);
        let ids = reopened
            .insert(vec![vec![0.5, 0.5]; 4], (0..4).map(|i| record(&format!("new{i}"))).collect())
            .await
            .unwrap();
        assert_eq!(ids, vec![6, 7, 8, 9]);
        let hits = reopened.search(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].record.source, "five");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_unavailable() {
        let config = RemoteConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..RemoteConfig::default()
        };
        let err = QdrantIndex::connect(&config, 3).await.unwrap_err();
        assert!(matches!(err, SearchError::BackendUnavailable(_)));
    }
}
