use crate::traits::VectorIndex;
use crate::{Chunk, RagError, ScoredChunk};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    async fn post(&self, suffix: &str, body: Value) -> Result<Option<Value>, RagError> {
        let response = self
            .client
            .post(self.collection_url(suffix))
            .json(&body)
            .send()
            .await
            .map_err(|error| RagError::store(BACKEND, error))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RagError::store(BACKEND, response.status()));
        }

        let parsed = response
            .json::<Value>()
            .await
            .map_err(|error| RagError::store(BACKEND, error))?;
        Ok(Some(parsed))
    }
}

/// Qdrant point ids must be integers or UUIDs; the chunk digest provides a
/// stable UUID so re-ingesting a file overwrites its points.
fn point_id(chunk_id: &str) -> String {
    chunk_id
        .get(..32)
        .and_then(|prefix| Uuid::parse_str(prefix).ok())
        .unwrap_or_else(Uuid::new_v4)
        .to_string()
}

fn chunk_from_payload(payload: &Value) -> Option<Chunk> {
    serde_json::from_value(payload.clone()).ok()
}

/// Reads the hits of a `/points/search` response. A response without a
/// `result` array is a backend fault, not an empty result.
fn scored_hits(parsed: &Value) -> Result<Vec<ScoredChunk>, RagError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| RagError::store(BACKEND, format!("search response has no result: {parsed}")))?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(chunk) = hit.pointer("/payload").and_then(chunk_from_payload) else {
            let id = hit.pointer("/id").cloned().unwrap_or(Value::Null);
            warn!(%id, "skipping point with unreadable payload");
            continue;
        };
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        result.push(ScoredChunk {
            chunk,
            score: score as f32,
        });
    }
    Ok(result)
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_ready(
        &self,
        embedding_model: &str,
        dimensions: usize,
    ) -> Result<(), RagError> {
        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .map_err(|error| RagError::store(BACKEND, error))?;

        if response.status().is_success() {
            let parsed: Value = response
                .json()
                .await
                .map_err(|error| RagError::store(BACKEND, error))?;
            let existing = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != dimensions => Err(RagError::store(
                    BACKEND,
                    format!(
                        "collection {} holds {size}-dimensional vectors, {embedding_model} produces {dimensions}",
                        self.collection
                    ),
                )),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(RagError::store(BACKEND, response.status()));
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| RagError::store(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(RagError::store(
                BACKEND,
                format!("collection setup failed with {}", response.status()),
            ));
        }

        info!(collection = %self.collection, dimensions, "created qdrant collection");
        Ok(())
    }

    async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RagError> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::store(
                BACKEND,
                format!(
                    "embedding count {} doesn't match chunk count {}",
                    embeddings.len(),
                    chunks.len()
                ),
            ));
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                Ok(json!({
                    "id": point_id(&chunk.chunk_id),
                    "vector": embedding,
                    "payload": serde_json::to_value(chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, RagError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| RagError::store(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(RagError::store(BACKEND, response.status()));
        }

        info!(collection = %self.collection, inserted = chunks.len(), "stored chunks in qdrant");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let parsed = self
            .post(
                "/points/search",
                json!({
                    "vector": query_vector,
                    "limit": limit,
                    "with_payload": true,
                }),
            )
            .await?;

        // a collection that was never created is an empty index
        let Some(parsed) = parsed else {
            debug!(collection = %self.collection, "collection missing, no candidates");
            return Ok(Vec::new());
        };

        scored_hits(&parsed)
    }

    async fn count(&self) -> Result<usize, RagError> {
        let parsed = self
            .post("/points/count", json!({ "exact": true }))
            .await?;
        Ok(parsed
            .and_then(|value| value.pointer("/result/count").and_then(Value::as_u64))
            .unwrap_or(0) as usize)
    }

    async fn sources(&self) -> Result<Vec<String>, RagError> {
        let mut sources = BTreeSet::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": ["source_path"],
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let Some(parsed) = self.post("/points/scroll", body).await? else {
                break;
            };

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in points {
                if let Some(path) = point.pointer("/payload/source_path").and_then(Value::as_str) {
                    sources.insert(path.to_string());
                }
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(sources.into_iter().collect())
    }
}
