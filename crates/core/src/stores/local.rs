//! Directory-backed vector index.
//!
//! The directory holds `manifest.json` (embedding model and dimension) and
//! `records.json` (every chunk with its vector). Records are loaded into
//! memory on open and searched by brute-force cosine similarity. Inserts
//! only touch memory; [`VectorIndex::flush`] writes `records.json` once.

use crate::traits::VectorIndex;
use crate::{Chunk, RagError, ScoredChunk};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

const BACKEND: &str = "local";
const MANIFEST_FILE: &str = "manifest.json";
const RECORDS_FILE: &str = "records.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct IndexState {
    manifest: Option<IndexManifest>,
    records: Vec<IndexRecord>,
    positions: HashMap<String, usize>,
    dirty: bool,
}

pub struct LocalIndex {
    directory: PathBuf,
    state: RwLock<IndexState>,
}

impl LocalIndex {
    /// Opens the index stored in `directory`. A missing directory is an empty
    /// index; it is created on the first insert.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, RagError> {
        let directory = directory.into();
        let mut state = IndexState::default();

        let manifest_path = directory.join(MANIFEST_FILE);
        if tokio::fs::try_exists(&manifest_path).await? {
            let bytes = tokio::fs::read(&manifest_path).await?;
            state.manifest = Some(serde_json::from_slice(&bytes)?);
        }

        let records_path = directory.join(RECORDS_FILE);
        if tokio::fs::try_exists(&records_path).await? {
            let bytes = tokio::fs::read(&records_path).await?;
            state.records = serde_json::from_slice(&bytes)?;
            state.positions = state
                .records
                .iter()
                .enumerate()
                .map(|(position, record)| (record.chunk.chunk_id.clone(), position))
                .collect();
        }

        debug!(directory = %directory.display(), records = state.records.len(), "opened local index");

        Ok(Self {
            directory,
            state: RwLock::new(state),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn manifest(&self) -> Option<IndexManifest> {
        self.state.read().await.manifest.clone()
    }

    /// Rejects an embedder that does not match the one the index was built
    /// with. An index without a manifest accepts anything.
    pub async fn check_embedder(
        &self,
        embedding_model: &str,
        dimensions: usize,
    ) -> Result<(), RagError> {
        match &self.state.read().await.manifest {
            Some(manifest) => manifest.accepts(embedding_model, dimensions),
            None => Ok(()),
        }
    }

    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<(), RagError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        write_atomically(
            &self.directory.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(manifest)?,
        )
        .await
    }

    async fn write_records(&self, records: &[IndexRecord]) -> Result<(), RagError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        write_atomically(
            &self.directory.join(RECORDS_FILE),
            &serde_json::to_vec(records)?,
        )
        .await
    }
}

impl IndexManifest {
    fn accepts(&self, embedding_model: &str, dimensions: usize) -> Result<(), RagError> {
        if self.embedding_model != embedding_model || self.dimensions != dimensions {
            return Err(RagError::store(
                BACKEND,
                format!(
                    "index was built with {} ({} dimensions), not {embedding_model} ({dimensions} dimensions); re-ingest into a fresh index",
                    self.embedding_model, self.dimensions
                ),
            ));
        }
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), RagError> {
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_ready(
        &self,
        embedding_model: &str,
        dimensions: usize,
    ) -> Result<(), RagError> {
        let mut state = self.state.write().await;
        if let Some(manifest) = &state.manifest {
            return manifest.accepts(embedding_model, dimensions);
        }

        let manifest = IndexManifest {
            embedding_model: embedding_model.to_string(),
            dimensions,
            created_at: Utc::now(),
        };
        self.write_manifest(&manifest).await?;
        state.manifest = Some(manifest);
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
        if chunks.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let dimensions = state
            .manifest
            .as_ref()
            .map(|manifest| manifest.dimensions)
            .ok_or_else(|| RagError::store(BACKEND, "index is not initialised"))?;

        if let Some(vector) = embeddings.iter().find(|vector| vector.len() != dimensions) {
            return Err(RagError::store(
                BACKEND,
                format!("embedding dimension {} != {dimensions}", vector.len()),
            ));
        }

        for (chunk, vector) in chunks.iter().zip(embeddings) {
            let record = IndexRecord {
                chunk: chunk.clone(),
                vector: vector.clone(),
            };
            match state.positions.get(&chunk.chunk_id).copied() {
                Some(position) => state.records[position] = record,
                None => {
                    let position = state.records.len();
                    state.positions.insert(chunk.chunk_id.clone(), position);
                    state.records.push(record);
                }
            }
        }
        state.dirty = true;

        debug!(inserted = chunks.len(), total = state.records.len(), "buffered chunks in local index");
        Ok(())
    }

    async fn flush(&self) -> Result<(), RagError> {
        let mut state = self.state.write().await;
        if !state.dirty {
            return Ok(());
        }

        self.write_records(&state.records).await?;
        state.dirty = false;
        info!(total = state.records.len(), directory = %self.directory.display(), "persisted local index");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let state = self.state.read().await;
        if state.records.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(manifest) = &state.manifest {
            if manifest.dimensions != query_vector.len() {
                return Err(RagError::store(
                    BACKEND,
                    format!(
                        "query vector dim {} is not {} (index built with {})",
                        query_vector.len(),
                        manifest.dimensions,
                        manifest.embedding_model
                    ),
                ));
            }
        }

        let mut scored: Vec<ScoredChunk> = state
            .records
            .iter()
            .map(|record| ScoredChunk {
                chunk: record.chunk.clone(),
                score: cosine_similarity(&record.vector, query_vector),
            })
            .collect();

        // stable: equal similarities keep insertion order
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.state.read().await.records.len())
    }

    async fn sources(&self) -> Result<Vec<String>, RagError> {
        let state = self.state.read().await;
        let sources: BTreeSet<String> = state
            .records
            .iter()
            .map(|record| record.chunk.source_path.clone())
            .collect();
        Ok(sources.into_iter().collect())
    }
}
