use crate::chunking::chunk_documents;
use crate::config::ChunkingOptions;
use crate::embeddings::Embedder;
use crate::loader::{load_documents, SkippedFile};
use crate::traits::VectorIndex;
use crate::IngestError;
use std::path::Path;
use tracing::{info, warn};

/// Chunks embedded per request to the embedding service.
pub const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug)]
pub struct IngestionReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped_files: Vec<SkippedFile>,
}

/// Loads every PDF and text file under `folder`, splits them, embeds the
/// chunks and stores them in `index`.
pub async fn ingest_folder<V>(
    folder: &Path,
    chunking: &ChunkingOptions,
    embedder: &dyn Embedder,
    index: &V,
) -> Result<IngestionReport, IngestError>
where
    V: VectorIndex + ?Sized,
{
    let report = load_documents(folder)?;
    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
    }

    if report.documents.is_empty() {
        return Err(IngestError::NoDocuments(folder.display().to_string()));
    }
    info!(folder = %folder.display(), documents = report.documents.len(), "loaded documents");

    let (chunks, _) = chunk_documents(&report.documents, chunking, 0)?;
    info!(chunks = chunks.len(), "split documents");

    index
        .ensure_ready(embedder.model_name(), embedder.dimensions())
        .await?;

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        index.insert(batch, &vectors).await?;
    }
    index.flush().await?;

    info!(
        backend = index.backend(),
        documents = report.documents.len(),
        chunks = chunks.len(),
        "ingestion finished"
    );

    Ok(IngestionReport {
        documents: report.documents.len(),
        chunks: chunks.len(),
        skipped_files: report.skipped,
    })
}
