//! Consistency report between a data folder and the index built from it.

use crate::embeddings::Embedder;
use crate::loader::discover_documents;
use crate::models::DocumentKind;
use crate::traits::VectorIndex;
use crate::{loader::document_kind, RagError, ScoredChunk};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROBE_QUERY: &str = "fee structure";
pub const PROBE_RESULTS: usize = 3;
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeHit {
    pub source_path: String,
    pub score: f32,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    pub source_files: Vec<SourceFile>,
    pub indexed_chunks: usize,
    pub indexed_sources: Vec<String>,
    /// Files on disk with no chunk in the index.
    pub missing_from_index: Vec<String>,
    /// Indexed sources that are no longer on disk.
    pub missing_from_disk: Vec<String>,
    pub probe_query: Option<String>,
    pub probe_hits: Vec<ProbeHit>,
}

pub fn preview(text: &str) -> String {
    text.chars()
        .take(PREVIEW_CHARS)
        .collect::<String>()
        .replace('\n', " ")
}

/// Sources are matched by file name so the folder may be spelled
/// differently at ingest and check time.
fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

fn probe_hit(hit: ScoredChunk) -> ProbeHit {
    ProbeHit {
        preview: preview(&hit.chunk.text),
        source_path: hit.chunk.source_path,
        score: hit.score,
    }
}

/// Lists the corpus under `data_dir`, compares it with what `index` holds and
/// optionally runs a probe query against the index.
pub async fn inspect<V>(
    data_dir: &Path,
    index: &V,
    embedder: &dyn Embedder,
    probe: Option<&str>,
) -> Result<IndexReport, RagError>
where
    V: VectorIndex + ?Sized,
{
    let mut source_files = Vec::new();
    if data_dir.exists() {
        for path in discover_documents(data_dir) {
            let Some(kind) = document_kind(&path) else {
                continue;
            };
            let size_bytes = tokio::fs::metadata(&path).await?.len();
            source_files.push(SourceFile {
                path,
                kind,
                size_bytes,
            });
        }
    }

    let indexed_chunks = index.count().await?;
    let indexed_sources = index.sources().await?;

    let on_disk: Vec<String> = source_files
        .iter()
        .map(|file| file.path.to_string_lossy().to_string())
        .collect();
    let on_disk_names: BTreeSet<&str> = on_disk.iter().map(|path| file_name(path)).collect();
    let indexed_names: BTreeSet<&str> =
        indexed_sources.iter().map(|path| file_name(path)).collect();

    let missing_from_index = on_disk
        .iter()
        .filter(|path| !indexed_names.contains(file_name(path)))
        .cloned()
        .collect();
    let missing_from_disk = indexed_sources
        .iter()
        .filter(|path| !on_disk_names.contains(file_name(path)))
        .cloned()
        .collect();

    let mut probe_hits = Vec::new();
    if let Some(query) = probe {
        if indexed_chunks > 0 {
            let vector = embedder.embed(query).await?;
            probe_hits = index
                .search(&vector, PROBE_RESULTS)
                .await?
                .into_iter()
                .map(probe_hit)
                .collect();
        }
    }

    Ok(IndexReport {
        source_files,
        indexed_chunks,
        indexed_sources,
        missing_from_index,
        missing_from_disk,
        probe_query: probe.map(str::to_string),
        probe_hits,
    })
}
