use crate::config::ChunkingOptions;
use crate::error::IngestError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text into windows of at most `chunk_size` characters, preferring
/// paragraph, then line, then word boundaries, and carrying up to
/// `chunk_overlap` characters between neighbouring windows.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(options: &ChunkingOptions) -> Result<Self, IngestError> {
        if options.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if options.chunk_overlap >= options.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                options.chunk_overlap, options.chunk_size
            )));
        }

        Ok(Self {
            chunk_size: options.chunk_size,
            chunk_overlap: options.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (position, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[position + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }

            if remaining.is_empty() {
                if let Some(piece) = trimmed(piece) {
                    chunks.push(piece);
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Greedily packs pieces into windows. Separators are already attached to
    /// the pieces, so they are concatenated as-is.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let length = char_len(piece);

            if total + length > self.chunk_size && !window.is_empty() {
                if let Some(text) = trimmed(&window.concat()) {
                    merged.push(text);
                }

                while total > self.chunk_overlap
                    || (total + length > self.chunk_size && total > 0)
                {
                    let dropped = window.remove(0);
                    total -= char_len(dropped);
                }
            }

            window.push(piece);
            total += length;
        }

        if let Some(text) = trimmed(&window.concat()) {
            merged.push(text);
        }

        merged
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Splits on `separator`, keeping each separator at the start of the piece
/// that follows it. An empty separator splits into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces.into_iter().filter(|piece| !piece.is_empty()).collect()
}

/// Splits every document and assigns chunk ordinals starting at `first_index`.
/// Returns the chunks and the next free ordinal.
///
/// Chunk ids hash the document, page and position within that document, not
/// the ordinal, so they stay the same when other files join the corpus.
pub fn chunk_documents(
    documents: &[Document],
    options: &ChunkingOptions,
    first_index: u64,
) -> Result<(Vec<Chunk>, u64), IngestError> {
    let splitter = RecursiveSplitter::new(options)?;
    let mut chunks = Vec::new();
    let mut cursor = first_index;

    for document in documents {
        for (position, text) in splitter.split_text(&document.text).into_iter().enumerate() {
            let chunk_id =
                make_chunk_id(&document.document_id, document.page, position as u64, &text);
            chunks.push(Chunk {
                chunk_id,
                document_id: document.document_id.clone(),
                source_path: document.source_path.clone(),
                page: document.page,
                chunk_index: cursor,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    Ok((chunks, cursor))
}

fn make_chunk_id(document_id: &str, page: Option<u32>, position: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(position.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
