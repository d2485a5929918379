pub mod chunking;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_documents, RecursiveSplitter, DEFAULT_SEPARATORS};
pub use config::{
    read_credential, require_credential, ChunkingOptions, RerankFailurePolicy, RetrievalOptions,
    Settings,
};
pub use context::{assemble_context, history_window, HISTORY_WINDOW_TURNS};
pub use diagnostics::{inspect, IndexReport, ProbeHit, SourceFile, DEFAULT_PROBE_QUERY};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HostedEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, RagError};
pub use extractor::{extract_page_texts, read_text_file, PageText, PdfExtractor};
pub use generator::{render_prompt, GeminiGenerator};
pub use ingest::{ingest_folder, IngestionReport};
pub use loader::{discover_documents, load_documents, LoadReport, SkippedFile};
pub use models::{Answer, Chunk, Document, DocumentKind, Role, ScoredChunk, Turn};
pub use pipeline::{QaPipeline, RetrievedContext};
pub use rerank::{rerank, HostedCrossEncoder, ScorerRegistry, TermOverlapScorer};
pub use stores::{LocalIndex, QdrantStore};
pub use traits::{Generator, RelevanceScorer, VectorIndex};
