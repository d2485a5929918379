use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path does not exist: {0}")]
    MissingPath(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("no pdf or text documents found in {0}")]
    NoDocuments(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error(transparent)]
    Rag(#[from] RagError),
}

/// Failures on the retrieval and answering path.
///
/// An empty index or an empty reranked set is not represented here; those are
/// ordinary outcomes surfaced as empty vectors or
/// [`Answer::NoRelevantInformation`](crate::Answer::NoRelevantInformation).
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding failed ({provider}): {details}")]
    Embedding { provider: String, details: String },

    #[error("vector store failed ({backend}): {details}")]
    VectorStore { backend: String, details: String },

    #[error("reranking failed ({model}): {details}")]
    Rerank { model: String, details: String },

    #[error("answer generation failed ({model}): {details}")]
    Generation { model: String, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl RagError {
    pub(crate) fn store(backend: &str, details: impl ToString) -> Self {
        Self::VectorStore {
            backend: backend.to_string(),
            details: details.to_string(),
        }
    }

    /// Message suitable for showing to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(details) => format!("Configuration problem: {details}"),
            Self::Embedding { .. } => {
                "Could not embed the question; the embedding service is unavailable.".to_string()
            }
            Self::VectorStore { .. } | Self::Io(_) | Self::Serialization(_) => {
                "Could not read the document index. Run `campus-rag ingest` first.".to_string()
            }
            Self::Rerank { .. } => {
                "Could not rank the retrieved passages; the reranking model failed.".to_string()
            }
            Self::Generation { .. } => {
                "The answer could not be generated; the language model request failed.".to_string()
            }
            Self::Url(error) => format!("Invalid service address: {error}"),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
