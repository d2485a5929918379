use crate::error::RagError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
pub const DEFAULT_LLM_MODEL: &str = "models/gemini-2.5-flash";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";
pub const DEFAULT_INDEX_DIR: &str = "index_store";

/// What to do when the reranking model fails after retrieval succeeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RerankFailurePolicy {
    /// Abort the question with [`RagError::Rerank`].
    #[default]
    FailQuery,
    /// Keep the similarity order of the candidates, truncated to `final_k`.
    UseCandidateOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalOptions {
    /// Candidates pulled from the vector index.
    pub initial_k: usize,
    /// Chunks kept after reranking.
    pub final_k: usize,
    pub on_rerank_failure: RerankFailurePolicy,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            initial_k: 10,
            final_k: 3,
            on_rerank_failure: RerankFailurePolicy::FailQuery,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub embedding_model: String,
    pub llm_model: String,
    pub reranker_model: String,
    pub chunking: ChunkingOptions,
    pub retrieval: RetrievalOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            reranker_model: DEFAULT_RERANKER_MODEL.to_string(),
            chunking: ChunkingOptions::default(),
            retrieval: RetrievalOptions::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), RagError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }

        let retrieval = &self.retrieval;
        if retrieval.final_k == 0 {
            return Err(RagError::Config("final_k must be greater than zero".to_string()));
        }
        if retrieval.initial_k < retrieval.final_k {
            return Err(RagError::Config(format!(
                "initial_k ({}) must be at least final_k ({})",
                retrieval.initial_k, retrieval.final_k
            )));
        }

        for (name, value) in [
            ("embedding_model", &self.embedding_model),
            ("llm_model", &self.llm_model),
            ("reranker_model", &self.reranker_model),
        ] {
            if value.trim().is_empty() {
                return Err(RagError::Config(format!("{name} must not be empty")));
            }
        }

        Ok(())
    }
}

/// Reads a credential from the environment, treating blank values as unset.
pub fn read_credential(variable: &str) -> Option<String> {
    std::env::var(variable).ok().and_then(|value| {
        let key = value.trim().to_string();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    })
}

pub fn require_credential(variable: &str) -> Result<String, RagError> {
    read_credential(variable)
        .ok_or_else(|| RagError::Config(format!("{variable} not found in environment variables")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = settings.chunking.chunk_size;
        assert!(matches!(settings.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn initial_k_cannot_be_below_final_k() {
        let mut settings = Settings::default();
        settings.retrieval.initial_k = 2;
        settings.retrieval.final_k = 3;
        assert!(matches!(settings.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn missing_credential_is_a_config_error() {
        let result = require_credential("CAMPUS_RAG_TEST_UNSET_CREDENTIAL");
        assert!(matches!(result, Err(RagError::Config(_))));
    }
}
