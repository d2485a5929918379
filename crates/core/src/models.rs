use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

/// Text of one loaded source unit: a PDF page or a whole text file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub source_path: String,
    pub title: String,
    pub page: Option<u32>,
    pub kind: DocumentKind,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub page: Option<u32>,
    pub chunk_index: u64,
    pub text: String,
}

/// A chunk paired with either its similarity (candidate set) or its
/// relevance (reranked set) score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Outcome of one question. An empty retrieval is a normal answer, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Generated { text: String, sources: Vec<String> },
    NoRelevantInformation,
}

impl Answer {
    pub const NO_RELEVANT_INFORMATION: &'static str =
        "I couldn't find relevant information in the knowledge base.";

    pub fn text(&self) -> &str {
        match self {
            Answer::Generated { text, .. } => text,
            Answer::NoRelevantInformation => Self::NO_RELEVANT_INFORMATION,
        }
    }
}
