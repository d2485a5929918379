use crate::config::DEFAULT_EMBEDDING_MODEL;
use crate::error::RagError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Hugging Face inference router; models are addressed below it.
pub const HF_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference/models/";

/// Output size of `all-MiniLM-L6-v2`.
pub const MINILM_DIMENSIONS: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside stored vectors.
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Deterministic hashed character-trigram embedder. Needs no network and is
/// stable across processes, which makes it usable for offline indexes.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "character-ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Serialize)]
struct FeatureExtractionRequest<'a> {
    inputs: &'a [&'a str],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Batch(Vec<Vec<f32>>),
    Single(Vec<f32>),
}

/// Sentence embeddings from a hosted Hugging Face feature-extraction model.
pub struct HostedEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_token: Option<String>,
    dimensions: usize,
}

impl HostedEmbedder {
    pub fn new(model: impl Into<String>, api_token: Option<String>) -> Result<Self, RagError> {
        let model = model.into();
        let endpoint = Url::parse(HF_INFERENCE_URL)?
            .join(&format!("{model}/pipeline/feature-extraction"))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model,
            api_token,
            dimensions: MINILM_DIMENSIONS,
        })
    }

    pub fn default_model(api_token: Option<String>) -> Result<Self, RagError> {
        Self::new(DEFAULT_EMBEDDING_MODEL, api_token)
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn failure(&self, details: impl ToString) -> RagError {
        RagError::Embedding {
            provider: self.model.clone(),
            details: details.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for HostedEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.failure("service returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(model = %self.model, batch_size = texts.len(), "embedding batch");

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&FeatureExtractionRequest { inputs: texts });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|error| {
            error!(model = %self.model, error = %error, "embedding request failed");
            self.failure(error)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "embedding service error");
            return Err(self.failure(format!("service returned {status}: {body}")));
        }

        let vectors = match response
            .json::<FeatureExtractionResponse>()
            .await
            .map_err(|error| self.failure(format!("unexpected response: {error}")))?
        {
            FeatureExtractionResponse::Batch(vectors) => vectors,
            FeatureExtractionResponse::Single(vector) => vec![vector],
        };

        if vectors.len() != texts.len() {
            return Err(self.failure(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(vector) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(self.failure(format!(
                "vector dimension {} != {}",
                vector.len(),
                self.dimensions
            )));
        }

        Ok(vectors)
    }
}
