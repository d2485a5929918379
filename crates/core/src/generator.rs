use crate::config::{require_credential, DEFAULT_LLM_MODEL, GEMINI_API_KEY_ENV};
use crate::traits::Generator;
use crate::RagError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

pub const PROMPT_TEMPLATE: &str = "You are an intelligent assistant for a university information system. Your role is to provide accurate, helpful, and well-structured answers based on the provided context.

**Instructions:**
1. Carefully analyze the context and the question
2. Provide a clear, direct answer using ONLY information from the context
3. Structure your response with proper formatting (use bullet points, lists, or tables when appropriate)
4. If the context contains partial information, provide what's available and clearly state what's missing
5. If the answer is not available in the context, politely state: \"I don't have information about this in the available documents.\"
6. For numerical data (fees, dates, etc.), present them clearly and accurately
7. Use professional, friendly language appropriate for a university setting

**Context:**
{context}

**Question:**
{question}

**Answer:**";

/// Fills the prompt template. The context is inserted verbatim.
pub fn render_prompt(context: &str, question: &str) -> String {
    // question first so braces inside the context are never re-substituted
    PROMPT_TEMPLATE
        .replace("{question}", question)
        .replacen("{context}", context, 1)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn response_text(response: GenerateContentResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Gemini `generateContent` client.
pub struct GeminiGenerator {
    client: Client,
    base_url: Url,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self, RagError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Config(format!("{GEMINI_API_KEY_ENV} must not be empty")));
        }

        let mut model = model.into();
        if !model.starts_with("models/") {
            model = format!("models/{model}");
        }

        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(GEMINI_BASE_URL)?,
            model,
            api_key,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /// Reads the API key from `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, RagError> {
        Self::new(model, require_credential(GEMINI_API_KEY_ENV)?)
    }

    pub fn default_model(api_key: impl Into<String>) -> Result<Self, RagError> {
        Self::new(DEFAULT_LLM_MODEL, api_key)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn request_url(&self) -> Result<Url, RagError> {
        Ok(self.base_url.join(&format!("{}:generateContent", self.model))?)
    }

    fn failure(&self, details: impl ToString) -> RagError {
        RagError::Generation {
            model: self.model.clone(),
            details: details.to_string(),
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, context: &str, question: &str) -> Result<String, RagError> {
        let prompt = render_prompt(context, question);
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting answer");

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(self.request_url()?)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                error!(model = %self.model, error = %error, "generation request failed");
                self.failure(error)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| {
                    value
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            error!(model = %self.model, %status, "generation service error");
            return Err(self.failure(format!("service returned {status}: {detail}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|error| self.failure(format!("unexpected response: {error}")))?;

        response_text(parsed).ok_or_else(|| self.failure("response contained no text"))
    }
}
