//! Cross-encoder reranking of retrieval candidates.
//!
//! [`rerank`] scores every (question, passage) pair with a [`RelevanceScorer`],
//! sorts by descending relevance and keeps the best `k`. The sort is stable:
//! candidates with equal relevance keep their retrieval order. Scorers are
//! shared through a [`ScorerRegistry`] owned by the host, so a model is only
//! constructed once per process no matter how many questions are asked.

use crate::config::DEFAULT_RERANKER_MODEL;
use crate::embeddings::HF_INFERENCE_URL;
use crate::traits::RelevanceScorer;
use crate::{RagError, ScoredChunk};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use url::Url;

const PREVIEW_CHARS: usize = 100;

/// Reorders `candidates` by relevance to `query` and keeps the top `k`.
///
/// Returns `min(k, candidates.len())` chunks whose `score` is the relevance
/// score. Ties keep candidate order; NaN scores rank last. An empty candidate
/// list returns immediately without calling the scorer.
pub async fn rerank(
    scorer: &dyn RelevanceScorer,
    query: &str,
    candidates: Vec<ScoredChunk>,
    k: usize,
) -> Result<Vec<ScoredChunk>, RagError> {
    if candidates.is_empty() || k == 0 {
        debug!(candidates = candidates.len(), k, "nothing to rerank");
        return Ok(Vec::new());
    }

    let passages: Vec<&str> = candidates
        .iter()
        .map(|candidate| candidate.chunk.text.as_str())
        .collect();

    info!(model = scorer.model_name(), candidates = passages.len(), "reranking candidates");
    let scores = scorer.score(query, &passages).await?;

    if scores.len() != candidates.len() {
        return Err(RagError::Rerank {
            model: scorer.model_name().to_string(),
            details: format!(
                "expected {} scores, got {}",
                candidates.len(),
                scores.len()
            ),
        });
    }

    let mut reranked: Vec<ScoredChunk> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, score)| ScoredChunk {
            chunk: candidate.chunk,
            score,
        })
        .collect();

    reranked.sort_by(|left, right| rank_key(right.score).total_cmp(&rank_key(left.score)));
    reranked.truncate(k);

    for (rank, hit) in reranked.iter().enumerate() {
        let preview: String = hit
            .chunk
            .text
            .chars()
            .take(PREVIEW_CHARS)
            .collect::<String>()
            .replace('\n', " ");
        debug!(rank = rank + 1, score = hit.score, preview = %preview, "reranked chunk");
    }

    Ok(reranked)
}

/// Sort key for a relevance score. NaN ranks below everything and `-0.0`
/// collapses onto `0.0` so the two compare equal under `total_cmp`.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score + 0.0
    }
}

/// Process-lifetime cache of loaded scorers keyed by model name.
///
/// The host creates one registry and hands it to whatever builds pipelines;
/// nothing in this crate keeps a global instance.
#[derive(Default)]
pub struct ScorerRegistry {
    loaded: Mutex<HashMap<String, Arc<dyn RelevanceScorer>>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached scorer for `model`, calling `load` only when the
    /// model has not been loaded before.
    pub fn get_or_load<F>(&self, model: &str, load: F) -> Result<Arc<dyn RelevanceScorer>, RagError>
    where
        F: FnOnce(&str) -> Result<Arc<dyn RelevanceScorer>, RagError>,
    {
        let mut loaded = self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(scorer) = loaded.get(model) {
            return Ok(Arc::clone(scorer));
        }

        info!(model, "loading reranker model");
        let scorer = load(model)?;
        loaded.insert(model.to_string(), Arc::clone(&scorer));
        info!(model, "reranker model loaded");
        Ok(scorer)
    }

    pub fn loaded_models(&self) -> Vec<String> {
        let loaded = self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut models: Vec<String> = loaded.keys().cloned().collect();
        models.sort();
        models
    }
}

#[derive(Serialize)]
struct SentencePair<'a> {
    text: &'a str,
    text_pair: &'a str,
}

#[derive(Serialize)]
struct ClassificationRequest<'a> {
    inputs: Vec<SentencePair<'a>>,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    PerPair(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl ClassificationResponse {
    fn into_scores(self) -> Vec<f32> {
        match self {
            ClassificationResponse::PerPair(rows) => rows
                .into_iter()
                .map(|labels| {
                    labels
                        .into_iter()
                        .map(|label| label.score)
                        .fold(f32::NEG_INFINITY, f32::max)
                })
                .collect(),
            ClassificationResponse::Flat(labels) => {
                labels.into_iter().map(|label| label.score).collect()
            }
        }
    }
}

/// Cross-encoder served by the Hugging Face inference API.
pub struct HostedCrossEncoder {
    client: Client,
    endpoint: Url,
    model: String,
    api_token: Option<String>,
}

impl HostedCrossEncoder {
    pub fn new(model: impl Into<String>, api_token: Option<String>) -> Result<Self, RagError> {
        let model = model.into();
        let endpoint = Url::parse(HF_INFERENCE_URL)?.join(&model)?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model,
            api_token,
        })
    }

    pub fn default_model(api_token: Option<String>) -> Result<Self, RagError> {
        Self::new(DEFAULT_RERANKER_MODEL, api_token)
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn failure(&self, details: impl ToString) -> RagError {
        RagError::Rerank {
            model: self.model.clone(),
            details: details.to_string(),
        }
    }
}

#[async_trait]
impl RelevanceScorer for HostedCrossEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let body = ClassificationRequest {
            inputs: passages
                .iter()
                .map(|passage| SentencePair {
                    text: query,
                    text_pair: passage,
                })
                .collect(),
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|error| {
            error!(model = %self.model, error = %error, "rerank request failed");
            self.failure(error)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "rerank service error");
            return Err(self.failure(format!("service returned {status}: {body}")));
        }

        let parsed: ClassificationResponse = response
            .json()
            .await
            .map_err(|error| self.failure(format!("unexpected response: {error}")))?;
        Ok(parsed.into_scores())
    }
}

/// Local scorer: the fraction of distinct query terms (longer than two
/// characters) that occur in the passage. Deterministic and offline.
pub struct TermOverlapScorer {
    token: Regex,
}

impl TermOverlapScorer {
    pub const MODEL_NAME: &'static str = "term-overlap";

    pub fn new() -> Result<Self, RagError> {
        let token = Regex::new(r"\w+").map_err(|error| RagError::Config(error.to_string()))?;
        Ok(Self { token })
    }

    fn terms(&self, text: &str) -> HashSet<String> {
        self.token
            .find_iter(&text.to_lowercase())
            .map(|found| found.as_str().to_string())
            .filter(|term| term.chars().count() > 2)
            .collect()
    }
}

#[async_trait]
impl RelevanceScorer for TermOverlapScorer {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
        let query_terms = self.terms(query);
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .iter()
            .map(|passage| {
                let passage_terms = self.terms(passage);
                let shared = query_terms.intersection(&passage_terms).count();
                shared as f32 / query_terms.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: &str, text: &str, similarity: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                document_id: "doc".to_string(),
                source_path: "/data/info.txt".to_string(),
                page: None,
                chunk_index: 0,
                text: text.to_string(),
            },
            score: similarity,
        }
    }

    /// Scores each passage by parsing it as a number.
    struct NumericScorer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceScorer for NumericScorer {
        fn model_name(&self) -> &str {
            "numeric"
        }

        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(passages
                .iter()
                .map(|passage| passage.parse::<f32>().unwrap_or(f32::NAN))
                .collect())
        }
    }

    struct ShortScorer;

    #[async_trait]
    impl RelevanceScorer for ShortScorer {
        fn model_name(&self) -> &str {
            "short"
        }

        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>, RagError> {
            Ok(vec![1.0])
        }
    }

    fn numeric() -> NumericScorer {
        NumericScorer {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn keeps_the_highest_scoring_k() {
        let candidates = (0..10)
            .map(|i| candidate(&format!("c{i}"), &format!("{}", (i * 7) % 10), 1.0))
            .collect();

        let reranked = rerank(&numeric(), "q", candidates, 3).await.unwrap();
        let texts: Vec<&str> = reranked.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["9", "8", "7"]);
        assert_eq!(reranked[0].score, 9.0);
    }

    #[tokio::test]
    async fn equal_scores_keep_candidate_order() {
        let candidates = vec![
            candidate("first", "0.5", 0.9),
            candidate("top", "0.8", 0.8),
            candidate("second", "0.5", 0.7),
            candidate("third", "0.5", 0.6),
        ];

        let reranked = rerank(&numeric(), "q", candidates, 4).await.unwrap();
        let ids: Vec<&str> = reranked.iter().map(|hit| hit.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["top", "first", "second", "third"]);
    }

    #[tokio::test]
    async fn signed_zeros_are_equal_scores() {
        let candidates = vec![
            candidate("first", "-0", 0.9),
            candidate("second", "0", 0.8),
            candidate("third", "-0.0", 0.7),
        ];

        let reranked = rerank(&numeric(), "q", candidates, 3).await.unwrap();
        let ids: Vec<&str> = reranked.iter().map(|hit| hit.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn nan_scores_rank_last() {
        let candidates = vec![candidate("nan", "oops", 0.9), candidate("low", "-3", 0.1)];

        let reranked = rerank(&numeric(), "q", candidates, 2).await.unwrap();
        assert_eq!(reranked[0].chunk.chunk_id, "low");
        assert_eq!(reranked[1].chunk.chunk_id, "nan");
    }

    #[tokio::test]
    async fn empty_candidates_skip_the_scorer() {
        let scorer = numeric();
        let reranked = rerank(&scorer, "q", Vec::new(), 3).await.unwrap();
        assert!(reranked.is_empty());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fewer_candidates_than_k_returns_all() {
        let candidates = vec![candidate("a", "1", 0.1), candidate("b", "2", 0.2)];
        let reranked = rerank(&numeric(), "q", candidates, 5).await.unwrap();
        assert_eq!(reranked.len(), 2);
    }

    #[tokio::test]
    async fn score_count_mismatch_is_a_rerank_error() {
        let candidates = vec![candidate("a", "x", 0.1), candidate("b", "y", 0.2)];
        let result = rerank(&ShortScorer, "q", candidates, 2).await;
        assert!(matches!(result, Err(RagError::Rerank { .. })));
    }

    #[tokio::test]
    async fn term_overlap_prefers_matching_passages() {
        let scorer = TermOverlapScorer::new().unwrap();
        let scores = scorer
            .score(
                "What is the tuition fee?",
                &["The tuition fee is 5000.", "The library opens at 9."],
            )
            .await
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn registry_loads_each_model_once() {
        let registry = ScorerRegistry::new();
        let loads = AtomicUsize::new(0);
        let load = |_: &str| -> Result<Arc<dyn RelevanceScorer>, RagError> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TermOverlapScorer::new()?))
        };

        let first = registry.get_or_load("term-overlap", load).unwrap();
        let second = registry.get_or_load("term-overlap", load).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.loaded_models(), vec!["term-overlap".to_string()]);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let registry = ScorerRegistry::new();
        let failed = registry.get_or_load("broken", |model| {
            Err(RagError::Config(format!("cannot load {model}")))
        });
        assert!(failed.is_err());
        assert!(registry.loaded_models().is_empty());
    }

    #[test]
    fn classification_rows_use_the_best_label() {
        let parsed: ClassificationResponse = serde_json::from_str(
            r#"[[{"label":"LABEL_0","score":0.25}],[{"label":"LABEL_0","score":0.75}]]"#,
        )
        .unwrap();
        assert_eq!(parsed.into_scores(), vec![0.25, 0.75]);

        let flat: ClassificationResponse =
            serde_json::from_str(r#"[{"label":"LABEL_0","score":0.5}]"#).unwrap();
        assert_eq!(flat.into_scores(), vec![0.5]);
    }

    #[test]
    fn cross_encoder_endpoint_addresses_the_model() {
        let encoder = HostedCrossEncoder::default_model(None).unwrap();
        assert_eq!(
            encoder.endpoint.as_str(),
            "https://router.huggingface.co/hf-inference/models/cross-encoder/ms-marco-MiniLM-L-6-v2"
        );
    }
}
