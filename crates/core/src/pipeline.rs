use crate::config::{RerankFailurePolicy, RetrievalOptions};
use crate::context::{assemble_context, history_window};
use crate::embeddings::Embedder;
use crate::rerank::rerank;
use crate::traits::{Generator, RelevanceScorer, VectorIndex};
use crate::{Answer, RagError, ScoredChunk, Turn};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything handed to the generator for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    pub reranked: Vec<ScoredChunk>,
    pub text: String,
}

impl RetrievedContext {
    pub fn sources(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.reranked
            .iter()
            .filter(|hit| seen.insert(hit.chunk.source_path.clone()))
            .map(|hit| hit.chunk.source_path.clone())
            .collect()
    }
}

/// Question → candidates → reranked set → context → answer, in one pass.
///
/// Collaborators are shared handles owned by the host; the pipeline itself
/// keeps no state between questions.
pub struct QaPipeline<V>
where
    V: VectorIndex,
{
    embedder: Arc<dyn Embedder>,
    index: Arc<V>,
    scorer: Arc<dyn RelevanceScorer>,
    generator: Arc<dyn Generator>,
    options: RetrievalOptions,
}

impl<V> QaPipeline<V>
where
    V: VectorIndex,
{
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<V>,
        scorer: Arc<dyn RelevanceScorer>,
        generator: Arc<dyn Generator>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            embedder,
            index,
            scorer,
            generator,
            options,
        }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    /// The `initial_k` chunks most similar to the question.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::Config("question is empty".to_string()));
        }

        let query_vector = self.embedder.embed(question).await.map_err(|e| {
            error!(error = %e, "embedding failed during retrieval");
            e
        })?;

        let candidates = self
            .index
            .search(&query_vector, self.options.initial_k)
            .await
            .map_err(|e| {
                error!(backend = self.index.backend(), error = %e, "vector search failed");
                e
            })?;

        info!(candidates = candidates.len(), requested = self.options.initial_k, "retrieved candidates");
        Ok(candidates)
    }

    /// Reranks `candidates` down to `final_k`, applying the configured
    /// [`RerankFailurePolicy`] when the scorer fails.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let final_k = self.options.final_k;
        let fallback = match self.options.on_rerank_failure {
            RerankFailurePolicy::UseCandidateOrder => Some(candidates.clone()),
            RerankFailurePolicy::FailQuery => None,
        };

        match rerank(self.scorer.as_ref(), question, candidates, final_k).await {
            Ok(reranked) => Ok(reranked),
            Err(e) => match fallback {
                Some(mut candidates) => {
                    warn!(error = %e, "reranking failed, keeping similarity order");
                    candidates.truncate(final_k);
                    Ok(candidates)
                }
                None => {
                    error!(error = %e, "reranking failed");
                    Err(e)
                }
            },
        }
    }

    /// Retrieves, reranks and assembles the context for `question`. `None`
    /// when nothing relevant was found.
    pub async fn build_context(
        &self,
        question: &str,
        history: &[Turn],
    ) -> Result<Option<RetrievedContext>, RagError> {
        let candidates = self.retrieve(question).await?;
        if candidates.is_empty() {
            info!("no candidates retrieved");
            return Ok(None);
        }

        let reranked = self.rerank(question, candidates).await?;
        if reranked.is_empty() {
            info!("reranking kept no chunks");
            return Ok(None);
        }

        let text = assemble_context(&reranked, history_window(history));
        Ok(Some(RetrievedContext { reranked, text }))
    }

    /// Answers `question` from the index. The generator is not called when
    /// retrieval finds nothing.
    pub async fn answer(&self, question: &str, history: &[Turn]) -> Result<Answer, RagError> {
        let Some(context) = self.build_context(question, history).await? else {
            return Ok(Answer::NoRelevantInformation);
        };

        let text = self.generate(&context.text, question).await?;
        Ok(Answer::Generated {
            text,
            sources: context.sources(),
        })
    }

    /// Answers from a caller-supplied context, bypassing retrieval.
    pub async fn answer_with_context(
        &self,
        question: &str,
        context: &str,
    ) -> Result<Answer, RagError> {
        if context.trim().is_empty() {
            return Ok(Answer::NoRelevantInformation);
        }

        let text = self.generate(context, question).await?;
        Ok(Answer::Generated {
            text,
            sources: Vec::new(),
        })
    }

    async fn generate(&self, context: &str, question: &str) -> Result<String, RagError> {
        info!(model = self.generator.model_name(), context_chars = context.len(), "generating answer");
        self.generator.generate(context, question).await.map_err(|e| {
            error!(error = %e, "answer generation failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::rerank::TermOverlapScorer;
    use crate::stores::LocalIndex;
    use crate::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Echoes every number found in the context back as the answer.
    #[derive(Default)]
    struct FakeGenerator {
        calls: AtomicUsize,
        last_context: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, context: &str, _question: &str) -> Result<String, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock().unwrap() = Some(context.to_string());
            let figures: Vec<&str> = context
                .split(|c: char| !c.is_ascii_digit())
                .filter(|part| !part.is_empty())
                .collect();
            Ok(format!("The figure is {}.", figures.join(", ")))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _context: &str, _question: &str) -> Result<String, RagError> {
            Err(RagError::Generation {
                model: "failing".to_string(),
                details: "quota exceeded".to_string(),
            })
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl RelevanceScorer for FailingScorer {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>, RagError> {
            Err(RagError::Rerank {
                model: "failing".to_string(),
                details: "model unavailable".to_string(),
            })
        }
    }

    /// Scores passages by the number they contain.
    struct NumberScorer;

    #[async_trait]
    impl RelevanceScorer for NumberScorer {
        fn model_name(&self) -> &str {
            "number"
        }

        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError> {
            Ok(passages
                .iter()
                .map(|passage| {
                    passage
                        .split_whitespace()
                        .find_map(|word| word.parse::<f32>().ok())
                        .unwrap_or(0.0)
                })
                .collect())
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: format!("doc-{id}"),
            source_path: format!("/data/{id}.txt"),
            page: None,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    async fn index_with(
        dir: &std::path::Path,
        chunks: &[Chunk],
    ) -> Result<Arc<LocalIndex>, RagError> {
        let embedder = CharacterNgramEmbedder::default();
        let index = LocalIndex::open(dir).await?;
        index.ensure_ready("character-ngram", embedder.dimensions).await?;
        let vectors: Vec<Vec<f32>> = chunks
            .iter()
            .map(|chunk| embedder.embed_sync(&chunk.text))
            .collect();
        index.insert(chunks, &vectors).await?;
        Ok(Arc::new(index))
    }

    fn pipeline(
        index: Arc<LocalIndex>,
        scorer: Arc<dyn RelevanceScorer>,
        generator: Arc<dyn Generator>,
        options: RetrievalOptions,
    ) -> QaPipeline<LocalIndex> {
        QaPipeline::new(
            Arc::new(CharacterNgramEmbedder::default()),
            index,
            scorer,
            generator,
            options,
        )
    }

    #[tokio::test]
    async fn single_chunk_answer_references_the_figure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = index_with(dir.path(), &[chunk("fees", "Tuition is 5000 per year.")]).await?;
        let generator = Arc::new(FakeGenerator::default());
        let qa = pipeline(
            index,
            Arc::new(TermOverlapScorer::new()?),
            generator.clone(),
            RetrievalOptions::default(),
        );

        let context = qa.build_context("What is the tuition?", &[]).await?;
        let context = context.expect("context should be found");
        assert!(context.text.contains("Tuition is 5000 per year."));

        let answer = qa.answer("What is the tuition?", &[]).await?;
        assert!(answer.text().contains("5000"));
        assert_eq!(
            answer,
            Answer::Generated {
                text: "The figure is 5000.".to_string(),
                sources: vec!["/data/fees.txt".to_string()],
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_reports_no_information_without_generating(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = Arc::new(LocalIndex::open(dir.path()).await?);
        let generator = Arc::new(FakeGenerator::default());
        let qa = pipeline(
            index,
            Arc::new(TermOverlapScorer::new()?),
            generator.clone(),
            RetrievalOptions::default(),
        );

        assert!(qa.retrieve("anything").await?.is_empty());
        let answer = qa.answer("Where is the library?", &[]).await?;
        assert_eq!(answer, Answer::NoRelevantInformation);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn ten_candidates_are_cut_to_the_three_best() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(&format!("c{i}"), &format!("score {} fee", (i * 3) % 10)))
            .collect();
        let index = index_with(dir.path(), &chunks).await?;
        let qa = pipeline(
            index,
            Arc::new(NumberScorer),
            Arc::new(FakeGenerator::default()),
            RetrievalOptions {
                initial_k: 10,
                final_k: 3,
                ..RetrievalOptions::default()
            },
        );

        let candidates = qa.retrieve("fee").await?;
        assert_eq!(candidates.len(), 10);

        let reranked = qa.rerank("fee", candidates).await?;
        let scores: Vec<f32> = reranked.iter().map(|hit| hit.score).collect();
        assert_eq!(scores, vec![9.0, 8.0, 7.0]);
        Ok(())
    }

    #[tokio::test]
    async fn only_last_four_turns_reach_the_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = index_with(dir.path(), &[chunk("fees", "Tuition is 5000 per year.")]).await?;
        let generator = Arc::new(FakeGenerator::default());
        let qa = pipeline(
            index,
            Arc::new(TermOverlapScorer::new()?),
            generator.clone(),
            RetrievalOptions::default(),
        );

        let history = vec![
            Turn::user("turn one"),
            Turn::assistant("turn two"),
            Turn::user("turn three"),
            Turn::assistant("turn four"),
            Turn::user("turn five"),
            Turn::assistant("turn six"),
        ];
        qa.answer("And the tuition?", &history).await?;

        let context = generator.last_context.lock().unwrap().clone().unwrap_or_default();
        assert!(!context.contains("turn one"));
        assert!(!context.contains("turn two"));
        for kept in ["turn three", "turn four", "turn five", "turn six"] {
            assert!(context.contains(kept), "missing {kept}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks = vec![
            chunk("a", "Hostel fee is 1200 per semester."),
            chunk("b", "Library opens at nine."),
            chunk("c", "Exam fee is 300."),
        ];
        let index = index_with(dir.path(), &chunks).await?;
        let qa = pipeline(
            index,
            Arc::new(TermOverlapScorer::new()?),
            Arc::new(FakeGenerator::default()),
            RetrievalOptions::default(),
        );

        let first = qa.retrieve("hostel fee").await?;
        let second = qa.retrieve("hostel fee").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn rerank_failure_fails_the_query_by_default() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = index_with(dir.path(), &[chunk("fees", "Tuition is 5000 per year.")]).await?;
        let generator = Arc::new(FakeGenerator::default());
        let qa = pipeline(
            index,
            Arc::new(FailingScorer),
            generator.clone(),
            RetrievalOptions::default(),
        );

        let result = qa.answer("What is the tuition?", &[]).await;
        assert!(matches!(result, Err(RagError::Rerank { .. })));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn rerank_failure_can_fall_back_to_candidates() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks: Vec<Chunk> = (0..5)
            .map(|i| chunk(&format!("c{i}"), &format!("fee notice {i}")))
            .collect();
        let index = index_with(dir.path(), &chunks).await?;
        let qa = pipeline(
            index,
            Arc::new(FailingScorer),
            Arc::new(FakeGenerator::default()),
            RetrievalOptions {
                initial_k: 5,
                final_k: 2,
                on_rerank_failure: RerankFailurePolicy::UseCandidateOrder,
            },
        );

        let candidates = qa.retrieve("fee notice").await?;
        let kept = qa.rerank("fee notice", candidates.clone()).await?;
        assert_eq!(kept, candidates[..2].to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn generation_failure_is_distinct() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = index_with(dir.path(), &[chunk("fees", "Tuition is 5000 per year.")]).await?;
        let qa = pipeline(
            index,
            Arc::new(TermOverlapScorer::new()?),
            Arc::new(FailingGenerator),
            RetrievalOptions::default(),
        );

        let result = qa.answer("What is the tuition?", &[]).await;
        assert!(matches!(result, Err(RagError::Generation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn explicit_context_bypasses_retrieval() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = Arc::new(LocalIndex::open(dir.path()).await?);
        let generator = Arc::new(FakeGenerator::default());
        let qa = pipeline(
            index,
            Arc::new(FailingScorer),
            generator.clone(),
            RetrievalOptions::default(),
        );

        let answer = qa
            .answer_with_context("What is the hostel fee?", "Hostel fee is 1200.")
            .await?;
        assert!(answer.text().contains("1200"));
        assert_eq!(
            generator.last_context.lock().unwrap().as_deref(),
            Some("Hostel fee is 1200.")
        );

        let empty = qa.answer_with_context("Anything?", "   ").await?;
        assert_eq!(empty, Answer::NoRelevantInformation);
        Ok(())
    }
}
