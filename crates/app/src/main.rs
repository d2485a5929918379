use campus_rag_core::config::{
    DEFAULT_EMBEDDING_MODEL, DEFAULT_INDEX_DIR, DEFAULT_LLM_MODEL, DEFAULT_RERANKER_MODEL,
    HF_TOKEN_ENV,
};
use campus_rag_core::diagnostics::PREVIEW_CHARS;
use campus_rag_core::{
    ingest_folder, inspect, read_credential, Answer, CharacterNgramEmbedder, ChunkingOptions,
    Embedder, GeminiGenerator, HostedCrossEncoder, HostedEmbedder, IngestError, LocalIndex,
    QaPipeline, QdrantStore, RagError, RelevanceScorer, RerankFailurePolicy, RetrievalOptions,
    ScorerRegistry, Settings, TermOverlapScorer, Turn, VectorIndex, DEFAULT_PROBE_QUERY,
};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "campus-rag", version, about = "Question answering over the university documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of the local vector index
    #[arg(long, env = "CAMPUS_RAG_INDEX_DIR", default_value = DEFAULT_INDEX_DIR)]
    index_dir: PathBuf,

    /// Vector store backend
    #[arg(long, value_enum, env = "CAMPUS_RAG_STORE", default_value_t = StoreKind::Local)]
    store: StoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "university_docs")]
    qdrant_collection: String,

    /// Embedding backend
    #[arg(long, value_enum, env = "CAMPUS_RAG_EMBEDDER", default_value_t = EmbedderKind::Hosted)]
    embedder: EmbedderKind,

    /// Hosted sentence-embedding model
    #[arg(long, env = "CAMPUS_RAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Generation model
    #[arg(long, env = "CAMPUS_RAG_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,

    /// Reranking backend
    #[arg(long, value_enum, env = "CAMPUS_RAG_RERANKER", default_value_t = RerankerKind::Hosted)]
    reranker: RerankerKind,

    /// Hosted cross-encoder model
    #[arg(long, env = "CAMPUS_RAG_RERANKER_MODEL", default_value = DEFAULT_RERANKER_MODEL)]
    reranker_model: String,

    /// Maximum characters per chunk
    #[arg(long, default_value = "600")]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value = "80")]
    chunk_overlap: usize,

    /// Candidates pulled from the index before reranking
    #[arg(long, default_value = "10")]
    initial_k: usize,

    /// Chunks kept after reranking
    #[arg(long, default_value = "3")]
    final_k: usize,

    /// Behaviour when the reranker fails
    #[arg(long, value_enum, default_value_t = RerankFallback::Fail)]
    on_rerank_failure: RerankFallback,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Hosted,
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum RerankerKind {
    Hosted,
    Overlap,
}

#[derive(Clone, Copy, ValueEnum)]
enum RerankFallback {
    Fail,
    Candidates,
}

#[derive(Subcommand)]
enum Command {
    /// Load, split, embed and index every PDF and text file under a folder.
    Ingest {
        /// Folder scanned recursively.
        #[arg(long)]
        path: PathBuf,
    },
    /// Ask one question.
    Ask {
        /// Question to ask
        #[arg(long = "q")]
        question: String,
        /// Context text passed to the model instead of retrieval
        #[arg(long)]
        context: Option<String>,
        /// Text file read verbatim as context instead of retrieval
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Interactive conversation that keeps recent turns as context.
    Chat,
    /// Compare the data folder with the index and run a probe query.
    Check {
        /// Folder holding the source documents
        #[arg(long, default_value = "./data")]
        data: PathBuf,
        /// Probe query run against the index
        #[arg(long, default_value = DEFAULT_PROBE_QUERY)]
        probe: String,
        /// Skip the probe query
        #[arg(long, default_value_t = false)]
        no_probe: bool,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings, RagError> {
        let settings = Settings {
            embedding_model: self.embedding_model.clone(),
            llm_model: self.llm_model.clone(),
            reranker_model: self.reranker_model.clone(),
            chunking: ChunkingOptions {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
            retrieval: RetrievalOptions {
                initial_k: self.initial_k,
                final_k: self.final_k,
                on_rerank_failure: match self.on_rerank_failure {
                    RerankFallback::Fail => RerankFailurePolicy::FailQuery,
                    RerankFallback::Candidates => RerankFailurePolicy::UseCandidateOrder,
                },
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    fn embedder(&self, settings: &Settings) -> Result<Arc<dyn Embedder>, RagError> {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Hosted => Arc::new(HostedEmbedder::new(
                settings.embedding_model.clone(),
                read_credential(HF_TOKEN_ENV),
            )?),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };
        Ok(embedder)
    }

    fn scorer(
        &self,
        settings: &Settings,
        registry: &ScorerRegistry,
    ) -> Result<Arc<dyn RelevanceScorer>, RagError> {
        match self.reranker {
            RerankerKind::Hosted => registry.get_or_load(&settings.reranker_model, |model| {
                let scorer: Arc<dyn RelevanceScorer> = Arc::new(HostedCrossEncoder::new(
                    model,
                    read_credential(HF_TOKEN_ENV),
                )?);
                Ok(scorer)
            }),
            RerankerKind::Overlap => registry.get_or_load(TermOverlapScorer::MODEL_NAME, |_| {
                let scorer: Arc<dyn RelevanceScorer> = Arc::new(TermOverlapScorer::new()?);
                Ok(scorer)
            }),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "campus-rag boot"
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %format!("{error:#}"), "command failed");
            eprintln!("❌ {}", user_message(&error));
            ExitCode::FAILURE
        }
    }
}

fn user_message(error: &anyhow::Error) -> String {
    if let Some(rag) = error.downcast_ref::<RagError>() {
        return rag.user_message();
    }
    if let Some(IngestError::Rag(rag)) = error.downcast_ref::<IngestError>() {
        return rag.user_message();
    }
    format!("{error:#}")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    let embedder = cli.embedder(&settings)?;

    match cli.store {
        StoreKind::Local => {
            let index = Arc::new(LocalIndex::open(&cli.index_dir).await?);
            index
                .check_embedder(embedder.model_name(), embedder.dimensions())
                .await?;
            dispatch(cli, settings, embedder, index).await
        }
        StoreKind::Qdrant => {
            let index = Arc::new(QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection));
            dispatch(cli, settings, embedder, index).await
        }
    }
}

async fn dispatch<V>(
    cli: Cli,
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    index: Arc<V>,
) -> anyhow::Result<()>
where
    V: VectorIndex + 'static,
{

    match &cli.command {
        Command::Ingest { path } => ingest(path, &settings, embedder.as_ref(), index.as_ref()).await,
        Command::Check {
            data,
            probe,
            no_probe,
        } => {
            let probe = (!*no_probe).then_some(probe.as_str());
            check(data, index.as_ref(), embedder.as_ref(), probe).await
        }
        Command::Ask {
            question,
            context,
            context_file,
        } => {
            let registry = ScorerRegistry::new();
            let pipeline = build_pipeline(&cli, &settings, &registry, embedder, index)?;
            ask(&pipeline, question, context.as_deref(), context_file.as_deref()).await
        }
        Command::Chat => {
            let registry = ScorerRegistry::new();
            let pipeline = build_pipeline(&cli, &settings, &registry, embedder, index)?;
            chat(&pipeline).await
        }
    }
}

fn build_pipeline<V>(
    cli: &Cli,
    settings: &Settings,
    registry: &ScorerRegistry,
    embedder: Arc<dyn Embedder>,
    index: Arc<V>,
) -> Result<QaPipeline<V>, RagError>
where
    V: VectorIndex,
{
    let generator = GeminiGenerator::from_env(settings.llm_model.clone())?;
    let scorer = cli.scorer(settings, registry)?;
    Ok(QaPipeline::new(
        embedder,
        index,
        scorer,
        Arc::new(generator),
        settings.retrieval.clone(),
    ))
}

async fn ingest<V>(
    path: &Path,
    settings: &Settings,
    embedder: &dyn Embedder,
    index: &V,
) -> anyhow::Result<()>
where
    V: VectorIndex,
{
    println!("Loading documents from: {}", path.display());
    let report = ingest_folder(path, &settings.chunking, embedder, index).await?;

    if !report.skipped_files.is_empty() {
        warn!(skipped_files = report.skipped_files.len(), folder = %path.display(), "some files were skipped");
        for skipped in &report.skipped_files {
            println!("⚠️  skipped {}: {}", skipped.path.display(), skipped.reason);
        }
    }

    println!("✅ Loaded {} documents", report.documents);
    println!("✅ Split into {} chunks", report.chunks);
    println!(
        "✅ Successfully ingested {} documents into the {} index at {}",
        report.documents,
        index.backend(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn ask<V>(
    pipeline: &QaPipeline<V>,
    question: &str,
    context: Option<&str>,
    context_file: Option<&Path>,
) -> anyhow::Result<()>
where
    V: VectorIndex,
{
    let explicit = match context_file {
        Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|error| {
            anyhow::anyhow!("failed to read context file {}: {error}", path.display())
        })?),
        None => context.map(str::to_string),
    };

    let answer = match explicit.as_deref() {
        Some(context) => pipeline.answer_with_context(question, context).await?,
        None => {
            println!("Retrieving context from the {} index...", pipeline.index().backend());
            pipeline.answer(question, &[]).await?
        }
    };

    print_answer(&answer);
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("\n--- Result ---");
    println!("{}", answer.text());
    if let Answer::Generated { sources, .. } = answer {
        if !sources.is_empty() {
            println!("\nSources:");
            for source in sources {
                println!("  - {source}");
            }
        }
    }
    println!("--------------\n");
}

async fn chat<V>(pipeline: &QaPipeline<V>) -> anyhow::Result<()>
where
    V: VectorIndex,
{
    let mut history: Vec<Turn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Ask about courses, fees, the academic calendar, admissions or campus life.");
    println!("Type `clear` to reset the conversation, `exit` to leave.");

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                history.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        match pipeline.answer(question, &history).await {
            Ok(answer) => {
                println!("{}", answer.text());
                history.push(Turn::user(question));
                history.push(Turn::assistant(answer.text()));
            }
            Err(error) => {
                error!(error = %error, "question failed");
                println!("Error: {}", error.user_message());
            }
        }
    }

    Ok(())
}

async fn check<V>(
    data: &Path,
    index: &V,
    embedder: &dyn Embedder,
    probe: Option<&str>,
) -> anyhow::Result<()>
where
    V: VectorIndex,
{
    let report = inspect(data, index, embedder, probe).await?;

    println!("📁 Source files in {}:", data.display());
    println!("   Total files: {}", report.source_files.len());
    for file in &report.source_files {
        let shown = file.path.strip_prefix(data).unwrap_or(file.path.as_path());
        println!(
            "   - {} ({:.1} KB)",
            shown.display(),
            file.size_bytes as f64 / 1024.0
        );
    }

    println!("\n💾 Index status ({}):", index.backend());
    println!("   Total chunks stored: {}", report.indexed_chunks);
    println!("   Unique source documents: {}", report.indexed_sources.len());

    if report.missing_from_index.is_empty() && report.missing_from_disk.is_empty() {
        println!("   ✅ Index matches the data folder");
    }
    if !report.missing_from_index.is_empty() {
        println!("   ⚠️  Files NOT in index ({}):", report.missing_from_index.len());
        for path in &report.missing_from_index {
            println!("      - {path}");
        }
    }
    if !report.missing_from_disk.is_empty() {
        println!(
            "   ⚠️  Files in index but not in data folder ({}):",
            report.missing_from_disk.len()
        );
        for path in &report.missing_from_disk {
            println!("      - {path}");
        }
    }

    if let Some(query) = &report.probe_query {
        println!("\n🧪 Test retrieval (query: '{query}'):");
        println!("   Retrieved {} chunks", report.probe_hits.len());
        if let Some(top) = report.probe_hits.first() {
            println!("   Top result preview ({PREVIEW_CHARS} chars):");
            println!("   {}...", top.preview);
            println!("   Source: {} (score {:.4})", top.source_path, top.score);
        }
    }

    Ok(())
}
