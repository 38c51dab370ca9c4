use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use filing_qa_core::embeddings::{DEFAULT_EMBEDDING_BATCH, DEFAULT_EMBEDDING_MODEL};
use filing_qa_core::extractor::DEFAULT_POLL_INTERVAL;
use filing_qa_core::llm::DEFAULT_CHAT_MODEL;
use filing_qa_core::{
    CharacterNgramEmbedder, ChatCompletionsModel, ChatEndpointConfig, ChunkingConfig, DataLayout,
    DocumentExtractor, Embedder, EmbeddingEndpointConfig, FsPageSource, HfTokenCodec,
    KnownCompanies, LocalVectorStore, LopdfExtractor, OpenAiEmbedder, ParsingEndpointConfig,
    PipelineOptions, Preprocessor, QaOutcome, QaPipeline, QdrantStore, QuestionKind,
    RemoteExtractor, VectorStore, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OPENAI_EMBEDDING_DIMENSIONS: usize = 3072;

#[derive(Parser)]
#[command(name = "filing-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data root holding pdf_reports/, parsed_pages/, parsed_md/,
    /// chunked_reports/ and vectors/.
    #[arg(long, env = "FILING_QA_DATA", default_value = "data")]
    data_root: PathBuf,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// OpenAI-compatible embeddings endpoint.
    Openai,
    /// Offline hashed character trigrams.
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExtractorKind {
    /// Plain text extraction with lopdf.
    Local,
    /// Remote parsing service with table recognition.
    Remote,
}

#[derive(Args)]
struct EmbeddingArgs {
    #[arg(long, value_enum, default_value = "ngram")]
    embedder: EmbedderKind,

    #[arg(long, env = "EMBEDDING_BASE_URL", default_value = "https://api.openai.com/v1")]
    embedding_url: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Vector width; defaults to the chosen embedder's native size.
    #[arg(long)]
    embedding_dimensions: Option<usize>,
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, value_enum, default_value = "local")]
    store: StoreKind,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Prefix of per-company Qdrant collections.
    #[arg(long, default_value = "filing_")]
    qdrant_prefix: String,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index every report under pdf_reports/.
    Preprocess {
        #[arg(long, value_enum, default_value = "local")]
        extractor: ExtractorKind,

        #[arg(long, env = "PARSER_URL", default_value = "http://localhost:8000")]
        parser_url: String,

        #[arg(long, env = "PARSER_API_KEY", hide_env_values = true)]
        parser_api_key: Option<String>,

        /// tokenizer.json used to count chunk tokens.
        #[arg(long, env = "TOKENIZER_PATH")]
        tokenizer: PathBuf,

        #[arg(long, default_value_t = ChunkingConfig::default().chunk_size)]
        chunk_size: usize,

        #[arg(long, default_value_t = ChunkingConfig::default().chunk_overlap)]
        chunk_overlap: usize,
    },
    /// Answer a typed question about one indexed company.
    Answer {
        #[arg(long)]
        query: String,

        /// boolean, number or string
        #[arg(long)]
        kind: String,

        /// Skip company extraction and search this partition.
        #[arg(long)]
        company: Option<String>,

        /// Known company names; defaults to those found under parsed_pages/.
        #[arg(long, value_delimiter = ',')]
        companies: Vec<String>,

        #[arg(long, env = "LLM_BASE_URL", default_value = "https://dashscope.aliyuncs.com/compatible-mode/v1")]
        llm_url: String,

        #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
        llm_api_key: Option<String>,

        #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
        llm_model: String,

        #[arg(long, default_value_t = PipelineOptions::default().retrieval.top_k)]
        top_k: usize,

        /// Relevance judgments in flight at once.
        #[arg(long, default_value_t = PipelineOptions::default().rerank.concurrency)]
        concurrency: usize,

        /// Print ranked pages with their scores and reasoning.
        #[arg(long, default_value_t = false)]
        explain: bool,

        /// Print the whole outcome as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let layout = DataLayout::new(&cli.data_root);
    info!(
        version = app_version,
        data_root = %layout.root().display(),
        started_at = %Utc::now().to_rfc3339(),
        "filing-qa boot"
    );

    let embedder = build_embedder(&cli.embedding);
    let store = build_store(&cli.store, &layout)?;

    match cli.command {
        Command::Preprocess {
            extractor,
            parser_url,
            parser_api_key,
            tokenizer,
            chunk_size,
            chunk_overlap,
        } => {
            let extractor: Box<dyn DocumentExtractor> = match extractor {
                ExtractorKind::Local => Box::new(LopdfExtractor),
                ExtractorKind::Remote => Box::new(RemoteExtractor::new(ParsingEndpointConfig {
                    endpoint: parser_url,
                    api_key: parser_api_key,
                    poll_interval: DEFAULT_POLL_INTERVAL,
                })),
            };
            let codec = HfTokenCodec::from_file(&tokenizer)
                .with_context(|| format!("loading tokenizer {}", tokenizer.display()))?;
            let chunking = ChunkingConfig {
                chunk_size,
                chunk_overlap,
            };

            let preprocessor = Preprocessor::new(
                extractor.as_ref(),
                &codec,
                embedder.as_ref(),
                store.as_ref(),
                &layout,
                chunking,
            )?;
            let report = preprocessor.run().await?;

            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped report");
            }
            for company in &report.companies {
                println!(
                    "{}: {} pages, {} chunks, {} embeddings",
                    company.company, company.pages, company.chunks, company.embeddings_written
                );
            }
            println!(
                "{} companies indexed, {} skipped at {}",
                report.companies.len(),
                report.skipped.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Answer {
            query,
            kind,
            company,
            companies,
            llm_url,
            llm_api_key,
            llm_model,
            top_k,
            concurrency,
            explain,
            json,
        } => {
            let kind: QuestionKind = kind.parse()?;
            let pages = FsPageSource::new(layout.pages_dir(), layout.markdown_dir());
            let companies = if companies.is_empty() {
                pages.companies()?
            } else {
                companies
            };
            let known = KnownCompanies::new(companies);
            if company.is_none() && known.names().is_empty() {
                bail!("no known companies; run preprocess or pass --companies");
            }

            let model = ChatCompletionsModel::new(ChatEndpointConfig {
                base_url: llm_url,
                api_key: llm_api_key,
                model: llm_model,
                json_mode: true,
            });

            let mut options = PipelineOptions::default();
            options.retrieval.top_k = top_k;
            options.rerank.concurrency = concurrency;

            let pipeline = QaPipeline::new(
                embedder.as_ref(),
                store.as_ref(),
                &model,
                &pages,
                &known,
            )
            .with_options(options);

            let outcome = match &company {
                Some(company) => pipeline.answer_for_company(&query, company, kind).await?,
                None => pipeline.answer(&query, kind).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome, explain);
            }
        }
    }

    Ok(())
}

fn build_embedder(args: &EmbeddingArgs) -> Box<dyn Embedder> {
    match args.embedder {
        EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder {
            dimensions: args
                .embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        }),
        EmbedderKind::Openai => Box::new(OpenAiEmbedder::new(EmbeddingEndpointConfig {
            base_url: args.embedding_url.clone(),
            api_key: args.embedding_api_key.clone(),
            model: args.embedding_model.clone(),
            dimensions: args
                .embedding_dimensions
                .unwrap_or(OPENAI_EMBEDDING_DIMENSIONS),
            max_batch: DEFAULT_EMBEDDING_BATCH,
        })),
    }
}

fn build_store(args: &StoreArgs, layout: &DataLayout) -> anyhow::Result<Box<dyn VectorStore>> {
    Ok(match args.store {
        StoreKind::Local => Box::new(
            LocalVectorStore::open(layout.vectors_dir())
                .with_context(|| format!("opening {}", layout.vectors_dir().display()))?,
        ),
        StoreKind::Qdrant => Box::new(QdrantStore::new(&args.qdrant_url, args.qdrant_prefix.clone())?),
    })
}

fn print_outcome(outcome: &QaOutcome, explain: bool) {
    let answer = &outcome.answer;
    println!("company: {}", outcome.company);
    println!("answer: {}", answer.final_answer);
    println!("pages: {:?}", answer.relevant_pages);
    println!("summary: {}", answer.reasoning_summary);

    if explain {
        println!("analysis:\n{}", answer.step_by_step_analysis);
        println!("retrieved_chunks: {}", outcome.retrieved_chunks);
        for ranked in &outcome.ranked_pages {
            println!(
                "explain: page={} weighted={:.2} vector={:.4} llm={:.2} chunks={}",
                ranked.page.page_num,
                ranked.weighted_score,
                ranked.vector_similarity,
                ranked.llm_score,
                ranked.page.source_chunk_ids.len()
            );
            println!("  reasoning: {}", ranked.llm_reasoning);
        }
    }
}
