use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use code_oracle::agents::{AgentConfig, FinalAnswer};
use code_oracle::llm_client::{read_env, ModelConfig, OpenAiChatModel};
use code_oracle::orchestrator::{AnswerOptions, QueryService};
use code_oracle::rag::{
    build_embedder_from_env, build_span_extractor_from_env, ChunkKind, HashEmbeddings,
    IndexBuilder, IndexConfig, Searcher, SharedEmbeddingsProvider, SharedSpanExtractor,
    SpanBackend, SyntaxSpanExtractor,
};
use tracing::{error, info};

const INDEX_DIR_VARS: [&str; 1] = ["INDEX_DIR"];
const DEFAULT_INDEX_DIR: &str = "index_data";

#[derive(Parser, Debug)]
#[command(
    name = "code-oracle",
    about = "Index a codebase and ask questions about it with a tool-calling agent"
)]
struct Cli {
    /// Index directory to query (defaults to $INDEX_DIR, then ./index_data).
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Use hashed embeddings and tree-sitter spans; no embedding or parse model calls.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and persist an index for a source tree.
    Index {
        /// Root of the codebase to index.
        root: PathBuf,
        /// Where to write the index (defaults to the query index directory).
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// File extensions to include, e.g. --ext rs --ext py (comma lists accepted).
        #[arg(long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,
        /// Maximum files processed concurrently.
        #[arg(long)]
        workers: Option<usize>,
        /// Function span backend: llm or syntax.
        #[arg(long)]
        spans: Option<SpanBackend>,
    },
    /// Answer one question and print the structured answer as JSON.
    Ask {
        question: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Run a raw semantic search against the index.
    Search {
        query: String,
        #[arg(long, default_value = "function")]
        kind: ChunkKind,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// List every indexed file.
    Files,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let index_dir = cli
        .index_dir
        .clone()
        .or_else(|| read_env(&INDEX_DIR_VARS).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_DIR));
    let mut index_config = IndexConfig::from_env().context("Invalid index configuration")?;

    match cli.command {
        Some(Commands::Index {
            root,
            output_dir,
            extensions,
            workers,
            spans,
        }) => {
            index_config = index_config.with_extensions(&extensions);
            if let Some(workers) = workers {
                index_config.max_workers = workers;
            }
            if let Some(spans) = spans {
                index_config.span_backend = spans;
            }
            let output_dir = output_dir.unwrap_or(index_dir);
            run_index(&index_config, cli.offline, &root, &output_dir).await
        }
        Some(Commands::Ask {
            question,
            model,
            max_iterations,
        }) => {
            let service = build_service(index_config, cli.offline)?;
            service.load_index(&index_dir);
            let options = AnswerOptions {
                model,
                max_iterations,
            };
            run_single(&service, &question, options).await
        }
        Some(Commands::Search { query, kind, top_k }) => {
            let embedder = build_embedder(&index_config, cli.offline)?;
            let searcher = Searcher::load(&index_dir, embedder);
            let hits = searcher.search_kind(&query, kind, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
        Some(Commands::Files) => {
            let embedder = build_embedder(&index_config, cli.offline)?;
            let searcher = Searcher::load(&index_dir, embedder);
            for file in searcher.indexed_files() {
                println!("{file}");
            }
            Ok(())
        }
        None => {
            let service = build_service(index_config, cli.offline)?;
            service.load_index(&index_dir);
            run_repl(&service, &index_dir).await
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn build_embedder(config: &IndexConfig, offline: bool) -> anyhow::Result<SharedEmbeddingsProvider> {
    if offline {
        return Ok(Arc::new(HashEmbeddings::default()));
    }
    build_embedder_from_env(config, false).context("Embeddings client initialization failed")
}

fn build_extractor(config: &IndexConfig, offline: bool) -> anyhow::Result<SharedSpanExtractor> {
    if offline {
        return Ok(Arc::new(SyntaxSpanExtractor));
    }
    build_span_extractor_from_env(config, false).context("Span extractor initialization failed")
}

fn build_service(index_config: IndexConfig, offline: bool) -> anyhow::Result<QueryService> {
    let model_config = ModelConfig::from_env().context("Chat model configuration missing")?;
    let chat_model =
        OpenAiChatModel::shared(&model_config).context("Chat model initialization failed")?;

    Ok(QueryService::new(
        chat_model,
        build_embedder(&index_config, offline)?,
        build_extractor(&index_config, offline)?,
        index_config,
        AgentConfig::from_env(),
    ))
}

async fn run_index(
    config: &IndexConfig,
    offline: bool,
    root: &Path,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let builder = IndexBuilder::new(
        build_embedder(config, offline)?,
        build_extractor(config, offline)?,
        config.clone(),
    );
    let summary = builder.build(root, output_dir).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_single(
    service: &QueryService,
    question: &str,
    options: AnswerOptions,
) -> anyhow::Result<()> {
    let answer = service.answer(question, options).await.map_err(|err| {
        error!(%err, "Query failed");
        err
    })?;
    print_answer(&answer)
}

fn print_answer(answer: &FinalAnswer) -> anyhow::Result<()> {
    println!("\n{}\n", serde_json::to_string_pretty(answer)?);
    Ok(())
}

async fn run_repl(service: &QueryService, index_dir: &Path) -> anyhow::Result<()> {
    let status = service.status();
    if status.loaded {
        println!(
            "Loaded index at {} ({} files). Type ':reindex <root>' to rebuild, 'exit' to quit.\n",
            index_dir.display(),
            status.total_files
        );
    } else {
        println!(
            "No index at {}. Type ':reindex <root>' to build one, 'exit' to quit.\n",
            index_dir.display()
        );
    }
    let stdin = io::stdin();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }

        if trimmed.is_empty() {
            continue;
        }

        if trimmed == ":status" {
            println!("{}", serde_json::to_string_pretty(&service.status())?);
            continue;
        }

        if let Some(root) = trimmed.strip_prefix(":reindex") {
            let root = root.trim();
            if root.is_empty() {
                println!("Usage: :reindex <root>");
                continue;
            }
            match service.build_index(Path::new(root), index_dir, None, None).await {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(err) => error!(?err, "Rebuild failed; keeping the current index"),
            }
            continue;
        }

        if let Err(err) = run_single(service, trimmed, AnswerOptions::default()).await {
            println!("Error: {err:#}");
        }
    }

    Ok(())
}
