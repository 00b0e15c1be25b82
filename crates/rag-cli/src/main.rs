//! RAG CLI - Command-line interface for the hybrid retrieval engine.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use rag_core::{GenerationStore, RagConfig, RagError, RerankMode, SearchResults};
use rag_embed::{embedder_from_config, scorer_from_config};
use rag_index::MixedScriptTokenizer;
use rag_ingest::IngestPipeline;
use rag_query::{build_context, Capabilities, RetrieverHandle, DEFAULT_CONTEXT_CHARS};
use rag_store::SqliteStore;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Characters of chunk text shown per hit.
const SNIPPET_CHARS: usize = 240;

/// RAG - Hybrid dense + lexical retrieval with reranking
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./rag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Generation file, overrides `index.path`
    #[arg(short, long, global = true)]
    index: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a directory of .txt/.md documents and publish a new generation
    Ingest {
        /// Source directory (default: `index.source_dir`)
        dir: Option<PathBuf>,
    },

    /// Search the published generation
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Print assembled context with references
        #[arg(long)]
        context: bool,
    },

    /// Show statistics of the published generation
    Stats,

    /// Interactive search; `:reload` swaps in the latest generation
    Repl {
        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> CliResult<RagConfig> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    if let Some(index) = &cli.index {
        config.index.path = index.clone();
    }
    Ok(config)
}

fn capabilities(config: &RagConfig) -> CliResult<Capabilities> {
    Ok(Capabilities {
        embedder: embedder_from_config(&config.embedding)?,
        tokenizer: Arc::new(MixedScriptTokenizer::new()),
        scorer: scorer_from_config(&config.reranker),
    })
}

fn top_k(requested: Option<usize>) -> CliResult<Option<NonZeroUsize>> {
    match requested {
        None => Ok(None),
        Some(k) => match NonZeroUsize::new(k) {
            Some(k) => Ok(Some(k)),
            None => Err(RagError::invalid_config("top-k must be >= 1").into()),
        },
    }
}

/// Search with an explicit result count, or the configured default.
async fn run_query(
    handle: &RetrieverHandle,
    text: &str,
    k: Option<NonZeroUsize>,
) -> rag_core::Result<SearchResults> {
    match k {
        Some(k) => handle.search(text, k).await,
        None => handle.search_default(text).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli)?;
    let store = Arc::new(SqliteStore::new(&config.index.path));

    match cli.command {
        Commands::Ingest { dir } => {
            let dir = dir.unwrap_or_else(|| config.index.source_dir.clone());
            ingest(&config, store, dir).await?;
        }
        Commands::Search {
            query,
            top_k: k,
            json,
            context,
        } => {
            let k = top_k(k)?;
            let handle = open_handle(&config, store).await?;
            let results = run_query(&handle, &query, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
            if context {
                print_context(&results);
            }
        }
        Commands::Stats => {
            stats(store.as_ref()).await?;
        }
        Commands::Repl { top_k: k } => {
            let k = top_k(k)?;
            let handle = open_handle(&config, store.clone()).await?;
            repl(&handle, store.as_ref(), k).await?;
        }
    }

    Ok(())
}

async fn open_handle(config: &RagConfig, store: Arc<SqliteStore>) -> CliResult<RetrieverHandle> {
    let retriever_config = config.search.validate()?;
    Ok(RetrieverHandle::open(store, capabilities(config)?, retriever_config).await?)
}

async fn ingest(config: &RagConfig, store: Arc<SqliteStore>, dir: PathBuf) -> CliResult<()> {
    let chunk_config = config.chunking.validate()?;
    let pipeline = IngestPipeline::new(
        embedder_from_config(&config.embedding)?,
        Arc::new(MixedScriptTokenizer::new()),
        store,
        chunk_config,
        config.embedding.batch_size,
    );

    println!("Ingesting documents from {}...", dir.display());
    let summary = pipeline.run(&dir).await?;

    if summary.published {
        println!(
            "Published {} chunks from {} document(s) (dim={}) to {}",
            summary.chunks, summary.documents, summary.dimension, summary.location
        );
    } else {
        println!(
            "Nothing published: {} document(s) produced no chunks",
            summary.documents
        );
    }
    if summary.skipped > 0 {
        println!("Skipped {} unreadable file(s)", summary.skipped);
    }

    Ok(())
}

async fn stats(store: &dyn GenerationStore) -> CliResult<()> {
    match store.info().await? {
        Some(info) => {
            println!("Generation: {}", store.location());
            println!("  Chunks:       {}", info.chunks);
            println!("  Documents:    {}", info.documents);
            println!("  Dimension:    {}", info.dimension);
            println!("  Published at: {} (unix ms)", info.published_at);
        }
        None => println!("No generation published at {}", store.location()),
    }
    Ok(())
}

async fn repl(
    handle: &RetrieverHandle,
    store: &dyn GenerationStore,
    k: Option<NonZeroUsize>,
) -> CliResult<()> {
    println!("Type a query, :reload, :stats or :quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"rag> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":stats" => stats(store).await?,
            ":reload" => match handle.reload().await {
                Ok(report) => println!("Reloaded: {} chunks", report.chunks),
                Err(e) => eprintln!("Reload failed, still serving previous generation: {}", e),
            },
            text => match run_query(handle, text, k).await {
                Ok(results) => print_results(&results),
                Err(e) => eprintln!("Error: {}", e),
            },
        }
    }

    Ok(())
}

fn print_results(results: &SearchResults) {
    let rerank = match results.rerank {
        RerankMode::Scored => "reranked".to_string(),
        RerankMode::SafeMode => "reranked (safe mode)".to_string(),
        RerankMode::Identity(reason) => format!("fusion order ({:?})", reason),
    };

    println!(
        "{} result(s) for {:?} in {}ms, {}",
        results.total_results, results.query, results.latency_ms, rerank
    );

    for hit in &results.results {
        let page = hit
            .metadata
            .page
            .map(|p| format!(", page {}", p))
            .unwrap_or_default();
        let rerank_score = hit
            .rerank_score
            .map(|s| format!(", rerank {:.4}", s))
            .unwrap_or_default();

        println!(
            "\n{}. {} #{}{} (score {:.4}{})",
            hit.rank, hit.metadata.title, hit.metadata.chunk_index, page, hit.score, rerank_score
        );
        println!("   {}", snippet(&hit.text));
    }
}

fn print_context(results: &SearchResults) {
    let context = build_context(&results.results, DEFAULT_CONTEXT_CHARS);
    println!("\n---\n{}", context.numbered());
    println!("\n{}", context.reference_lines());
}

fn snippet(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    }
}
