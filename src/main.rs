use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::path::PathBuf;

use sutra_saradhi::corpus::{load_corpus, CorpusConfig};
use sutra_saradhi::database::{QdrantClient, QdrantConfig};
use sutra_saradhi::embeddings::Embedding;
use sutra_saradhi::gemini::{GeminiClient, GeminiConfig};
use sutra_saradhi::index::{Retrieved, VerseIndex, VerseStore};
use sutra_saradhi::rag::{QueryPipeline, DEFAULT_TOP_K};
use sutra_saradhi::server::{self, ServerConfig};

/// Question answering over the Bhagavad Gita and the Patanjali Yoga Sutras
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Where the flat index is persisted
    #[arg(long, global = true, default_value = "combined_verse_index.json")]
    index_path: PathBuf,

    /// Ignore any persisted index or existing collection
    #[arg(long, global = true)]
    rebuild: bool,

    /// Verses retrieved per query
    #[arg(long, global = true, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Serve the web form (default)
    Serve,
    /// Ask questions on the terminal
    Ask,
    /// Build the index and exit
    BuildIndex,
}

/// Where verses are searched
enum VerseBackend {
    Flat(VerseIndex),
    Qdrant(QdrantClient),
}

impl VerseStore for VerseBackend {
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<Retrieved>> {
        match self {
            VerseBackend::Flat(index) => index.search(query, limit).await,
            VerseBackend::Qdrant(client) => client.search(query, limit).await,
        }
    }
}

/// Only `serve` reads the listener settings
fn server_config_for(command: Command) -> Result<Option<ServerConfig>> {
    match command {
        Command::Serve => Ok(Some(ServerConfig::from_env()?)),
        Command::Ask | Command::BuildIndex => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve);

    // Load configuration from environment
    let corpus_config = CorpusConfig::from_env();
    let gemini_config = GeminiConfig::from_env().context("Missing GEMINI_API_KEY")?;
    let server_config = server_config_for(command)?;

    info!("Loading datasets...");
    let records = load_corpus(&corpus_config.sources()).context("Failed to load datasets")?;

    let gemini = GeminiClient::new(gemini_config);

    let backend = match QdrantConfig::from_env() {
        Some(qdrant_config) => {
            let qdrant =
                QdrantClient::new(qdrant_config).context("Failed to initialize Qdrant client")?;
            qdrant
                .prepare(&records, &gemini, args.rebuild)
                .await
                .context("Failed to prepare Qdrant collection")?;
            VerseBackend::Qdrant(qdrant)
        }
        None => {
            let index = VerseIndex::load_or_build(&args.index_path, records, &gemini, args.rebuild)
                .await
                .context("Failed to build index")?;
            VerseBackend::Flat(index)
        }
    };

    let pipeline = QueryPipeline::new(gemini, backend).with_top_k(args.top_k);

    match command {
        Command::Serve => {
            let config = server_config.context("Missing server configuration")?;
            server::serve(config, pipeline).await
        }
        Command::Ask => pipeline
            .run_query_loop()
            .await
            .context("Error in query loop"),
        Command::BuildIndex => {
            info!("Index ready");
            Ok(())
        }
    }
}
