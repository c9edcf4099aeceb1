//! # Second Brain CLI
//!
//! Two commands mirror the two halves of the system:
//!
//! ```bash
//! brain sync                          # ingest reading history
//! brain sync --updated-after 2026-07-01T00:00:00Z
//! brain sync --force                  # reprocess everything
//! brain query "operator pattern kubernetes"
//! brain query "raft" --top-k 8 --min-score 0.6
//! ```
//!
//! Credentials come from the environment (a `.env` file is honored);
//! tuning lives in an optional TOML file. See [`second_brain::config`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use second_brain::config::{self, Credentials};
use second_brain::embedding::{Embedder, OpenAiEmbedder};
use second_brain::ingest::{self, SyncOptions};
use second_brain::reader::ReaderClient;
use second_brain::rewrite::{GeminiRewriter, NoopRewriter, QueryRewriter};
use second_brain::search::{self, QueryOptions};
use second_brain::store::PineconeStore;
use second_brain::tokenize::Tokenizer;

#[derive(Parser)]
#[command(
    name = "brain",
    about = "Second Brain — retrieval-augmented search over your reading history",
    version
)]
struct Cli {
    /// Path to the tuning configuration file
    #[arg(long, global = true, default_value = "./config/brain.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest reading history into the vector index
    Sync {
        /// Only process documents updated after this ISO-8601 timestamp
        #[arg(long)]
        updated_after: Option<String>,

        /// Bypass existing-id deduplication and reprocess everything
        #[arg(long)]
        force: bool,
    },

    /// Search ingested notes
    Query {
        /// Search query
        query: String,

        /// Number of passages to return
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum passage score
        #[arg(long)]
        min_score: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let creds = Credentials::from_env()?;

    let tokenizer = Arc::new(Tokenizer::new()?);
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        &cfg.embedding,
        creds.openai_api_key.clone(),
        tokenizer.clone(),
    )?);
    let store = PineconeStore::new(creds.pinecone_api_key.clone(), &creds.pinecone_index_host)?;

    match cli.command {
        Commands::Sync {
            updated_after,
            force,
        } => {
            let token = creds.require_reader_token()?;
            let reader = ReaderClient::new(token.to_string())?;
            let options = SyncOptions {
                updated_after: updated_after.or_else(|| creds.last_sync_time.clone()),
                force_update: force,
            };
            ingest::run_sync(&cfg, &reader, &store, embedder, tokenizer, &options).await?;
        }
        Commands::Query {
            query,
            top_k,
            min_score,
        } => {
            let rewriter: Box<dyn QueryRewriter> = match creds.gemini_api_key.clone() {
                Some(key) => Box::new(GeminiRewriter::new(key)?),
                None => Box::new(NoopRewriter),
            };
            let options = QueryOptions { top_k, min_score };
            search::run_query(
                &cfg,
                &store,
                embedder.as_ref(),
                rewriter.as_ref(),
                &query,
                &options,
            )
            .await?;
        }
    }

    Ok(())
}
