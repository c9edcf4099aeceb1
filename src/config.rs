//! Configuration parsing and validation.
//!
//! Tuning parameters live in a TOML file (default: `config/brain.toml`).
//! Credentials live exclusively in the environment; see [`Credentials`].
//! The config file is optional — every section has defaults, so a bare
//! environment plus `brain sync` is a working setup.
//!
//! # Scoring metric
//!
//! The vector index scores hybrid matches with a dot product. The dense
//! embeddings are unit-norm, so the dense component of a score behaves like
//! cosine similarity; sparse term counts add on top of that. The
//! `retrieval.min_score` and `retrieval.header_min_score` thresholds are
//! calibrated for that combined metric and should be raised in deployments
//! that weight sparse matches heavily.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sparse: SparseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Lower bound on chunk size; smaller buffers keep accumulating.
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    /// Upper bound on chunk size, except for single unsplittable sentences.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Paragraphs per sliding window when measuring boundary similarity.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Cosine similarity below which adjacent windows start a new chunk.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            window_size: default_window_size(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_min_tokens() -> usize {
    300
}
fn default_max_tokens() -> usize {
    800
}
fn default_window_size() -> usize {
    1
}
fn default_similarity_threshold() -> f32 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Final passage count returned to the caller.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum hybrid score for a chunk match to survive.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Candidate documents requested in the header pass.
    #[serde(default = "default_header_top_k")]
    pub header_top_k: usize,
    /// Minimum hybrid score for a header match to nominate its document.
    #[serde(default = "default_header_min_score")]
    pub header_min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            header_top_k: default_header_top_k(),
            header_min_score: default_header_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    12
}
fn default_min_score() -> f32 {
    0.7
}
fn default_header_top_k() -> usize {
    10
}
fn default_header_min_score() -> f32 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Output dimensionality; shorter native vectors are zero-padded.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SparseConfig {
    /// Top-K term budget for sparse vectors.
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            max_terms: default_max_terms(),
        }
    }
}

fn default_max_terms() -> usize {
    1536
}

/// Load the tuning config, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be <= chunking.max_tokens");
    }
    if config.chunking.window_size == 0 {
        anyhow::bail!("chunking.window_size must be >= 1");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.sparse.max_terms == 0 {
        anyhow::bail!("sparse.max_terms must be >= 1");
    }

    Ok(config)
}

/// Credentials and environment hints, read once at startup.
///
/// | Variable | Required by | Purpose |
/// |----------|-------------|---------|
/// | `PINECONE_API_KEY` | sync, query | vector store auth |
/// | `PINECONE_INDEX` | sync, query | index host, e.g. `my-index-abc.svc.us-east-1.pinecone.io` |
/// | `OPENAI_API_KEY` | sync, query | embedding service auth |
/// | `READWISE_TOKEN` | sync | reader API auth |
/// | `GEMINI_API_KEY` | query (optional) | query rewriter; absent → raw queries |
/// | `LAST_SYNC_TIME` | sync (optional) | default for `--updated-after` |
#[derive(Debug, Clone)]
pub struct Credentials {
    pub readwise_token: Option<String>,
    pub pinecone_api_key: String,
    pub pinecone_index_host: String,
    pub openai_api_key: String,
    pub gemini_api_key: Option<String>,
    pub last_sync_time: Option<String>,
}

impl Credentials {
    /// Read credentials from the environment, failing fast on the two
    /// variables every command needs.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            readwise_token: std::env::var("READWISE_TOKEN").ok(),
            pinecone_api_key: require_env("PINECONE_API_KEY")?,
            pinecone_index_host: require_env("PINECONE_INDEX")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            last_sync_time: std::env::var("LAST_SYNC_TIME").ok(),
        })
    }

    /// The reader token, required for `sync`.
    pub fn require_reader_token(&self) -> Result<&str> {
        self.readwise_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("READWISE_TOKEN environment variable not set"))
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable not set", name))
}
