//! Dense embedding client.
//!
//! Defines the [`Embedder`] trait and the [`OpenAiEmbedder`] implementation,
//! which calls the embeddings API with retry, backoff, and context-overflow
//! recovery: inputs the service rejects for length are bisected at a
//! sentence boundary, the halves embedded in parallel, and the results
//! averaged component-wise. Vectors shorter than the configured dimension
//! are right-padded with zeros.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx signalling a context-length overrun → handled by bisection
//! - Other HTTP 4xx → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::tokenize::{sentence_split_point, Tokenizer};

/// Hard context limit of the embedding model, in tokens.
pub const CONTEXT_LIMIT: usize = 8191;

/// Summed token budget for one batched embedding call.
pub const BATCH_TOKEN_BUDGET: usize = 8192 - 32;

/// Error from a single embeddings API call.
#[derive(Debug)]
pub enum EmbedError {
    /// The service rejected the input for exceeding its context window.
    /// Recoverable by bisection; never surfaced to callers.
    ContextOverflow,
    /// Anything else: auth, quota exhaustion after retries, malformed
    /// responses. Propagated; the current document is abandoned.
    Fatal(anyhow::Error),
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::ContextOverflow => write!(f, "embedding input exceeds context limit"),
            EmbedError::Fatal(e) => write!(f, "embedding failed: {}", e),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Capability trait over dense embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a single text, recovering from context overflows internally.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embedder backed by the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
    tokenizer: Arc<Tokenizer>,
}

impl OpenAiEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: String,
        tokenizer: Arc<Tokenizer>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            tokenizer,
        })
    }

    /// One embeddings API call with retry/backoff.
    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EmbedError::Fatal(e.into()))?;
                        return parse_embeddings_response(&json).map_err(EmbedError::Fatal);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.is_client_error() && is_context_overflow(&body_text) {
                        return Err(EmbedError::ContextOverflow);
                    }
                    return Err(EmbedError::Fatal(anyhow!(
                        "embeddings API error {}: {}",
                        status,
                        body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(EmbedError::Fatal(
            last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")),
        ))
    }

    /// Embed one text, recursing on context overflows: split at the latest
    /// sentence boundary before the midpoint, embed both halves in
    /// parallel, and average the results.
    fn safe_embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(async move {
            match self.request_embeddings(&[text.to_string()]).await {
                Ok(mut vecs) => {
                    let v = vecs.pop().ok_or_else(|| anyhow!("empty embedding response"))?;
                    Ok(pad_to(v, self.dims))
                }
                Err(EmbedError::ContextOverflow) => {
                    let at = sentence_split_point(text);
                    if at == 0 || at >= text.len() {
                        bail!("input exceeds embedding context limit and cannot be split");
                    }
                    let (left, right) = text.split_at(at);
                    let (left, right) = (left.trim(), right.trim());
                    if left.is_empty() || right.is_empty() {
                        bail!("input exceeds embedding context limit and cannot be split");
                    }
                    let (l, r) = tokio::try_join!(self.safe_embed(left), self.safe_embed(right))?;
                    Ok(average(&l, &r))
                }
                Err(EmbedError::Fatal(e)) => Err(e),
            }
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.safe_embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut batch: Vec<(usize, String)> = Vec::new();
        let mut batch_tokens = 0usize;

        for (i, text) in texts.iter().enumerate() {
            let tokens = self.tokenizer.token_len(text);

            if tokens > BATCH_TOKEN_BUDGET {
                self.flush_batch(&mut batch, &mut batch_tokens, &mut out).await?;
                out[i] = Some(self.safe_embed(text).await?);
                continue;
            }

            if batch_tokens + tokens > BATCH_TOKEN_BUDGET {
                self.flush_batch(&mut batch, &mut batch_tokens, &mut out).await?;
            }

            batch.push((i, text.clone()));
            batch_tokens += tokens;
        }

        self.flush_batch(&mut batch, &mut batch_tokens, &mut out).await?;

        out.into_iter()
            .map(|v| v.ok_or_else(|| anyhow!("missing embedding in batch result")))
            .collect()
    }
}

impl OpenAiEmbedder {
    async fn flush_batch(
        &self,
        batch: &mut Vec<(usize, String)>,
        batch_tokens: &mut usize,
        out: &mut [Option<Vec<f32>>],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let items = std::mem::take(batch);
        *batch_tokens = 0;

        let inputs: Vec<String> = items.iter().map(|(_, t)| t.clone()).collect();
        match self.request_embeddings(&inputs).await {
            Ok(vecs) => {
                if vecs.len() != items.len() {
                    bail!(
                        "embeddings API returned {} vectors for {} inputs",
                        vecs.len(),
                        items.len()
                    );
                }
                for ((i, _), v) in items.iter().zip(vecs) {
                    out[*i] = Some(pad_to(v, self.dims));
                }
            }
            Err(EmbedError::ContextOverflow) => {
                // The summed budget was wrong for this model; degrade to
                // per-item embedding with bisection.
                for (i, text) in &items {
                    out[*i] = Some(self.safe_embed(text).await?);
                }
            }
            Err(EmbedError::Fatal(e)) => return Err(e),
        }
        Ok(())
    }
}

/// Parse the embeddings API response JSON, returning vectors in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid embeddings response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

/// True if an error body describes a context-length overrun.
fn is_context_overflow(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
}

/// Right-pad `vec` with zeros up to `dims`.
pub fn pad_to(mut vec: Vec<f32>, dims: usize) -> Vec<f32> {
    if vec.len() < dims {
        vec.resize(dims, 0.0);
    }
    vec
}

/// Component-wise average of two equal-length vectors.
pub fn average(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
