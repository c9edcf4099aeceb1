//! Vector store abstraction and implementations.
//!
//! The [`VectorStore`] trait covers the three operations the pipeline
//! needs: index stats, record upsert, and filtered hybrid query. The
//! production backend is [`PineconeStore`] over the index REST API;
//! [`MemoryStore`] is a brute-force in-process implementation used by
//! tests, scoring with the same dot-product hybrid metric.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::models::{QueryMatch, SparseVector, VectorRecord};

/// Metadata filter for queries: boolean equality on the header flag and
/// `$in` membership on document ids. Both clauses combine with AND.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub header: Option<bool>,
    pub doc_ids: Option<Vec<String>>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.doc_ids.is_none()
    }
}

/// A hybrid query against the index.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub sparse: Option<SparseVector>,
    pub top_k: usize,
    pub filter: Filter,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub vector_count: u64,
}

/// Capability trait over hybrid (dense + sparse) vector indexes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn describe_stats(&self) -> Result<IndexStats>;

    /// Insert or replace records by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Hybrid similarity query; scores are dot products.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>>;
}

// ============ Pinecone ============

/// Vector store backed by a Pinecone serverless index.
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl PineconeStore {
    /// `index_host` is the index's data-plane host, with or without the
    /// `https://` prefix.
    pub fn new(api_key: String, index_host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url = if index_host.starts_with("http") {
            index_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", index_host.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("vector store request failed: {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("vector store error {} on {}: {}", status, path, body_text);
        }

        response
            .json()
            .await
            .with_context(|| format!("vector store returned invalid JSON on {}", path))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn describe_stats(&self) -> Result<IndexStats> {
        let json = self
            .post("/describe_index_stats", serde_json::json!({}))
            .await?;
        let vector_count = json
            .get("totalVectorCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(IndexStats { vector_count })
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let vectors: Vec<serde_json::Value> = records.iter().map(record_json).collect();
        self.post("/vectors/upsert", serde_json::json!({ "vectors": vectors }))
            .await?;
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let mut body = serde_json::json!({
            "vector": request.vector,
            "topK": request.top_k,
            "includeMetadata": request.include_metadata,
        });

        if let Some(ref sparse) = request.sparse {
            if !sparse.is_empty() {
                body["sparseVector"] = sparse_json(sparse);
            }
        }
        if let Some(filter) = filter_json(&request.filter) {
            body["filter"] = filter;
        }

        let json = self.post("/query", body).await?;
        let matches = json
            .get("matches")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(matches
            .into_iter()
            .filter_map(|m| {
                let id = m.get("id")?.as_str()?.to_string();
                let score = m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
                let metadata = m
                    .get("metadata")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                Some(QueryMatch {
                    id,
                    score,
                    metadata,
                })
            })
            .collect())
    }
}

fn record_json(record: &VectorRecord) -> serde_json::Value {
    let mut value = serde_json::json!({
        "id": record.id,
        "values": record.values,
        "metadata": record.metadata,
    });
    if !record.sparse.is_empty() {
        value["sparseValues"] = sparse_json(&record.sparse);
    }
    value
}

fn sparse_json(sparse: &SparseVector) -> serde_json::Value {
    // Sparse values go over the wire as floats.
    let values: Vec<f32> = sparse.values.iter().map(|&v| v as f32).collect();
    serde_json::json!({
        "indices": sparse.indices,
        "values": values,
    })
}

fn filter_json(filter: &Filter) -> Option<serde_json::Value> {
    if filter.is_empty() {
        return None;
    }
    let mut clauses = serde_json::Map::new();
    if let Some(header) = filter.header {
        clauses.insert("header".to_string(), serde_json::json!({ "$eq": header }));
    }
    if let Some(ref ids) = filter.doc_ids {
        clauses.insert("doc_id".to_string(), serde_json::json!({ "$in": ids }));
    }
    Some(serde_json::Value::Object(clauses))
}

// ============ In-memory store ============

/// Brute-force in-process [`VectorStore`] for tests.
///
/// Scores with the same metric the production index uses: dense dot
/// product plus the dot product of overlapping sparse terms.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored record ids, for test assertions.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn hybrid_score(request: &QueryRequest, record: &VectorRecord) -> f32 {
    let dense: f32 = request
        .vector
        .iter()
        .zip(record.values.iter())
        .map(|(a, b)| a * b)
        .sum();

    let sparse = match request.sparse {
        Some(ref qs) => {
            let mut by_index: HashMap<u32, u32> = HashMap::new();
            for (i, v) in record.sparse.indices.iter().zip(record.sparse.values.iter()) {
                by_index.insert(*i, *v);
            }
            qs.indices
                .iter()
                .zip(qs.values.iter())
                .filter_map(|(i, v)| by_index.get(i).map(|rv| (*v * *rv) as f32))
                .sum()
        }
        None => 0.0,
    };

    dense + sparse
}

fn matches_filter(filter: &Filter, record: &VectorRecord) -> bool {
    if let Some(header) = filter.header {
        if record.metadata.header != header {
            return false;
        }
    }
    if let Some(ref ids) = filter.doc_ids {
        if !ids.iter().any(|id| *id == record.metadata.doc_id) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn describe_stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            vector_count: self.len() as u64,
        })
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let stored = self.records.read().unwrap();
        let mut matches: Vec<QueryMatch> = stored
            .values()
            .filter(|r| matches_filter(&request.filter, r))
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: hybrid_score(request, r),
                metadata: request.include_metadata.then(|| r.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(request.top_k);
        Ok(matches)
    }
}
