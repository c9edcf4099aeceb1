//! Ingestion pipeline orchestration.
//!
//! Coordinates the full sync flow: reader API → normalization → corpus
//! TF-IDF build → per-document header synthesis, semantic chunking,
//! embedding, and ordered upsertion into the vector store.
//!
//! Documents are processed sequentially to bound memory and keep
//! rate-limit handling simple. Within a document the header record is
//! always upserted before any chunk record, and chunks in ascending
//! index order, so a partially written document is detectable by a
//! missing tail rather than a missing head.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chunker::SemanticChunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::header::build_super_header;
use crate::html::html_to_text;
use crate::keywords::{extract_keywords, TfIdfModel};
use crate::models::{ReaderDoc, RecordMetadata, VectorRecord};
use crate::reader::ReaderClient;
use crate::sparse::to_sparse_vector;
use crate::store::{Filter, QueryRequest, VectorStore};
use crate::tokenize::Tokenizer;

/// Token count above which a chunk is truncated before embedding.
const SAFE_EMBED_TOKEN_CAP: usize = 8_000;

/// Character count an over-cap chunk is truncated to.
const TRUNCATE_CHARS: usize = 6_000;

/// `topK` used when enumerating existing ids via a zero-vector query.
const EXISTING_ID_TOP_K: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// ISO-8601 timestamp for incremental mode.
    pub updated_after: Option<String>,
    /// Bypass existing-id deduplication and reprocess everything fetched.
    pub force_update: bool,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub skipped_existing: usize,
    pub skipped_empty: usize,
    pub processed: usize,
    pub failed: usize,
    pub records_upserted: usize,
}

/// CLI entry point: fetch from the reader API, process, print a report.
pub async fn run_sync(
    config: &Config,
    reader: &ReaderClient,
    store: &dyn VectorStore,
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<Tokenizer>,
    options: &SyncOptions,
) -> Result<()> {
    let docs = reader
        .fetch_all(options.updated_after.as_deref())
        .await
        .with_context(|| "failed to fetch documents from the reader API")?;

    let report = sync_documents(config, store, embedder, tokenizer, docs, options).await?;

    println!("sync reader");
    println!("  fetched: {} documents", report.fetched);
    println!("  skipped existing: {}", report.skipped_existing);
    if report.skipped_empty > 0 {
        println!("  skipped empty: {}", report.skipped_empty);
    }
    println!("  processed: {}", report.processed);
    if report.failed > 0 {
        println!("  failed: {}", report.failed);
    }
    println!("  records upserted: {}", report.records_upserted);
    println!("ok");

    Ok(())
}

/// Process an already-fetched document set through both pipeline phases.
///
/// Phase 1 accumulates every candidate body into the TF-IDF corpus and
/// builds it exactly once. Phase 2 walks the candidates again, producing
/// and upserting the header and chunk records per document. A failure
/// inside one document abandons that document and moves on; the sync is
/// reported as partial rather than aborted.
pub async fn sync_documents(
    config: &Config,
    store: &dyn VectorStore,
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<Tokenizer>,
    docs: Vec<ReaderDoc>,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let mut report = SyncReport {
        fetched: docs.len(),
        ..Default::default()
    };

    let existing = if options.force_update {
        HashSet::new()
    } else {
        existing_doc_ids(store, config.embedding.dims).await
    };

    // Phase 1: TF-IDF corpus over every new document body.
    let mut tfidf = TfIdfModel::new();
    let mut candidates: Vec<(ReaderDoc, String)> = Vec::new();

    for doc in docs {
        if existing.contains(&doc.id) {
            report.skipped_existing += 1;
            continue;
        }
        let body = match body_text(&doc) {
            Some(text) => text,
            None => {
                report.skipped_empty += 1;
                continue;
            }
        };
        tfidf.add_document(&doc.id, &body);
        candidates.push((doc, body));
    }
    tfidf.build();

    // Phase 2: per-document processing.
    let chunker = SemanticChunker::new(
        tokenizer.clone(),
        embedder.clone(),
        config.chunking.clone(),
    );

    for (doc, body) in &candidates {
        match process_document(config, store, embedder.as_ref(), &tokenizer, &chunker, &tfidf, doc, body)
            .await
        {
            Ok(upserted) => {
                report.processed += 1;
                report.records_upserted += upserted;
            }
            Err(e) => {
                eprintln!("warning: document {} abandoned: {:#}", doc.id, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Build and upsert all records for one document. Returns the record count.
#[allow(clippy::too_many_arguments)]
async fn process_document(
    config: &Config,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    tokenizer: &Tokenizer,
    chunker: &SemanticChunker,
    tfidf: &TfIdfModel,
    doc: &ReaderDoc,
    body: &str,
) -> Result<usize> {
    let keywords = extract_keywords(tfidf, &doc.id, body).map_err(anyhow::Error::new)?;
    let header_text = build_super_header(doc, &keywords);

    let chunks: Vec<String> = chunker
        .chunk(body)
        .await?
        .into_iter()
        .map(|chunk| {
            if tokenizer.token_len(&chunk) > SAFE_EMBED_TOKEN_CAP {
                chunk.chars().take(TRUNCATE_CHARS).collect()
            } else {
                chunk
            }
        })
        .collect();

    let mut texts = Vec::with_capacity(chunks.len() + 1);
    texts.push(header_text.clone());
    texts.extend(chunks.iter().cloned());
    let mut vectors = embedder.embed_batch(&texts).await?;
    let header_vector = vectors.remove(0);

    let created_at = doc.created_at.map(|dt| dt.to_rfc3339());
    let max_terms = config.sparse.max_terms;

    // The boosted keyword text rides along in the header's sparse vector
    // to concentrate term signal where the header pass looks for it.
    let header_sparse_input = format!("{} {}", header_text, keywords.boosted_text);
    let header_record = VectorRecord {
        id: format!("{}-header", doc.id),
        values: header_vector,
        sparse: to_sparse_vector(&header_sparse_input, max_terms),
        metadata: RecordMetadata {
            doc_id: doc.id.clone(),
            header: true,
            title: doc.title.clone(),
            author: doc.author.clone(),
            url: doc.url.clone(),
            category: doc.category.clone(),
            summary: doc.summary.clone(),
            tags: Some(doc.tag_names()).filter(|t| !t.is_empty()),
            created_at: created_at.clone(),
            ..Default::default()
        },
    };

    // Header first, then chunks in ascending index order, as independent
    // calls. A failure here leaves the document partially written.
    store
        .upsert(std::slice::from_ref(&header_record))
        .await
        .with_context(|| format!("header upsert failed for {}", doc.id))?;
    let mut upserted = 1usize;

    for (i, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
        let record = VectorRecord {
            id: format!("{}-chunk-{}", doc.id, i),
            values: vector,
            sparse: to_sparse_vector(chunk, max_terms),
            metadata: RecordMetadata {
                doc_id: doc.id.clone(),
                header: false,
                title: doc.title.clone(),
                author: doc.author.clone(),
                url: doc.url.clone(),
                category: doc.category.clone(),
                text: Some(chunk.clone()),
                chunk_id: Some(i as i64),
                created_at: created_at.clone(),
                ..Default::default()
            },
        };
        store
            .upsert(std::slice::from_ref(&record))
            .await
            .with_context(|| format!("chunk {} upsert failed for {}", i, doc.id))?;
        upserted += 1;
    }

    Ok(upserted)
}

/// Body text for a document: HTML-derived when available, else the plain
/// content. `None` when the document has no usable body.
pub fn body_text(doc: &ReaderDoc) -> Option<String> {
    if let Some(html) = doc.html_content.as_deref() {
        let text = html_to_text(html);
        if !text.is_empty() {
            return Some(text);
        }
    }
    doc.content
        .as_deref()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Best-effort enumeration of document ids already present in the index.
///
/// Describes the index; if nonempty, issues a zero-vector query at a
/// large `topK` and collects `doc_id` from metadata (falling back to the
/// record-id prefix). Any error degrades to an empty set: deduplication
/// loosens, ingestion proceeds.
async fn existing_doc_ids(store: &dyn VectorStore, dims: usize) -> HashSet<String> {
    let stats = match store.describe_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("warning: could not read index stats, skipping dedup: {:#}", e);
            return HashSet::new();
        }
    };
    if stats.vector_count == 0 {
        return HashSet::new();
    }

    let request = QueryRequest {
        vector: vec![0.0; dims],
        sparse: None,
        top_k: EXISTING_ID_TOP_K,
        filter: Filter::default(),
        include_metadata: true,
    };

    match store.query(&request).await {
        Ok(matches) => matches
            .into_iter()
            .map(|m| match m.metadata {
                Some(meta) if !meta.doc_id.is_empty() => meta.doc_id,
                _ => doc_id_prefix(&m.id).to_string(),
            })
            .collect(),
        Err(e) => {
            eprintln!("warning: existing-id query failed, skipping dedup: {:#}", e);
            HashSet::new()
        }
    }
}

/// Strip the `-header` / `-chunk-<i>` suffix from a record id.
fn doc_id_prefix(record_id: &str) -> &str {
    if let Some(prefix) = record_id.strip_suffix("-header") {
        return prefix;
    }
    if let Some(at) = record_id.rfind("-chunk-") {
        return &record_id[..at];
    }
    record_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_prefix() {
        assert_eq!(doc_id_prefix("abc-header"), "abc");
        assert_eq!(doc_id_prefix("abc-chunk-12"), "abc");
        assert_eq!(doc_id_prefix("abc-def-chunk-0"), "abc-def");
        assert_eq!(doc_id_prefix("bare"), "bare");
    }

    #[test]
    fn test_body_text_prefers_html() {
        let doc: ReaderDoc = serde_json::from_value(serde_json::json!({
            "id": "d",
            "html_content": "<p>From HTML</p>",
            "content": "From plain",
        }))
        .unwrap();
        assert_eq!(body_text(&doc).unwrap(), "From HTML");
    }

    #[test]
    fn test_body_text_falls_back_to_plain() {
        let doc: ReaderDoc = serde_json::from_value(serde_json::json!({
            "id": "d",
            "content": "  Plain body.  ",
        }))
        .unwrap();
        assert_eq!(body_text(&doc).unwrap(), "Plain body.");
    }

    #[test]
    fn test_body_text_none_when_empty() {
        let doc: ReaderDoc = serde_json::from_value(serde_json::json!({
            "id": "d",
            "html_content": "<p></p>",
            "content": "   ",
        }))
        .unwrap();
        assert!(body_text(&doc).is_none());
    }
}
