//! Two-stage query engine.
//!
//! Stage one (the header pass) searches only header vectors to nominate
//! candidate documents; stage two (the chunk pass) searches passages
//! within those candidates. Both stages run the same hybrid query built
//! from the rewritten, stop-stripped text.
//!
//! An empty candidate set is a normal outcome, not an error. Vector
//! store failures propagate; rewrite failures never reach this module
//! (the rewriter degrades internally).

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::ScoredPassage;
use crate::rewrite::QueryRewriter;
use crate::sparse::to_sparse_vector;
use crate::store::{Filter, QueryRequest, VectorStore};
use crate::tokenize::strip_stops;

/// Per-query overrides for the retrieval tuning in [`Config`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
}

/// The retriever's output: ranked passages plus the assembled context.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub passages: Vec<ScoredPassage>,
    /// Citation-mapped context blocks followed by a `## Sources` list.
    pub context: String,
    /// False when retrieval produced nothing; drives caller fallback.
    pub has_sources: bool,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self {
            passages: Vec::new(),
            context: String::new(),
            has_sources: false,
        }
    }
}

/// Run the two-stage retrieval for `query`.
pub async fn search_notes(
    config: &Config,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    rewriter: &dyn QueryRewriter,
    query: &str,
    options: &QueryOptions,
) -> Result<RetrievedContext> {
    let top_k = options.top_k.unwrap_or(config.retrieval.top_k);
    let min_score = options.min_score.unwrap_or(config.retrieval.min_score);

    let rewritten = rewriter.rewrite(query).await;
    let stripped = strip_stops(&rewritten);
    if stripped.is_empty() {
        return Ok(RetrievedContext::empty());
    }

    let dense = embedder.embed(&stripped).await?;
    let sparse = to_sparse_vector(&stripped, config.sparse.max_terms);

    // Header pass: nominate candidate documents.
    let header_matches = store
        .query(&QueryRequest {
            vector: dense.clone(),
            sparse: Some(sparse.clone()),
            top_k: config.retrieval.header_top_k,
            filter: Filter {
                header: Some(true),
                doc_ids: None,
            },
            include_metadata: true,
        })
        .await
        .with_context(|| "header-pass query failed")?;

    let mut candidates: Vec<String> = Vec::new();
    let mut seen_docs: HashSet<String> = HashSet::new();
    for m in header_matches {
        if m.score < config.retrieval.header_min_score {
            continue;
        }
        let doc_id = match m.metadata {
            Some(meta) if !meta.doc_id.is_empty() => meta.doc_id,
            _ => continue,
        };
        if seen_docs.insert(doc_id.clone()) {
            candidates.push(doc_id);
        }
    }

    if candidates.is_empty() {
        return Ok(RetrievedContext::empty());
    }

    // Chunk pass: rank passages within the candidates.
    let chunk_matches = store
        .query(&QueryRequest {
            vector: dense,
            sparse: Some(sparse),
            top_k: 2 * top_k,
            filter: Filter {
                header: Some(false),
                doc_ids: Some(candidates),
            },
            include_metadata: true,
        })
        .await
        .with_context(|| "chunk-pass query failed")?;

    let mut passages: Vec<ScoredPassage> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    for m in chunk_matches {
        if m.score < min_score || !seen_ids.insert(m.id.clone()) {
            continue;
        }
        let Some(meta) = m.metadata else { continue };
        passages.push(ScoredPassage {
            score: m.score,
            title: meta.title.unwrap_or_else(|| "Untitled".to_string()),
            text: meta.text.unwrap_or_default(),
            doc_id: meta.doc_id,
            url: meta.url,
        });
        if passages.len() == top_k {
            break;
        }
    }

    let (context, has_sources) = format_context(&passages);
    Ok(RetrievedContext {
        passages,
        context,
        has_sources,
    })
}

/// CLI entry point — runs [`search_notes`] and prints the results.
pub async fn run_query(
    config: &Config,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    rewriter: &dyn QueryRewriter,
    query: &str,
    options: &QueryOptions,
) -> Result<()> {
    let retrieved = search_notes(config, store, embedder, rewriter, query, options).await?;

    if !retrieved.has_sources {
        println!("No matching notes.");
        return Ok(());
    }

    for (i, passage) in retrieved.passages.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, passage.score, passage.title);
        if let Some(ref url) = passage.url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            passage.text.replace('\n', " ").trim()
        );
        println!();
    }

    println!("{}", retrieved.context);
    Ok(())
}

// ============ Context formatting ============

/// Characters of the title kept in an in-text citation
/// (`"Kubernetes Operators"` cites as `[Kubernetes Op...]`).
const CITATION_CHARS: usize = 13;

/// Assemble the context blocks and `## Sources` list.
///
/// Each passage becomes a block carrying the document title, a short
/// citation tag, the URL, and the markdown-repaired excerpt. The boolean
/// is false when there are no passages.
pub fn format_context(passages: &[ScoredPassage]) -> (String, bool) {
    if passages.is_empty() {
        return (String::new(), false);
    }

    let mut blocks: Vec<String> = Vec::new();
    for passage in passages {
        blocks.push(format!(
            "Document Title: {}\nIn-Text Citation: [{}]\nDocument URL: {}\nExcerpt: {}\n",
            passage.title,
            citation_abbrev(&passage.title),
            passage.url.as_deref().unwrap_or(""),
            repair_markdown(&passage.text),
        ));
    }

    let mut titles: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for passage in passages {
        if seen.insert(&passage.title) {
            titles.push(&passage.title);
        }
    }
    let sources = titles
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n");

    let context = format!("{}\n## Sources\n{}", blocks.join("\n"), sources);
    (context, true)
}

/// First [`CITATION_CHARS`] characters of the title, with an ellipsis
/// when truncated.
fn citation_abbrev(title: &str) -> String {
    if title.chars().count() <= CITATION_CHARS {
        return title.to_string();
    }
    let head: String = title.chars().take(CITATION_CHARS).collect();
    format!("{}...", head)
}

/// Light markdown repair for downstream rendering. Idempotent on
/// already-correct input.
///
/// - fenced code blocks get a blank line before the opening and after
///   the closing fence;
/// - inline code spans get surrounding spaces;
/// - headings get a preceding blank line.
pub fn repair_markdown(text: &str) -> String {
    static CODE_BEFORE: OnceLock<Regex> = OnceLock::new();
    static CODE_AFTER: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();

    let code_before = CODE_BEFORE.get_or_init(|| Regex::new(r"(\S)(`[^`\n]+`)").unwrap());
    let code_after = CODE_AFTER.get_or_init(|| Regex::new(r"(`[^`\n]+`)(\S)").unwrap());
    let heading = HEADING.get_or_init(|| Regex::new(r"^#{1,6}\s").unwrap());

    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;
    let mut just_closed_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if !in_fence {
                if out.last().map(|l| !l.trim().is_empty()).unwrap_or(false) {
                    out.push(String::new());
                }
                in_fence = true;
            } else {
                in_fence = false;
                just_closed_fence = true;
                out.push(line.to_string());
                continue;
            }
            out.push(line.to_string());
            continue;
        }

        if in_fence {
            out.push(line.to_string());
            continue;
        }

        if just_closed_fence {
            if !line.trim().is_empty() {
                out.push(String::new());
            }
            just_closed_fence = false;
        }

        let padded = code_before.replace_all(line, "${1} ${2}");
        let padded = code_after.replace_all(&padded, "${1} ${2}");

        if heading.is_match(padded.trim_start())
            && out.last().map(|l| !l.trim().is_empty()).unwrap_or(false)
        {
            out.push(String::new());
        }

        out.push(padded.into_owned());
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(title: &str, text: &str) -> ScoredPassage {
        ScoredPassage {
            score: 0.9,
            title: title.to_string(),
            text: text.to_string(),
            doc_id: "d1".to_string(),
            url: Some("https://example.com/a".to_string()),
        }
    }

    #[test]
    fn test_citation_abbrev_truncates() {
        assert_eq!(citation_abbrev("Kubernetes Operators"), "Kubernetes Op...");
        assert_eq!(citation_abbrev("Short"), "Short");
        assert_eq!(citation_abbrev("ThirteenChars"), "ThirteenChars");
    }

    #[test]
    fn test_format_context_blocks_and_sources() {
        let passages = vec![
            passage("Kubernetes Operators", "Operators extend the control plane."),
            passage("Kubernetes Operators", "A second excerpt from the same doc."),
            passage("Raft Explained", "Leader election basics."),
        ];
        let (context, has_sources) = format_context(&passages);
        assert!(has_sources);
        assert!(context.contains("Document Title: Kubernetes Operators"));
        assert!(context.contains("In-Text Citation: [Kubernetes Op...]"));
        assert!(context.contains("Document URL: https://example.com/a"));
        // Sources are unique titles.
        assert!(context.contains("## Sources\n- Kubernetes Operators\n- Raft Explained"));
        assert_eq!(context.matches("- Kubernetes Operators").count(), 1);
    }

    #[test]
    fn test_format_context_empty() {
        let (context, has_sources) = format_context(&[]);
        assert!(!has_sources);
        assert!(context.is_empty());
    }

    #[test]
    fn test_repair_fences_get_blank_lines() {
        let input = "intro line\n```rust\nlet x = 1;\n```\noutro line";
        let out = repair_markdown(input);
        assert_eq!(
            out,
            "intro line\n\n```rust\nlet x = 1;\n```\n\noutro line"
        );
    }

    #[test]
    fn test_repair_inline_code_padding() {
        let out = repair_markdown("use`cargo build`to compile");
        assert_eq!(out, "use `cargo build` to compile");
    }

    #[test]
    fn test_repair_heading_blank_line() {
        let out = repair_markdown("some text\n## Heading\nbody");
        assert_eq!(out, "some text\n\n## Heading\nbody");
    }

    #[test]
    fn test_repair_idempotent() {
        let inputs = [
            "intro\n```\ncode\n```\noutro",
            "a `span` b\n\n# Title\nbody",
            "plain text with no markdown",
        ];
        for input in inputs {
            let once = repair_markdown(input);
            let twice = repair_markdown(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_repair_leaves_fence_contents_alone() {
        let input = "```\nx`y`z\n# not a heading\n```";
        let out = repair_markdown(input);
        assert!(out.contains("x`y`z"));
        assert!(out.contains("# not a heading"));
    }
}
