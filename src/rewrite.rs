//! Query rewriting via an external language model.
//!
//! The rewriter asks the model for a structured expansion of the raw
//! query — an optimized restatement, related topics, and tags — and
//! folds the three fields into one retrieval query. Parsing is
//! deliberately forgiving (models wrap JSON in prose and curly quotes),
//! and every failure mode degrades silently to the raw query: a broken
//! rewriter must never break retrieval.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

/// Single-method capability: substituting [`NoopRewriter`] yields a
/// retriever that searches on raw queries.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    /// Rewrite `query` for retrieval. Infallible by contract; failures
    /// return the input unchanged.
    async fn rewrite(&self, query: &str) -> String;
}

/// Pass-through rewriter.
pub struct NoopRewriter;

#[async_trait]
impl QueryRewriter for NoopRewriter {
    async fn rewrite(&self, query: &str) -> String {
        query.to_string()
    }
}

/// Structured expansion returned by the model.
#[derive(Debug, Deserialize, PartialEq)]
pub struct QueryExpansion {
    #[serde(rename = "Optimized Query")]
    pub optimized_query: String,
    #[serde(rename = "Related Topics")]
    pub related_topics: Vec<String>,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
}

const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Rewriter backed by the Gemini generateContent API.
pub struct GeminiRewriter {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiRewriter {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: GEMINI_MODEL.to_string(),
        })
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("rewriter API error {}", status);
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("rewriter response missing completion text"))
    }
}

#[async_trait]
impl QueryRewriter for GeminiRewriter {
    async fn rewrite(&self, query: &str) -> String {
        if query.trim().is_empty() {
            return query.to_string();
        }

        let prompt = expansion_prompt(query);
        let completion = match self.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                eprintln!("warning: query rewrite failed, using raw query: {}", e);
                return query.to_string();
            }
        };

        match parse_expansion(&completion) {
            Some(expansion) => format_expansion(&expansion),
            None => query.to_string(),
        }
    }
}

fn expansion_prompt(query: &str) -> String {
    format!(
        "Rewrite the following search query for retrieval over a personal \
         reading archive. Respond with a single JSON object containing \
         exactly these keys:\n\
         \"Optimized Query\": a longer, technically specific restatement \
         that preserves the original intent;\n\
         \"Related Topics\": a list of synonyms and adjacent concepts;\n\
         \"Tags\": a list of precise technical labels.\n\
         No other text.\n\nQuery: {}",
        query
    )
}

/// Extract and parse the first brace-delimited object in a completion.
///
/// Tolerates prose around the object and curly quotes inside it. Returns
/// `None` on any parse failure or missing field.
pub fn parse_expansion(completion: &str) -> Option<QueryExpansion> {
    static OBJECT_RE: OnceLock<Regex> = OnceLock::new();
    let object_re = OBJECT_RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap());

    let object = object_re.find(completion)?.as_str();
    let normalized = object
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    serde_json::from_str(&normalized).ok()
}

/// Three labeled lines, blank-line separated.
pub fn format_expansion(expansion: &QueryExpansion) -> String {
    format!(
        "Optimized Query: {}\n\nRelated Topics: {}\n\nTags: {}",
        expansion.optimized_query,
        expansion.related_topics.join(", "),
        expansion.tags.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_object() {
        let completion = r#"{"Optimized Query": "kubernetes operator pattern internals",
                             "Related Topics": ["controllers", "reconciliation"],
                             "Tags": ["kubernetes", "operators"]}"#;
        let expansion = parse_expansion(completion).unwrap();
        assert_eq!(expansion.optimized_query, "kubernetes operator pattern internals");
        assert_eq!(expansion.related_topics.len(), 2);
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let completion = "Sure! Here is the JSON you asked for:\n\
                          {\"Optimized Query\": \"q\", \"Related Topics\": [], \"Tags\": []}\n\
                          Let me know if you need anything else.";
        assert!(parse_expansion(completion).is_some());
    }

    #[test]
    fn test_parse_curly_quotes() {
        let completion = "{\u{201C}Optimized Query\u{201D}: \u{201C}raft log replication\u{201D}, \
                          \u{201C}Related Topics\u{201D}: [], \u{201C}Tags\u{201D}: []}";
        let expansion = parse_expansion(completion).unwrap();
        assert_eq!(expansion.optimized_query, "raft log replication");
    }

    #[test]
    fn test_parse_missing_field_fails() {
        let completion = r#"{"Optimized Query": "q", "Tags": []}"#;
        assert!(parse_expansion(completion).is_none());
    }

    #[test]
    fn test_parse_no_braces_fails() {
        assert!(parse_expansion("no json here at all").is_none());
    }

    #[test]
    fn test_format_expansion() {
        let expansion = QueryExpansion {
            optimized_query: "q".into(),
            related_topics: vec!["a".into(), "b".into()],
            tags: vec!["t".into()],
        };
        assert_eq!(
            format_expansion(&expansion),
            "Optimized Query: q\n\nRelated Topics: a, b\n\nTags: t"
        );
    }

    #[tokio::test]
    async fn test_noop_passthrough() {
        assert_eq!(NoopRewriter.rewrite("plain query").await, "plain query");
    }
}
