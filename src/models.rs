//! Core data models used throughout Second Brain.
//!
//! These types represent the reader documents, vectors, and search results
//! that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document snapshot returned by the reader API.
///
/// Immutable for the duration of a sync. The body may arrive as raw HTML
/// (`html_content`), plain text (`content`), both, or neither.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderDoc {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "source_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<TagValue>,
}

/// A tag label from the reader API.
///
/// The API is inconsistent here: tags arrive either as bare strings or as
/// objects carrying a `name` field. Normalized via [`ReaderDoc::tag_names`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Name(String),
    Object { name: String },
}

impl ReaderDoc {
    /// Tag labels as a unified string list.
    pub fn tag_names(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|t| match t {
                TagValue::Name(s) => s.clone(),
                TagValue::Object { name } => name.clone(),
            })
            .collect()
    }
}

/// A weighted bag-of-terms: parallel arrays of 32-bit term ids and
/// strictly positive counts, bounded at construction to a top-K budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<u32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// The unit stored in the vector index: one dense vector, one sparse
/// vector, and the metadata needed to render a search result.
///
/// Record ids follow the `"<docId>-header"` / `"<docId>-chunk-<i>"` scheme.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub sparse: SparseVector,
    pub metadata: RecordMetadata,
}

/// Metadata attached to a [`VectorRecord`].
///
/// Header records carry `summary` and `tags`; chunk records carry `text`
/// and `chunk_id`. Absent fields are omitted from the wire format rather
/// than serialized as nulls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub doc_id: String,
    pub header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A match returned from a vector-store query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<RecordMetadata>,
}

/// A ranked passage surviving both retrieval stages.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub score: f32,
    pub title: String,
    pub text: String,
    pub doc_id: String,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_deserialize_both_shapes() {
        let json = r#"{
            "id": "doc1",
            "title": "T",
            "tags": ["rust", {"name": "systems"}]
        }"#;
        let doc: ReaderDoc = serde_json::from_str(json).unwrap();
        assert_eq!(doc.tag_names(), vec!["rust", "systems"]);
    }

    #[test]
    fn test_missing_optional_fields() {
        let doc: ReaderDoc = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(doc.title.is_none());
        assert!(doc.tags.is_empty());
        assert!(doc.created_at.is_none());
    }

    #[test]
    fn test_metadata_omits_absent_fields() {
        let meta = RecordMetadata {
            doc_id: "d".into(),
            header: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("text").is_none());
        assert!(json.get("chunk_id").is_none());
        assert_eq!(json["doc_id"], "d");
    }
}
