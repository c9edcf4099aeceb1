//! Super-header synthesis.
//!
//! Each document gets a single bounded text blob combining its metadata
//! with the extracted keyword lists. The header is embedded as the
//! document's representative vector, so it concentrates the signal the
//! header-pass search matches against.

use crate::keywords::KeywordSet;
use crate::models::ReaderDoc;

/// Upper bound on the whole header.
pub const HEADER_MAX_CHARS: usize = 1800;

const TITLE_MAX: usize = 100;
const AUTHOR_MAX: usize = 100;
const TAGS_MAX: usize = 100;
const SUMMARY_MAX: usize = 1000;

/// Assemble the super-header for a document.
///
/// Sections appear in a fixed order, each labeled and separated by a
/// blank line: Title, Author, Tags (if any), Summary (if any), RAKE
/// Keywords, TF-IDF Terms. Sections are truncated to their own bounds
/// and the whole to [`HEADER_MAX_CHARS`].
pub fn build_super_header(doc: &ReaderDoc, keywords: &KeywordSet) -> String {
    let mut sections: Vec<String> = Vec::new();

    let title = doc.title.as_deref().unwrap_or("Untitled");
    sections.push(format!("Title: {}", truncate_chars(title, TITLE_MAX)));

    let author = doc.author.as_deref().unwrap_or("Unknown");
    sections.push(format!("Author: {}", truncate_chars(author, AUTHOR_MAX)));

    let tags = doc.tag_names();
    if !tags.is_empty() {
        sections.push(format!(
            "Tags: {}",
            truncate_chars(&tags.join(", "), TAGS_MAX)
        ));
    }

    if let Some(summary) = doc.summary.as_deref() {
        if !summary.trim().is_empty() {
            sections.push(format!(
                "Summary: {}",
                truncate_chars(summary.trim(), SUMMARY_MAX)
            ));
        }
    }

    sections.push(format!("RAKE Keywords: {}", join_terms(&keywords.rake)));
    sections.push(format!("TF-IDF Terms: {}", join_terms(&keywords.tfidf)));

    truncate_chars(&sections.join("\n\n"), HEADER_MAX_CHARS)
}

fn join_terms(terms: &[(String, f64)]) -> String {
    terms
        .iter()
        .map(|(term, _)| term.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Truncate to at most `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagValue;

    fn doc(title: &str, author: Option<&str>, summary: Option<&str>, tags: &[&str]) -> ReaderDoc {
        serde_json::from_value(serde_json::json!({
            "id": "doc1",
            "title": title,
            "author": author,
            "summary": summary,
        }))
        .map(|mut d: ReaderDoc| {
            d.tags = tags.iter().map(|t| TagValue::Name(t.to_string())).collect();
            d
        })
        .unwrap()
    }

    fn keyword_set() -> KeywordSet {
        KeywordSet {
            rake: vec![("operator pattern".into(), 4.0), ("control loop".into(), 3.0)],
            tfidf: vec![("kubernetes".into(), 2.1), ("reconcile".into(), 1.4)],
            boosted_text: String::new(),
        }
    }

    #[test]
    fn test_sections_in_order() {
        let header = build_super_header(
            &doc("Kubernetes Operators", Some("Jane Doe"), Some("A summary."), &["k8s"]),
            &keyword_set(),
        );

        let title_at = header.find("Title: Kubernetes Operators").unwrap();
        let author_at = header.find("Author: Jane Doe").unwrap();
        let tags_at = header.find("Tags: k8s").unwrap();
        let summary_at = header.find("Summary: A summary.").unwrap();
        let rake_at = header.find("RAKE Keywords: operator pattern, control loop").unwrap();
        let tfidf_at = header.find("TF-IDF Terms: kubernetes, reconcile").unwrap();

        assert!(title_at < author_at);
        assert!(author_at < tags_at);
        assert!(tags_at < summary_at);
        assert!(summary_at < rake_at);
        assert!(rake_at < tfidf_at);
        // Blank line between sections.
        assert!(header.contains("Kubernetes Operators\n\nAuthor:"));
    }

    #[test]
    fn test_optional_sections_omitted() {
        let header = build_super_header(&doc("T", None, None, &[]), &keyword_set());
        assert!(!header.contains("Tags:"));
        assert!(!header.contains("Summary:"));
        assert!(header.contains("Author: Unknown"));
    }

    #[test]
    fn test_section_bounds() {
        let long_title = "t".repeat(400);
        let long_summary = "s".repeat(3000);
        let header = build_super_header(
            &doc(&long_title, Some("A"), Some(&long_summary), &[]),
            &keyword_set(),
        );

        let title_line = header.lines().next().unwrap();
        assert_eq!(title_line.len(), "Title: ".len() + 100);
        assert!(header.chars().count() <= HEADER_MAX_CHARS);
    }

    #[test]
    fn test_total_bound() {
        let summary = "word ".repeat(500);
        let header = build_super_header(
            &doc(&"t".repeat(100), Some(&"a".repeat(100)), Some(&summary), &["x"]),
            &keyword_set(),
        );
        assert!(header.chars().count() <= HEADER_MAX_CHARS);
    }
}
