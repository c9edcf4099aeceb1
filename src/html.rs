//! HTML-to-text normalization.
//!
//! A deterministic rule pipeline, not a DOM parse: block-level tags become
//! paragraph breaks, explicit line breaks survive as single newlines, and
//! everything else is stripped. The output invariant is that paragraphs
//! are separated by exactly `\n\n` and no paragraph contains a blank line.

use std::sync::OnceLock;

use regex::Regex;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// Convert marked-up content into paragraph-bounded plain text.
///
/// Rules, in order:
/// 1. `<br>` variants become a single newline.
/// 2. Opening block tags (`p`, `div`, `h1`..`h6`, `li`) become `\n\n`.
/// 3. Closing block tags are removed.
/// 4. Remaining tags are stripped.
/// 5. The common entities are decoded (`&amp;` last, so freshly decoded
///    text is not re-decoded within the same pass).
/// 6. CRLF and CR become LF.
/// 7. Runs of three or more newlines collapse to exactly two.
/// 8. Spaces and tabs preceding a paragraph break are trimmed. Spacing
///    before a single newline survives: `"Hello <br>world"` keeps the
///    space the explicit line break left behind.
/// 9. Leading and trailing whitespace is trimmed.
pub fn html_to_text(html: &str) -> String {
    static BR: OnceLock<Regex> = OnceLock::new();
    static OPEN_BLOCK: OnceLock<Regex> = OnceLock::new();
    static CLOSE_BLOCK: OnceLock<Regex> = OnceLock::new();
    static ANY_TAG: OnceLock<Regex> = OnceLock::new();
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();

    let mut text = re(&BR, r"(?i)<br\s*/?\s*>").replace_all(html, "\n").into_owned();
    text = re(&OPEN_BLOCK, r"(?i)<(?:p|div|h[1-6]|li)(?:\s[^>]*)?>")
        .replace_all(&text, "\n\n")
        .into_owned();
    text = re(&CLOSE_BLOCK, r"(?i)</(?:p|div|h[1-6]|li)\s*>")
        .replace_all(&text, "")
        .into_owned();
    text = re(&ANY_TAG, r"<[^>]+>").replace_all(&text, "").into_owned();

    text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text = text.replace("\r\n", "\n").replace('\r', "\n");
    text = re(&NEWLINES, r"\n{3,}").replace_all(&text, "\n\n").into_owned();
    text = re(&TRAILING, r"[ \t]+\n\n").replace_all(&text, "\n\n").into_owned();

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_and_breaks() {
        let out = html_to_text("<p>Hello <br>world</p><p>Next</p>");
        // The space before the explicit line break survives.
        assert_eq!(out, "Hello \nworld\n\nNext");
        // Exactly one blank line between paragraphs, no leading blanks.
        assert!(!out.starts_with('\n'));
        assert_eq!(out.matches("\n\n").count(), 1);
    }

    #[test]
    fn test_trailing_space_before_paragraph_break_trimmed() {
        let out = html_to_text("<p>Hello </p><p>Next</p>");
        assert_eq!(out, "Hello\n\nNext");
    }

    #[test]
    fn test_headings_and_lists() {
        let out = html_to_text("<h1>Title</h1><ul><li>one</li><li>two</li></ul>");
        assert_eq!(out, "Title\n\none\n\ntwo");
    }

    #[test]
    fn test_attributes_on_block_tags() {
        let out = html_to_text(r#"<div class="note"><p id="a">body</p></div>"#);
        assert_eq!(out, "body");
    }

    #[test]
    fn test_inline_tags_stripped() {
        let out = html_to_text("<p><strong>Bold</strong> and <em>italic</em></p>");
        assert_eq!(out, "Bold and italic");
    }

    #[test]
    fn test_entities_decoded() {
        let out = html_to_text("<p>a &amp; b &lt;c&gt; &quot;d&quot; &#39;e&#39;&nbsp;f</p>");
        assert_eq!(out, "a & b <c> \"d\" 'e' f");
    }

    #[test]
    fn test_crlf_unified() {
        let out = html_to_text("<p>line one\r\nline two\rline three</p>");
        assert_eq!(out, "line one\nline two\nline three");
    }

    #[test]
    fn test_no_triple_newlines() {
        let out = html_to_text("<div><div><p>a</p></div></div><p>b</p>");
        assert!(!out.contains("\n\n\n"));
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "<p>Hello <br>world</p><p>Next</p>",
            "<h2>Header</h2><div>Body text &amp; more.</div>",
            "plain text\n\nwith paragraphs",
        ];
        for input in inputs {
            let once = html_to_text(input);
            let twice = html_to_text(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("<p></p><div></div>"), "");
    }
}
