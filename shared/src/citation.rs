//! Citation tag extraction and reconciliation.
//!
//! The model emits citations inline in its markdown output as `<cite>` tags,
//! either self-closing (`<cite attachment_id="..." page_number="3"/>`) or
//! paired (`<cite ...>quoted text</cite>`). This module splits streamed
//! markdown into alternating markdown/citation segments, parses tag
//! attributes into [`Citation`] values, derives the lookup key used against
//! the verification map, and reconciles citations with verifications.
//!
//! Whether a citation's claimed source text actually appears in the
//! referenced document is decided by the DeepCitation service, not here.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches one complete cite tag, self-closing or paired.
fn cite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<cite\s+[^>]*(?:/>|>[^<]*</cite>)").expect("valid cite regex"))
}

/// Matches the opening of any cite tag; used for cheap detection.
fn cite_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<cite\s+[^>]*(?:/>|>)").expect("valid cite-open regex"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("valid attr regex"))
}

/// A structured reference emitted by the model inside a `<cite>` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(rename = "attachmentId")]
    pub attachment_id: String,
    #[serde(rename = "pageNumber")]
    pub page_number: Option<u32>,
    #[serde(rename = "fullPhrase")]
    pub full_phrase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// One piece of a split model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Markdown(String),
    Citation(String),
}

/// A citation in document order with its lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCitation {
    pub key: String,
    pub citation: Citation,
}

/// Whether the content contains any cite tag, complete or still streaming.
pub fn has_citations(content: &str) -> bool {
    cite_open_regex().is_match(content)
}

/// Split content into alternating markdown and citation segments.
///
/// For any input with N well-formed cite tags this produces exactly N
/// citation segments, and concatenating all segments reproduces the input.
pub fn split_segments(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last_index = 0;

    for m in cite_regex().find_iter(content) {
        if m.start() > last_index {
            segments.push(Segment::Markdown(content[last_index..m.start()].to_string()));
        }
        segments.push(Segment::Citation(m.as_str().to_string()));
        last_index = m.end();
    }

    if last_index < content.len() {
        segments.push(Segment::Markdown(content[last_index..].to_string()));
    }

    segments
}

/// Parse one cite tag into a [`Citation`].
///
/// Attribute names have drifted across model revisions, so parsing is
/// lenient: both `page_number` and `page` are accepted, unknown attributes
/// are ignored, and missing ones default to empty. Paired tags take the
/// inner text as the quoted phrase when no `full_phrase` attribute is set.
pub fn parse_citation(tag: &str) -> Citation {
    let mut attachment_id = String::new();
    let mut page_number = None;
    let mut full_phrase = String::new();
    let mut prefix = None;

    for caps in attr_regex().captures_iter(tag) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        let value = caps.get(2).map_or("", |m| m.as_str());

        match name {
            "attachment_id" => attachment_id = value.to_string(),
            "page_number" | "page" => page_number = value.parse().ok(),
            "full_phrase" | "phrase" => full_phrase = value.to_string(),
            "prefix" => prefix = Some(value.to_string()),
            _ => {}
        }
    }

    if full_phrase.is_empty() {
        if let Some(inner) = paired_inner_text(tag) {
            full_phrase = inner.to_string();
        }
    }

    Citation {
        attachment_id,
        page_number,
        full_phrase,
        prefix,
    }
}

fn paired_inner_text(tag: &str) -> Option<&str> {
    let rest = tag.strip_suffix("</cite>")?;
    let open_end = rest.find('>')?;
    Some(&rest[open_end + 1..])
}

/// Deterministic lookup key for a citation.
///
/// The only property relied on is stability: the same tag contents produce
/// the same key at every call site, so an extraction pass and a later parse
/// of the same tag agree.
pub fn citation_key(citation: &Citation) -> String {
    let mut slug: String = citation
        .full_phrase
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    slug.truncate(32);

    format!(
        "{}:p{}:{}",
        citation.attachment_id,
        citation.page_number.unwrap_or(0),
        slug
    )
}

/// All citations in a model output, in document order.
pub fn extract_citations(content: &str) -> Vec<ExtractedCitation> {
    split_segments(content)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Citation(tag) => {
                let citation = parse_citation(&tag);
                Some(ExtractedCitation {
                    key: citation_key(&citation),
                    citation,
                })
            }
            Segment::Markdown(_) => None,
        })
        .collect()
}

/// Look up the verification for a citation.
///
/// Matches by generated key first; when the key misses (tag contents
/// drifted between extraction and verification), falls back to the
/// verification of the citation at the same document-order position.
pub fn match_verification<'a, V>(
    verifications: &'a HashMap<String, V>,
    key: &str,
    ordered_keys: &[String],
    index: usize,
) -> Option<&'a V> {
    verifications.get(key).or_else(|| {
        ordered_keys
            .get(index)
            .and_then(|fallback| verifications.get(fallback))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG_A: &str = r#"<cite attachment_id="file_1" page_number="2" full_phrase="revenue grew 12%"/>"#;
    const TAG_B: &str = r#"<cite attachment_id="file_2" page="7">net income fell</cite>"#;

    fn joined(segments: &[Segment]) -> String {
        segments
            .iter()
            .map(|s| match s {
                Segment::Markdown(t) => t.as_str(),
                Segment::Citation(t) => t.as_str(),
            })
            .collect()
    }

    #[test]
    fn test_split_partitions_without_loss() {
        let content = format!("Revenue was strong {TAG_A} while costs rose.\n\n{TAG_B} overall.");
        let segments = split_segments(&content);

        let citations = segments
            .iter()
            .filter(|s| matches!(s, Segment::Citation(_)))
            .count();
        assert_eq!(citations, 2);
        assert_eq!(joined(&segments), content);
    }

    #[test]
    fn test_split_no_citations_is_single_markdown() {
        let segments = split_segments("plain **markdown** only");
        assert_eq!(
            segments,
            vec![Segment::Markdown("plain **markdown** only".to_string())]
        );
    }

    #[test]
    fn test_split_adjacent_tags() {
        let content = format!("{TAG_A}{TAG_B}");
        let segments = split_segments(&content);
        assert_eq!(segments.len(), 2);
        assert!(segments
            .iter()
            .all(|s| matches!(s, Segment::Citation(_))));
        assert_eq!(joined(&segments), content);
    }

    #[test]
    fn test_split_tag_at_start_and_end() {
        let content = format!("{TAG_A} middle {TAG_B}");
        let segments = split_segments(&content);
        assert_eq!(segments.len(), 3);
        assert_eq!(joined(&segments), content);
    }

    #[test]
    fn test_parse_self_closing_tag() {
        let citation = parse_citation(TAG_A);
        assert_eq!(citation.attachment_id, "file_1");
        assert_eq!(citation.page_number, Some(2));
        assert_eq!(citation.full_phrase, "revenue grew 12%");
        assert_eq!(citation.prefix, None);
    }

    #[test]
    fn test_parse_paired_tag_takes_inner_text() {
        let citation = parse_citation(TAG_B);
        assert_eq!(citation.attachment_id, "file_2");
        assert_eq!(citation.page_number, Some(7));
        assert_eq!(citation.full_phrase, "net income fell");
    }

    #[test]
    fn test_parse_ignores_unknown_attributes() {
        let citation =
            parse_citation(r#"<cite attachment_id="f" confidence="0.9" page_number="1"/>"#);
        assert_eq!(citation.attachment_id, "f");
        assert_eq!(citation.page_number, Some(1));
    }

    #[test]
    fn test_parse_missing_attributes_default_empty() {
        let citation = parse_citation(r#"<cite foo="bar"/>"#);
        assert_eq!(citation.attachment_id, "");
        assert_eq!(citation.page_number, None);
        assert_eq!(citation.full_phrase, "");
    }

    #[test]
    fn test_citation_key_is_stable_across_parses() {
        let a = parse_citation(TAG_A);
        let b = parse_citation(TAG_A);
        assert_eq!(citation_key(&a), citation_key(&b));
    }

    #[test]
    fn test_citation_key_distinguishes_pages() {
        let mut a = parse_citation(TAG_A);
        let key_a = citation_key(&a);
        a.page_number = Some(3);
        assert_ne!(citation_key(&a), key_a);
    }

    #[test]
    fn test_extract_citations_in_document_order() {
        let content = format!("first {TAG_A} then {TAG_B}");
        let extracted = extract_citations(&content);
        assert_eq!(extracted.len(), 2);
        assert_eq!(extracted[0].citation.attachment_id, "file_1");
        assert_eq!(extracted[1].citation.attachment_id, "file_2");
    }

    #[test]
    fn test_match_by_key() {
        let mut verifications = HashMap::new();
        verifications.insert("k1".to_string(), "v1");
        verifications.insert("k2".to_string(), "v2");
        let ordered = vec!["k1".to_string(), "k2".to_string()];

        assert_eq!(
            match_verification(&verifications, "k2", &ordered, 0),
            Some(&"v2")
        );
    }

    #[test]
    fn test_match_falls_back_to_index_order() {
        let mut verifications = HashMap::new();
        verifications.insert("k1".to_string(), "v1");
        verifications.insert("k2".to_string(), "v2");
        let ordered = vec!["k1".to_string(), "k2".to_string()];

        // Key drifted; position 1 still resolves.
        assert_eq!(
            match_verification(&verifications, "unknown", &ordered, 1),
            Some(&"v2")
        );
    }

    #[test]
    fn test_match_miss_leaves_unverified() {
        let verifications: HashMap<String, &str> = HashMap::new();
        let ordered: Vec<String> = Vec::new();
        assert_eq!(
            match_verification(&verifications, "unknown", &ordered, 0),
            None
        );
    }

    #[test]
    fn test_has_citations_detects_both_forms() {
        assert!(has_citations(TAG_A));
        assert!(has_citations(TAG_B));
        // A tag still streaming in: opening bracket seen, body not yet.
        assert!(has_citations(r#"text <cite attachment_id="f">"#));
        assert!(!has_citations("no tags here"));
    }
}
