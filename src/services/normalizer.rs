// src/services/normalizer.rs

//! Deterministic text extraction.
//!
//! A pure function from (raw body, content type, target options) to
//! `{ text, html? }`. Two runs over identical inputs produce byte-identical
//! text; the diff engine and the content hash both depend on that.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use ego_tree::NodeId;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, Result};
use crate::models::{AggregationMode, SnapshotMode, TargetSpec, WhitespaceMode};
use crate::pipeline::event_id::stable_stringify;

/// Coarse content classification driving the normalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Json,
    Xml,
    Html,
    Other,
}

/// Classify by Content-Type, sniffing the body only when the header is absent.
pub fn classify_content(content_type: Option<&str>, body: &[u8]) -> ContentClass {
    if let Some(ct) = content_type {
        let ct = ct.to_lowercase();
        if ct.contains("json") {
            return ContentClass::Json;
        }
        if ct.contains("xml") {
            return ContentClass::Xml;
        }
        if ct.contains("html") {
            return ContentClass::Html;
        }
        return ContentClass::Other;
    }

    let head = String::from_utf8_lossy(&body[..body.len().min(512)]);
    let trimmed = head.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        ContentClass::Json
    } else if trimmed.starts_with("<?xml") {
        ContentClass::Xml
    } else if trimmed.starts_with('<') {
        ContentClass::Html
    } else {
        ContentClass::Other
    }
}

/// Output of normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub mode: SnapshotMode,
    pub text: String,
    pub html: Option<String>,
}

/// Normalize a response body according to the target's extraction options.
pub fn normalize(
    body: &[u8],
    content_type: Option<&str>,
    spec: &TargetSpec,
) -> Result<Normalized> {
    let class = classify_content(content_type, body);

    let normalized = if !spec.fields.is_empty() {
        normalize_fields(body, spec)?
    } else if class == ContentClass::Json {
        normalize_json(body, spec)?
    } else {
        normalize_text(body, spec)?
    };

    for pattern in &spec.block_page_regexes {
        let re = compile(pattern)?;
        let html_hit = normalized
            .html
            .as_deref()
            .map(|h| re.is_match(h))
            .unwrap_or(false);
        if re.is_match(&normalized.text) || html_hit {
            return Err(AppError::BlockPage {
                pattern: pattern.clone(),
            });
        }
    }

    Ok(normalized)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppError::validation(format!("invalid regex '{pattern}': {e}")))
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| AppError::selector(raw, format!("{e:?}")))
}

// ---------------------------------------------------------------------------
// Fields mode
// ---------------------------------------------------------------------------

fn normalize_fields(body: &[u8], spec: &TargetSpec) -> Result<Normalized> {
    let body_str = String::from_utf8_lossy(body);
    let doc = Html::parse_document(&body_str);
    let regexes = spec
        .ignore_regexes
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>>>()?;

    let mut values: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for field in &spec.fields {
        let selector = parse_selector(&field.selector)?;
        let matches: Vec<ElementRef> = doc.select(&selector).collect();
        if matches.is_empty() {
            return Err(AppError::FieldExtraction {
                field: field.name.clone(),
                message: format!("selector '{}' matched no nodes", field.selector),
            });
        }

        let raw = match &field.attr {
            Some(attr) => matches[0].value().attr(attr).unwrap_or_default().to_string(),
            None => matches
                .iter()
                .map(|el| el.text().collect::<String>())
                .collect::<Vec<_>>()
                .join(" "),
        };

        let mut value = raw;
        for re in &regexes {
            value = re.replace_all(&value, "").into_owned();
        }
        let value = collapse_whitespace(&value);
        values.insert(field.name.clone(), serde_json::Value::String(value));
    }

    let object = serde_json::Value::Object(values.into_iter().collect());
    Ok(Normalized {
        mode: SnapshotMode::Fields,
        text: stable_stringify(&object),
        html: None,
    })
}

// ---------------------------------------------------------------------------
// JSON mode
// ---------------------------------------------------------------------------

fn normalize_json(body: &[u8], spec: &TargetSpec) -> Result<Normalized> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;

    for pointer in &spec.ignore_json_paths {
        remove_pointer(&mut value, pointer);
    }

    Ok(Normalized {
        mode: SnapshotMode::Json,
        text: stable_stringify(&value),
        html: None,
    })
}

/// Remove the value addressed by an RFC 6901 pointer. Arrays shrink via
/// removal; missing paths are left untouched.
pub fn remove_pointer(value: &mut serde_json::Value, pointer: &str) {
    if pointer.is_empty() || !pointer.starts_with('/') {
        return;
    }

    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect();
    let (last, parents) = match tokens.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = value;
    for token in parents {
        current = match current {
            serde_json::Value::Object(map) => match map.get_mut(token) {
                Some(next) => next,
                None => return,
            },
            serde_json::Value::Array(items) => match token.parse::<usize>() {
                Ok(index) if index < items.len() => &mut items[index],
                _ => return,
            },
            _ => return,
        };
    }

    match current {
        serde_json::Value::Object(map) => {
            map.remove(last);
        }
        serde_json::Value::Array(items) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Text mode
// ---------------------------------------------------------------------------

const STRIPPED_TAGS: &str = "script, style, noscript, template";

const VOID_TAGS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn normalize_text(body: &[u8], spec: &TargetSpec) -> Result<Normalized> {
    let body_str = String::from_utf8_lossy(body);
    let doc = Html::parse_document(&body_str);

    let mut excluded: HashSet<NodeId> = HashSet::new();
    let stripped = parse_selector(STRIPPED_TAGS)?;
    for el in doc.select(&stripped) {
        excluded.insert(el.id());
    }
    for raw in &spec.ignore_selectors {
        let selector = parse_selector(raw)?;
        for el in doc.select(&selector) {
            excluded.insert(el.id());
        }
    }

    let strip_attrs: HashSet<String> = spec
        .ignore_attributes
        .iter()
        .map(|a| a.to_lowercase())
        .collect();

    let mut roots: Vec<ElementRef> = match &spec.selector {
        Some(raw) => {
            let selector = parse_selector(raw)?;
            doc.select(&selector)
                .filter(|el| {
                    !excluded.contains(&el.id())
                        && !el.ancestors().any(|a| excluded.contains(&a.id()))
                })
                .collect()
        }
        None => vec![doc.root_element()],
    };

    if roots.is_empty() {
        // Zero-match selector: empty text, handled by the empty-snapshot policy.
        return Ok(Normalized {
            mode: SnapshotMode::Text,
            text: String::new(),
            html: None,
        });
    }

    if spec.selector_aggregation_mode == AggregationMode::First {
        roots.truncate(1);
    }

    let html = roots
        .iter()
        .map(|el| {
            let mut out = String::new();
            serialize_filtered(**el, &excluded, &strip_attrs, &mut out);
            out
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut text = roots
        .iter()
        .map(|el| {
            let mut out = String::new();
            collect_text(**el, &excluded, &mut out);
            out
        })
        .collect::<Vec<_>>()
        .join("\n");

    for pattern in &spec.ignore_regexes {
        let re = compile(pattern)?;
        text = re.replace_all(&text, "").into_owned();
    }

    if spec.unicode_normalization {
        text = text.nfkc().collect();
    }

    text = match spec.whitespace_mode {
        WhitespaceMode::Collapse => collapse_whitespace(&text),
        WhitespaceMode::PreserveLines => preserve_lines(&text),
    };

    Ok(Normalized {
        mode: SnapshotMode::Text,
        text,
        html: Some(html),
    })
}

fn collect_text(
    node: ego_tree::NodeRef<'_, Node>,
    excluded: &HashSet<NodeId>,
    out: &mut String,
) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(_) | Node::Document | Node::Fragment => {
            for child in node.children() {
                collect_text(child, excluded, out);
            }
        }
        _ => {}
    }
}

fn escape_text(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

/// Re-serialize a subtree, dropping excluded subtrees, comments, and the
/// globally-stripped attributes.
fn serialize_filtered(
    node: ego_tree::NodeRef<'_, Node>,
    excluded: &HashSet<NodeId>,
    strip_attrs: &HashSet<String>,
    out: &mut String,
) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => escape_text(text, out),
        Node::Element(element) => {
            let name = element.name();
            out.push('<');
            out.push_str(name);
            for (attr, value) in element.attrs() {
                if strip_attrs.contains(&attr.to_lowercase()) {
                    continue;
                }
                let _ = write!(out, " {attr}=\"");
                escape_attr(value, out);
                out.push('"');
            }
            out.push('>');
            if !VOID_TAGS.contains(&name) {
                for child in node.children() {
                    serialize_filtered(child, excluded, strip_attrs, out);
                }
                let _ = write!(out, "</{name}>");
            }
        }
        Node::Document | Node::Fragment => {
            for child in node.children() {
                serialize_filtered(child, excluded, strip_attrs, out);
            }
        }
        _ => {}
    }
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim each line, collapse intra-line whitespace, and squeeze runs of blank
/// lines down to one.
pub fn preserve_lines(input: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = false;

    for line in input.lines() {
        let cleaned = collapse_whitespace(line);
        if cleaned.is_empty() {
            if !previous_blank && !lines.is_empty() {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(cleaned);
            previous_blank = false;
        }
    }

    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunConfig, TargetOverride, TargetSpec};

    fn spec_from(json: &str) -> TargetSpec {
        let run: RunConfig = serde_json::from_str(json).unwrap();
        TargetSpec::resolve(
            &run,
            &TargetOverride {
                url: "https://example.com/".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_classify_by_header() {
        assert_eq!(
            classify_content(Some("application/json; charset=utf-8"), b""),
            ContentClass::Json
        );
        assert_eq!(classify_content(Some("text/html"), b""), ContentClass::Html);
        assert_eq!(
            classify_content(Some("application/rss+xml"), b""),
            ContentClass::Xml
        );
        assert_eq!(classify_content(Some("text/plain"), b""), ContentClass::Other);
    }

    #[test]
    fn test_classify_sniffs_without_header() {
        assert_eq!(classify_content(None, b"  {\"a\":1}"), ContentClass::Json);
        assert_eq!(classify_content(None, b"<!doctype html><p>x"), ContentClass::Html);
        assert_eq!(classify_content(None, b"plain words"), ContentClass::Other);
    }

    #[test]
    fn test_text_mode_strips_scripts_and_comments() {
        let spec = spec_from(r#"{"mode":"monitor"}"#);
        let html = b"<html><body><p>hello</p><script>evil()</script><!-- note --><style>p{}</style></body></html>";
        let result = normalize(html, Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "hello");
        assert!(!result.html.as_ref().unwrap().contains("script"));
        assert!(!result.html.as_ref().unwrap().contains("note"));
    }

    #[test]
    fn test_text_mode_selector_first_vs_all() {
        let html = b"<div class=x>one</div><div class=x>two</div>";
        let first = spec_from(
            r#"{"mode":"monitor","selector":".x","selector_aggregation_mode":"first"}"#,
        );
        let all = spec_from(r#"{"mode":"monitor","selector":".x"}"#);
        assert_eq!(normalize(html, Some("text/html"), &first).unwrap().text, "one");
        assert_eq!(normalize(html, Some("text/html"), &all).unwrap().text, "one two");
    }

    #[test]
    fn test_text_mode_zero_match_selector_is_empty() {
        let spec = spec_from(r##"{"mode":"monitor","selector":"#missing"}"##);
        let result = normalize(b"<p>content</p>", Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "");
        assert!(result.html.is_none());
    }

    #[test]
    fn test_ignore_selectors_remove_subtrees() {
        let spec = spec_from(r#"{"mode":"monitor","ignore_selectors":[".ads"]}"#);
        let html = b"<body><p>keep</p><div class=ads><p>buy stuff</p></div></body>";
        let result = normalize(html, Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "keep");
    }

    #[test]
    fn test_ignore_attributes_stripped_from_html() {
        let spec = spec_from(r#"{"mode":"monitor","ignore_attributes":["data-reactid"]}"#);
        let html = b"<div data-reactid=\"42\" id=\"k\">x</div>";
        let result = normalize(html, Some("text/html"), &spec).unwrap();
        let fragment = result.html.unwrap();
        assert!(!fragment.contains("data-reactid"));
        assert!(fragment.contains("id=\"k\""));
    }

    #[test]
    fn test_ignore_regex_substitution() {
        let spec = spec_from(r#"{"mode":"monitor","ignore_regexes":["\\d+ views"]}"#);
        let result =
            normalize(b"<p>article 123 views</p>", Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "article");
    }

    #[test]
    fn test_unicode_normalization_nfkc() {
        let spec = spec_from(r#"{"mode":"monitor","unicode_normalization":true}"#);
        // Fullwidth "ＡＢ" normalizes to ASCII "AB" under NFKC.
        let result = normalize("<p>ＡＢ</p>".as_bytes(), Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "AB");
    }

    #[test]
    fn test_preserve_lines_mode() {
        let spec = spec_from(r#"{"mode":"monitor","whitespace_mode":"preserve_lines"}"#);
        let html = b"<pre>a   b\n\n\n\nc</pre>";
        let result = normalize(html, Some("text/html"), &spec).unwrap();
        assert_eq!(result.text, "a b\n\nc");
    }

    #[test]
    fn test_json_mode_stable_output() {
        let spec = spec_from(r#"{"mode":"monitor"}"#);
        let a = normalize(br#"{"b":2,"a":1}"#, Some("application/json"), &spec).unwrap();
        let b = normalize(br#"{"a":1,"b":2}"#, Some("application/json"), &spec).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.text, r#"{"a":1,"b":2}"#);
        assert_eq!(a.mode, SnapshotMode::Json);
    }

    #[test]
    fn test_json_mode_malformed_fails() {
        let spec = spec_from(r#"{"mode":"monitor"}"#);
        assert!(normalize(b"{not json", Some("application/json"), &spec).is_err());
    }

    #[test]
    fn test_json_ignore_pointer_removes_value() {
        let spec = spec_from(r#"{"mode":"monitor","ignore_json_paths":["/meta/timestamp"]}"#);
        let body = br#"{"meta":{"timestamp":"T1","session":"abc"},"data":1}"#;
        let result = normalize(body, Some("application/json"), &spec).unwrap();
        assert_eq!(result.text, r#"{"data":1,"meta":{"session":"abc"}}"#);
    }

    #[test]
    fn test_json_ignore_pointer_array_shrinks() {
        let mut value: serde_json::Value = serde_json::from_str(r#"{"a":[1,2,3]}"#).unwrap();
        remove_pointer(&mut value, "/a/1");
        assert_eq!(value, serde_json::json!({"a": [1, 3]}));
    }

    #[test]
    fn test_json_pointer_escapes() {
        let mut value: serde_json::Value =
            serde_json::from_str(r#"{"a/b":{"c~d":1,"keep":2}}"#).unwrap();
        remove_pointer(&mut value, "/a~1b/c~0d");
        assert_eq!(value, serde_json::json!({"a/b": {"keep": 2}}));
    }

    #[test]
    fn test_fields_mode_extraction() {
        let spec = spec_from(
            r#"{"mode":"monitor","fields":[
                {"name":"price","selector":".price"},
                {"name":"link","selector":"a.buy","attr":"href"}
            ]}"#,
        );
        let html = b"<span class=price> 49.99 </span><a class=buy href=\"/cart\">buy</a>";
        let result = normalize(html, Some("text/html"), &spec).unwrap();
        assert_eq!(result.mode, SnapshotMode::Fields);
        assert_eq!(result.text, r#"{"link":"/cart","price":"49.99"}"#);
    }

    #[test]
    fn test_fields_mode_zero_match_is_hard_error() {
        let spec = spec_from(
            r#"{"mode":"monitor","fields":[{"name":"price","selector":".missing"}]}"#,
        );
        let err = normalize(b"<p>x</p>", Some("text/html"), &spec).unwrap_err();
        assert!(matches!(err, AppError::FieldExtraction { .. }));
    }

    #[test]
    fn test_block_page_regex_rejects() {
        let spec = spec_from(r#"{"mode":"monitor","block_page_regexes":["[Cc]aptcha"]}"#);
        let err = normalize(b"<p>Please solve this Captcha</p>", Some("text/html"), &spec)
            .unwrap_err();
        assert!(matches!(err, AppError::BlockPage { .. }));
    }

    #[test]
    fn test_determinism() {
        let spec = spec_from(r##"{"mode":"monitor","selector":"#x"}"##);
        let html = b"<div id=x>  stable   content  </div>";
        let a = normalize(html, Some("text/html"), &spec).unwrap();
        let b = normalize(html, Some("text/html"), &spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.text, "stable content");
    }
}


