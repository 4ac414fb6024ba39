//! Turning a generator reply into an `AlteredPage`.
//!
//! Replies are tolerated loosely: fences are stripped, malformed mark entries
//! are dropped and `alteredContent` may arrive as an element array, a raw
//! HTML string or something else entirely.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::sections::normalize_sections;
use crate::models::{AlteredPage, ElementKind, FakeKind, FakeMark, PageElement};
use crate::normalize::dom::escape_html;

static RAW_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(fake|misleading)\s*:([^>]*)>").unwrap());

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is not a JSON object")]
    NotAnObject,
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => "",
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_response(raw: &str, original: &[PageElement]) -> Result<AlteredPage, ParseError> {
    let value: Value = serde_json::from_str(strip_fences(raw))?;
    let Value::Object(data) = value else {
        return Err(ParseError::NotAnObject);
    };

    let fake_marks = data
        .get("fakeMarks")
        .and_then(Value::as_array)
        .map(|marks| marks.iter().filter_map(parse_mark).collect())
        .unwrap_or_default();

    let html = match data.get("alteredContent") {
        Some(Value::Array(items)) => render_elements(items, original),
        Some(Value::String(s)) => escape_markers(s),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(AlteredPage {
        altered_content: normalize_sections(&html),
        fake_marks,
    })
}

fn parse_mark(entry: &Value) -> Option<FakeMark> {
    let obj = entry.as_object()?;
    let kind = match obj.get("kind").and_then(Value::as_str) {
        Some(raw) => FakeKind::parse(raw)?,
        None => FakeKind::Fake,
    };
    Some(FakeMark {
        kind,
        element_id: str_field(obj, "elementId").filter(|s| !s.is_empty()),
        snippet: str_field(obj, "snippet").unwrap_or_default(),
        explanation: str_field(obj, "explanation").unwrap_or_default(),
    })
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Raw marker spans would otherwise be parsed as bogus elements.
pub fn escape_markers(html: &str) -> String {
    RAW_MARKER_RE
        .replace_all(html, "&lt;${1}:${2}&gt;")
        .into_owned()
}

/// One tag per element. Image references always come from the source page.
fn render_elements(items: &[Value], original: &[PageElement]) -> String {
    let images: HashMap<&str, &PageElement> = original
        .iter()
        .filter(|e| e.tag.is_image() && e.src.is_some())
        .map(|e| (e.element_id.as_str(), e))
        .collect();

    let mut lines = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let element_id = str_field(obj, "elementId")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("el-{idx}"));
        let kind = str_field(obj, "type")
            .and_then(|t| ElementKind::from_tag(&t))
            .unwrap_or(ElementKind::P);
        let safe_id = escape_html(&element_id, true);

        if kind.is_image() {
            let source = images.get(element_id.as_str());
            let src = match source {
                Some(orig) => orig.src.clone(),
                None => str_field(obj, "src"),
            };
            let Some(src) = src.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
                continue;
            };
            let alt = str_field(obj, "alt")
                .filter(|a| !a.is_empty())
                .or_else(|| source.and_then(|o| o.alt.clone()))
                .unwrap_or_default();
            let srcset = source
                .and_then(|o| o.srcset.as_deref())
                .map(|s| format!(r#" srcset="{}""#, escape_html(s, true)))
                .unwrap_or_default();
            lines.push(format!(
                r#"<img data-element-id="{safe_id}" src="{}"{srcset} alt="{}" />"#,
                escape_html(&src, true),
                escape_html(&alt, true)
            ));
            continue;
        }

        let text = str_field(obj, "text").unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        // Bare table cells do not survive a re-parse outside a table.
        let tag = match kind {
            ElementKind::Td | ElementKind::Th => "p",
            other => other.as_str(),
        };
        lines.push(format!(
            r#"<{tag} data-element-id="{safe_id}">{}</{tag}>"#,
            escape_html(text, false)
        ));
    }
    lines.join("\n")
}
