use url::Url;

use super::dom;

/// Subtrees removed outright.
const STRIP_TAGS: &str = "script, noscript, style";

/// URL-bearing attribute → tags that carry it.
const URL_ATTRS: &[(&str, &[&str])] = &[
    ("href", &["a", "link", "area", "base"]),
    ("src", &["img", "script", "iframe", "source", "video", "audio", "embed"]),
    ("srcset", &["img", "source"]),
    ("action", &["form"]),
    ("poster", &["video"]),
    ("data", &["object"]),
];

/// Strip executable/style content and absolutize URL attributes against `base_url`.
pub fn sanitize(html: &str, base_url: &str) -> String {
    let doc = dom::parse(html);

    for node in dom::select_all(&doc, STRIP_TAGS) {
        node.detach();
    }

    let base = Url::parse(base_url).ok();
    for (attr, tags) in URL_ATTRS {
        let selector = tags.join(", ");
        for node in dom::select_all(&doc, &selector) {
            let Some(value) = dom::attr(&node, attr) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            let rewritten = if *attr == "srcset" {
                absolutize_srcset(&value, base.as_ref())
            } else {
                absolutize(&value, base.as_ref())
            };
            if rewritten != value {
                dom::set_attr(&node, attr, rewritten);
            }
        }
    }

    doc.to_string()
}

pub fn absolutize(value: &str, base: Option<&Url>) -> String {
    base.and_then(|b| b.join(value.trim()).ok())
        .map(String::from)
        .unwrap_or_else(|| value.to_string())
}

/// Rewrite each `url descriptor` entry, keeping the width/density token.
pub fn absolutize_srcset(srcset: &str, base: Option<&Url>) -> String {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut tokens = entry.split_whitespace();
            let url = tokens.next()?;
            let mut parts = vec![absolutize(url, base)];
            parts.extend(tokens.map(str::to_string));
            Some(parts.join(" "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
