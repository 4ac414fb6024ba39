use super::sentence::{collapse_ws, ends_with_sentence};
use crate::normalize::dom;

const MERGEABLE_TAGS: &str = "p, blockquote, figcaption, pre, code, td, th";
const SHORT_FRAGMENT_WORDS: usize = 14;

/// Post-process altered HTML into playable sections: drop `h2`, turn `li`
/// into `p`, and fold sentence fragments into the preceding block.
pub fn normalize_sections(html: &str) -> String {
    if html.trim().is_empty() {
        return html.to_string();
    }
    let doc = dom::parse(html);

    for h2 in dom::select_all(&doc, "h2") {
        h2.detach();
    }
    for li in dom::select_all(&doc, "li") {
        dom::rename(&li, "p");
    }

    let mut previous = None;
    for node in dom::select_all(&doc, MERGEABLE_TAGS) {
        if !dom::is_attached(&node, &doc) {
            continue;
        }
        // Already part of the previous block's text.
        if previous.as_ref().is_some_and(|p| node.ancestors().any(|a| a == *p)) {
            continue;
        }
        let text = dom::visible_text(&node);
        if text.is_empty() {
            node.detach();
            continue;
        }
        let Some(prev) = previous.as_ref() else {
            previous = Some(node);
            continue;
        };

        let prev_text = dom::visible_text(prev);
        let short_fragment =
            !ends_with_sentence(&text) && text.split_whitespace().count() <= SHORT_FRAGMENT_WORDS;
        if !ends_with_sentence(&prev_text) || short_fragment {
            dom::set_text(prev, &collapse_ws(&format!("{prev_text} {text}")));
            node.detach();
            continue;
        }
        previous = Some(node);
    }

    dom::body_html(&doc)
}
