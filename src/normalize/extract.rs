use std::collections::HashSet;

use kuchikikiki::NodeRef;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;

use super::dom;
use super::sanitize::{absolutize, absolutize_srcset};
use crate::models::{ElementKind, PageAsset, PageElement};

const EXTRACT_TAGS: &str = "h1, h2, h3, h4, h5, h6, p, li, blockquote, figcaption, img";
const NOISE_CONTAINERS: &[&str] = &["nav", "header", "footer", "aside", "form", "button", "svg"];

pub const MAX_TEXT_LEN: usize = 2000;
const ID_LEN: usize = 12;
const ID_HINT_CHARS: usize = 80;

/// (tag, text, src) of the last kept element.
type Fingerprint = (ElementKind, Option<String>, Option<String>);

/// Walk sanitized HTML and return the ordered element list plus image assets.
pub fn extract(html: &str, base_url: &str) -> (Vec<PageElement>, Vec<PageAsset>) {
    let doc = dom::parse(html);
    let base = Url::parse(base_url).ok();

    let mut elements = Vec::new();
    let mut assets = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut counter = 0usize;
    let mut prev: Option<Fingerprint> = None;

    for node in dom::select_all(&doc, EXTRACT_TAGS) {
        if inside_noise(&node) {
            continue;
        }
        let Some(kind) = dom::tag_name(&node).and_then(|t| ElementKind::from_tag(&t)) else {
            continue;
        };

        let text: String = dom::visible_text(&node).chars().take(MAX_TEXT_LEN).collect();
        let src = dom::attr(&node, "src")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| dom::attr(&node, "data-src").filter(|s| !s.trim().is_empty()))
            .map(|s| absolutize(&s, base.as_ref()));
        let srcset = dom::attr(&node, "srcset")
            .filter(|s| !s.trim().is_empty())
            .map(|s| absolutize_srcset(&s, base.as_ref()));
        let alt = dom::attr(&node, "alt").filter(|s| !s.is_empty());
        let href = first_link(&node).map(|h| absolutize(&h, base.as_ref()));

        if !kind.is_image() && text.is_empty() {
            continue;
        }

        let text = (!text.is_empty()).then_some(text);
        let fingerprint = (kind, text.clone(), src.clone());
        if prev.as_ref() == Some(&fingerprint) {
            continue;
        }
        prev = Some(fingerprint);

        let hint = text.as_deref().or(src.as_deref()).unwrap_or("");
        let mut element_id = stable_id(kind.as_str(), counter, hint);
        while seen_ids.contains(&element_id) {
            counter += 1;
            element_id = stable_id(kind.as_str(), counter, hint);
        }
        seen_ids.insert(element_id.clone());
        counter += 1;

        if kind.is_image() {
            if let Some(src) = &src {
                assets.push(PageAsset {
                    src: src.clone(),
                    alt: alt.clone(),
                    srcset: srcset.clone(),
                    element_id: element_id.clone(),
                });
            }
        }

        elements.push(PageElement {
            element_id,
            tag: kind,
            text,
            src,
            srcset,
            alt,
            href,
        });
    }

    info!(
        "Extracted {} elements and {} assets from HTML ({} bytes)",
        elements.len(),
        assets.len(),
        html.len()
    );
    (elements, assets)
}

fn inside_noise(node: &NodeRef) -> bool {
    node.ancestors().any(|a| {
        dom::tag_name(&a).is_some_and(|t| NOISE_CONTAINERS.contains(&t.as_str()))
    })
}

/// Target of the first non-empty link inside the block.
fn first_link(node: &NodeRef) -> Option<String> {
    dom::select_all(node, "a[href]")
        .iter()
        .filter_map(|a| dom::attr(a, "href"))
        .find(|h| !h.trim().is_empty())
}

/// One-way hash of tag, position and a short content hint.
pub fn stable_id(tag: &str, index: usize, hint: &str) -> String {
    let hint: String = hint.chars().take(ID_HINT_CHARS).collect();
    let digest = Sha256::digest(format!("{tag}:{index}:{hint}").as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(ID_LEN);
    hex
}
