pub mod dom;
pub mod extract;
pub mod sanitize;
pub mod truncate;

use crate::models::{PageAsset, PageElement};

pub struct Normalized {
    pub html: String,
    pub elements: Vec<PageElement>,
    pub assets: Vec<PageAsset>,
}

/// Three-pass pipeline: raw HTML → sanitized → truncated → elements + assets.
pub fn normalize_page(raw_html: &str, url: &str, max_words: usize) -> Normalized {
    let html = sanitize::sanitize(raw_html, url);
    let html = truncate::truncate(&html, max_words);
    let (elements, assets) = extract::extract(&html, url);
    Normalized {
        html,
        elements,
        assets,
    }
}
