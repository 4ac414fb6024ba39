use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::models::PageVariant;
use crate::normalize::dom;

/// Blocks that count as text sections. Headings h1/h2 never do.
pub const TEXT_SECTION_TAGS: &str = "h3, h4, h5, h6, p, li, blockquote, figcaption, pre, code, td, th";
pub const MIN_TEXT_SECTIONS: usize = 4;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:<|&lt;)\s*(?:fake|misleading)\s*:").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("empty alteredContent")]
    EmptyContent,
    #[error("no fakeMarks")]
    NoFakeMarks,
    #[error("only {found} text sections (need >= {needed})")]
    TooThin { found: usize, needed: usize },
    #[error("needs at least 1 fake text section")]
    NoFakeSection,
    #[error("needs at least 1 true text section")]
    NoTrueSection,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SectionCounts {
    pub fake: usize,
    pub truthful: usize,
}

impl SectionCounts {
    pub fn total(&self) -> usize {
        self.fake + self.truthful
    }
}

/// Count non-empty text sections and split them by whether they carry a marker.
pub fn count_sections(altered_content: &str) -> SectionCounts {
    let mut counts = SectionCounts::default();
    if altered_content.trim().is_empty() {
        return counts;
    }
    let doc = dom::parse(altered_content);
    for node in dom::select_all(&doc, TEXT_SECTION_TAGS) {
        let text = dom::visible_text(&node);
        if text.is_empty() {
            continue;
        }
        if MARKER_RE.is_match(&text) || MARKER_RE.is_match(&node.to_string()) {
            counts.fake += 1;
        } else {
            counts.truthful += 1;
        }
    }
    counts
}

/// Single gate before persistence/upload: is this variant safe and playable?
pub fn validate(variant: &PageVariant) -> Result<(), Rejection> {
    if variant.altered_content.trim().is_empty() {
        return Err(Rejection::EmptyContent);
    }
    if variant.fake_marks.is_empty() {
        return Err(Rejection::NoFakeMarks);
    }

    let counts = count_sections(&variant.altered_content);
    if counts.total() < MIN_TEXT_SECTIONS {
        return Err(Rejection::TooThin {
            found: counts.total(),
            needed: MIN_TEXT_SECTIONS,
        });
    }
    if counts.fake < 1 {
        return Err(Rejection::NoFakeSection);
    }
    if counts.truthful < 1 {
        return Err(Rejection::NoTrueSection);
    }
    Ok(())
}
