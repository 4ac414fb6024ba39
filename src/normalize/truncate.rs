use tracing::info;

use super::dom;

/// Block-level tags that count as one paragraph for the word budget.
const PARAGRAPH_TAGS: &str = "p, li, h1, h2, h3, h4, h5, h6, blockquote, pre, figcaption";

pub const DEFAULT_MAX_WORDS: usize = 1000;

/// Cut the document at the first paragraph that would exceed `max_words`.
///
/// That paragraph and every paragraph after it in document order are removed;
/// nothing is split mid-paragraph. Documents already within budget come back
/// byte-for-byte unchanged.
pub fn truncate(html: &str, max_words: usize) -> String {
    let doc = dom::parse(html);
    let blocks = dom::select_all(&doc, PARAGRAPH_TAGS);

    let mut word_count = 0;
    let mut cutoff = blocks.len();
    for (i, block) in blocks.iter().enumerate() {
        let words = count_words(&dom::visible_text(block));
        if word_count + words > max_words {
            cutoff = i;
            break;
        }
        word_count += words;
    }

    if cutoff == blocks.len() {
        return html.to_string();
    }

    let mut removed = 0;
    for block in &blocks[cutoff..] {
        // Nested inside a block removed earlier in this pass.
        if !dom::is_attached(block, &doc) {
            continue;
        }
        block.detach();
        removed += 1;
    }
    info!(
        "Truncated page to ~{} words (removed {} block elements)",
        word_count, removed
    );

    doc.to_string()
}

#[cfg(test)]
/// Word total over all paragraph blocks, counted the same way `truncate` does.
pub fn paragraph_words(html: &str) -> usize {
    let doc = dom::parse(html);
    dom::select_all(&doc, PARAGRAPH_TAGS)
        .iter()
        .map(|b| count_words(&dom::visible_text(b)))
        .sum()
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
