/// Byte offsets just past each sentence terminator (`.`, `!`, `?`, optionally
/// followed by one closing quote or bracket) that sits before whitespace or the end.
fn sentence_ends(text: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let offset = |i: usize| chars.get(i).map_or(text.len(), |(b, _)| *b);

    let mut ends = Vec::new();
    for (i, (_, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = i + 1;
        if chars
            .get(end)
            .is_some_and(|(_, c)| matches!(c, '"' | '\'' | ')' | ']'))
        {
            end += 1;
        }
        if chars.get(end).map_or(true, |(_, c)| c.is_whitespace()) {
            ends.push(offset(end));
        }
    }
    ends
}

pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn ends_with_sentence(text: &str) -> bool {
    let normalized = collapse_ws(text);
    !normalized.is_empty() && sentence_ends(&normalized).last() == Some(&normalized.len())
}

/// Trim to the last complete sentence within `max_chars`, or the last whole
/// word when no sentence ends late enough.
pub fn trim_to_sentence(text: &str, max_chars: usize) -> String {
    let normalized = collapse_ws(text);
    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    let clipped: String = normalized.chars().take(max_chars).collect();
    let clipped = clipped.trim_end();
    let min_keep = (max_chars as f64 * 0.4) as usize;

    if let Some(&end) = sentence_ends(clipped).last() {
        if clipped[..end].chars().count() >= min_keep {
            return clipped[..end].trim().to_string();
        }
    }
    match clipped.rfind(' ') {
        Some(pos) if pos > 0 => clipped[..pos].trim().to_string(),
        _ => clipped.to_string(),
    }
}
