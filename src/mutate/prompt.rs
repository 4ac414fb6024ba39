use serde::Serialize;
use url::Url;

use super::sentence::trim_to_sentence;
use crate::models::{MutationParams, PageSnapshot};

/// Per-element text budget in the prompt.
pub const MAX_ELEMENT_CHARS: usize = 1200;

pub const REINFORCEMENT: &str = "\n\nIMPORTANT: Return valid JSON only. No markdown fences. \
No text outside the JSON object. You MUST include at least one fakeMarks entry and at least \
one corresponding <FAKE: ...> or <MISLEADING: ...> span.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompactElement<'a> {
    element_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt: Option<&'a str>,
}

fn compact_elements(page: &PageSnapshot) -> Vec<CompactElement<'_>> {
    page.elements
        .iter()
        .map(|el| CompactElement {
            element_id: &el.element_id,
            kind: el.tag.as_str(),
            text: el
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(|t| trim_to_sentence(t, MAX_ELEMENT_CHARS)),
            src: el.src.as_deref().filter(|s| !s.is_empty()),
            alt: el.alt.as_deref().filter(|s| !s.is_empty()),
        })
        .collect()
}

pub fn system_prompt(params: &MutationParams, difficulty: u32) -> String {
    let spans = params.max_fake_spans;
    format!(
        r#"You alter web pages for DUST, a media-literacy game where players hunt for planted misinformation.

You receive the structured element list of a real page. Return the SAME elements, in the same order, with misinformation planted in a few of them.

DIFFICULTY LEVEL: {difficulty}
- fakeRate: {fake_rate} (share of elements to alter)
- subtlety: {subtlety} (0 = blatant, 1 = very subtle)
- maxFakeSpans: {spans}

RULES:
1. Wrap every altered phrase in <FAKE: ...> or <MISLEADING: ...>.
2. Alter at most {spans} spans in total.
3. Elements you do not alter must be returned byte-for-byte unchanged.
4. Never invent harmful accusations about real people or companies.
5. Anonymize real entities you touch: use roles such as "a regional official" or "a mid-sized retailer".
6. Never give actionable medical or legal advice.
7. A span covers only the inserted or altered words, never a whole element.
8. With low subtlety, fakes are exaggerated and plainly wrong.
9. With high subtlety, fakes are framing, cherry-picked context or plausible misattribution.
10. Always produce at least one span and at least one fakeMarks entry.
11. Keep each sentence inside one text element; every text element holds at least one complete sentence.
12. Never output "li" elements. Turn list items into "p" elements.

OUTPUT FORMAT: strict JSON, no markdown fences:
{{
  "alteredContent": [
    {{"elementId": "...", "type": "...", "text": "...with <FAKE: altered phrase> inside..."}},
    {{"elementId": "...", "type": "...", "text": "...unchanged text..."}}
  ],
  "fakeMarks": [
    {{"kind": "FAKE" or "MISLEADING", "elementId": "...", "snippet": "the altered phrase only", "explanation": "why it is wrong"}}
  ]
}}

"alteredContent" is a JSON array of element objects shaped like the input. Each keeps its "elementId" and "type". Change only "text" (or "alt" for images).

Return ONLY the JSON object."#,
        fake_rate = params.fake_rate,
        subtlety = params.subtlety,
    )
}

pub fn user_prompt(page: &PageSnapshot) -> String {
    let elements = compact_elements(page);
    let domain = Url::parse(&page.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| page.url.clone());
    let listing = serde_json::to_string_pretty(&elements).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Page URL: {}\nPage title: {}\nDomain: {}\n\nElements ({} total):\n{}",
        page.url,
        page.title.as_deref().filter(|t| !t.is_empty()).unwrap_or("(none)"),
        domain,
        elements.len(),
        listing
    )
}
