pub mod parse;
pub mod prompt;
pub mod sections;
mod sentence;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::generator::Generator;
use crate::models::{AlteredPage, FakeKind, FakeMark, MutationParams, PageSnapshot};
use crate::normalize::dom;
use crate::validate::{count_sections, TEXT_SECTION_TAGS};

pub const FALLBACK_SNIPPET: &str = "verified by the 2099 Global Accuracy Census";
pub const FALLBACK_EXPLANATION: &str =
    "Injected fallback misinformation because the model returned no fake marks.";

const BAD_TITLE_PATTERNS: &[&str] = &[
    "page not found",
    "404",
    "access denied",
    "403 forbidden",
    "500 internal",
    "503 service",
    "error page",
    "not available",
    "under construction",
    "coming soon",
    "moved permanently",
    "web page blocked",
];
const MIN_PAGE_TEXT: usize = 100;

/// False for error pages and pages with too little text to alter.
pub fn is_eligible(page: &PageSnapshot) -> bool {
    let title = page.title.as_deref().unwrap_or("").to_lowercase();
    if let Some(pattern) = BAD_TITLE_PATTERNS.iter().find(|p| title.contains(*p)) {
        info!(
            "Skipping page {}: bad title {:?} (matched {:?})",
            page.page_id, page.title, pattern
        );
        return false;
    }

    let text = page
        .elements
        .iter()
        .filter(|e| !e.tag.is_image())
        .map(|e| e.text.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ");
    let len = text.trim().chars().count();
    if len < MIN_PAGE_TEXT {
        info!("Skipping page {}: too little text ({} chars)", page.page_id, len);
        return false;
    }
    true
}

pub struct MutationEngine {
    generator: Arc<dyn Generator>,
    retries: u32,
}

impl MutationEngine {
    pub fn new(generator: Arc<dyn Generator>, retries: u32) -> Self {
        Self { generator, retries }
    }

    /// Never fails: a page that cannot be altered comes back as `AlteredPage::empty()`.
    pub async fn mutate(
        &self,
        page: &PageSnapshot,
        params: &MutationParams,
        difficulty: u32,
    ) -> AlteredPage {
        let system = prompt::system_prompt(params, difficulty);
        let user = prompt::user_prompt(page);
        let attempts = self.retries + 1;
        let mut candidate: Option<AlteredPage> = None;

        for attempt in 1..=attempts {
            let payload = if attempt == 1 {
                user.clone()
            } else {
                format!("{user}{}", prompt::REINFORCEMENT)
            };

            let raw = match self.generator.generate(&system, &payload).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "Generator failed for {} (attempt {}/{}): {:#}",
                        page.page_id, attempt, attempts, e
                    );
                    continue;
                }
            };

            match parse::parse_response(&raw, &page.elements) {
                Ok(altered) if !altered.fake_marks.is_empty() => return altered,
                Ok(altered) => {
                    warn!(
                        "No fake marks for {} (attempt {}/{})",
                        page.page_id, attempt, attempts
                    );
                    candidate = Some(better_candidate(candidate, altered));
                }
                Err(e) => warn!(
                    "Unparseable reply for {} (attempt {}/{}): {}",
                    page.page_id, attempt, attempts, e
                ),
            }
        }

        if let Some(ensured) = candidate.and_then(inject_fallback) {
            warn!("Injected fallback fake mark for {}", page.page_id);
            return ensured;
        }
        error!(
            "Mutation failed for {} at difficulty {} after {} attempts",
            page.page_id, difficulty, attempts
        );
        AlteredPage::empty()
    }
}

/// Prefer the candidate with more text sections; ties go to the newer one.
fn better_candidate(current: Option<AlteredPage>, next: AlteredPage) -> AlteredPage {
    match current {
        Some(cur)
            if count_sections(&cur.altered_content).total()
                > count_sections(&next.altered_content).total() =>
        {
            cur
        }
        _ => next,
    }
}

/// Append a fixed misleading claim to the first block the validator counts as a section.
fn inject_fallback(candidate: AlteredPage) -> Option<AlteredPage> {
    if candidate.altered_content.trim().is_empty() {
        return None;
    }
    let doc = dom::parse(&candidate.altered_content);
    let target = dom::select_all(&doc, TEXT_SECTION_TAGS)
        .into_iter()
        .find(|node| !dom::visible_text(node).is_empty())?;

    let text = dom::visible_text(&target);
    let patched = if text.ends_with(['.', '!', '?']) {
        format!("{text} <MISLEADING: {FALLBACK_SNIPPET}>")
    } else {
        format!("{text}. <MISLEADING: {FALLBACK_SNIPPET}>")
    };
    dom::set_text(&target, &patched);

    Some(AlteredPage {
        altered_content: dom::body_html(&doc),
        fake_marks: vec![FakeMark {
            kind: FakeKind::Misleading,
            element_id: dom::attr(&target, "data-element-id"),
            snippet: FALLBACK_SNIPPET.to_string(),
            explanation: FALLBACK_EXPLANATION.to_string(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::models::{ElementKind, PageElement};

    const NO_MARKS: &str = r#"{"alteredContent": [
        {"elementId": "a", "type": "h1", "text": "Harbor reopens"},
        {"elementId": "b", "type": "p", "text": "The harbor reopened on Monday"},
        {"elementId": "c", "type": "p", "text": "Ferries resumed their normal schedule."}
    ], "fakeMarks": []}"#;

    const WITH_MARKS: &str = r#"{"alteredContent": [
        {"elementId": "b", "type": "p", "text": "The harbor reopened <FAKE: after ten years>."}
    ], "fakeMarks": [{"kind": "FAKE", "elementId": "b", "snippet": "after ten years", "explanation": "It closed for a week."}]}"#;

    /// Replays canned replies in order and records every user payload.
    struct Scripted {
        replies: Vec<Result<String, String>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, _system: &str, user: &str) -> Result<String> {
            self.seen.lock().unwrap().push(user.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = &self.replies[n.min(self.replies.len() - 1)];
            reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn page(title: Option<&str>, texts: &[&str]) -> PageSnapshot {
        PageSnapshot {
            page_id: "page1".into(),
            url: "https://example.com/harbor".into(),
            title: title.map(str::to_string),
            captured_at: "2026-01-01T00:00:00Z".into(),
            html: String::new(),
            elements: texts
                .iter()
                .enumerate()
                .map(|(i, t)| PageElement {
                    element_id: format!("e{i}"),
                    tag: ElementKind::P,
                    text: Some(t.to_string()),
                    src: None,
                    srcset: None,
                    alt: None,
                    href: None,
                })
                .collect(),
            assets: Vec::new(),
            tags: Vec::new(),
            project_id: "demo".into(),
        }
    }

    fn params() -> MutationParams {
        MutationParams {
            fake_rate: 0.05,
            subtlety: 0.1,
            max_fake_spans: 1,
        }
    }

    #[tokio::test]
    async fn zero_marks_every_time_yields_exactly_one_fallback() {
        let gen = Scripted::new(vec![Ok(NO_MARKS)]);
        let engine = MutationEngine::new(gen.clone(), 2);
        let out = engine.mutate(&page(None, &["x"]), &params(), 1).await;

        assert_eq!(gen.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.fake_marks.len(), 1);
        assert_eq!(out.fake_marks[0].kind, FakeKind::Misleading);
        assert_eq!(out.fake_marks[0].snippet, FALLBACK_SNIPPET);
        assert!(out
            .altered_content
            .contains("&lt;MISLEADING: verified by the 2099 Global Accuracy Census&gt;"));
        // The h1 is not a text section; the first paragraph lacks terminal punctuation.
        assert_eq!(out.fake_marks[0].element_id.as_deref(), Some("b"));
        // The unfinished first paragraph absorbs the second.
        assert!(out.altered_content.contains("normal schedule. &lt;MISLEADING:"));
        assert!(out.altered_content.contains("Harbor reopens</h1>"));
        assert_eq!(count_sections(&out.altered_content).fake, 1);
    }

    #[tokio::test]
    async fn retries_past_bad_json_and_reinforces() {
        let gen = Scripted::new(vec![Ok("not json at all"), Ok(WITH_MARKS)]);
        let engine = MutationEngine::new(gen.clone(), 2);
        let out = engine.mutate(&page(None, &["x"]), &params(), 1).await;

        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.fake_marks[0].snippet, "after ten years");
        let seen = gen.seen.lock().unwrap();
        assert!(!seen[0].contains("IMPORTANT"));
        assert!(seen[1].ends_with(prompt::REINFORCEMENT));
    }

    #[tokio::test]
    async fn fenced_reply_is_accepted() {
        let fenced = format!("```json\n{WITH_MARKS}\n```");
        let gen = Scripted::new(vec![Ok(fenced.as_str())]);
        let engine = MutationEngine::new(gen, 0);
        let out = engine.mutate(&page(None, &["x"]), &params(), 1).await;
        assert_eq!(out.fake_marks.len(), 1);
    }

    #[tokio::test]
    async fn transport_failures_end_empty() {
        let gen = Scripted::new(vec![Err("connection reset")]);
        let engine = MutationEngine::new(gen.clone(), 1);
        let out = engine.mutate(&page(None, &["x"]), &params(), 3).await;
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out, AlteredPage::empty());
    }

    #[tokio::test]
    async fn unusable_candidate_ends_empty() {
        let gen = Scripted::new(vec![Ok(r#"{"alteredContent": [], "fakeMarks": []}"#)]);
        let engine = MutationEngine::new(gen, 0);
        let out = engine.mutate(&page(None, &["x"]), &params(), 1).await;
        assert_eq!(out, AlteredPage::empty());
    }

    #[test]
    fn fallback_keeps_existing_terminal_punctuation() {
        let candidate = AlteredPage {
            altered_content: r#"<p data-element-id="z">Already done!</p>"#.into(),
            fake_marks: Vec::new(),
        };
        let out = inject_fallback(candidate).unwrap();
        assert!(out.altered_content.contains("Already done! &lt;MISLEADING:"));
    }

    #[test]
    fn fallback_skips_top_level_headings() {
        let candidate = AlteredPage {
            altered_content: r#"<h1 data-element-id="a">Title</h1><h2 data-element-id="b">Sub</h2><h3 data-element-id="c">Small heading</h3>"#.into(),
            fake_marks: Vec::new(),
        };
        let out = inject_fallback(candidate).unwrap();
        assert_eq!(out.fake_marks[0].element_id.as_deref(), Some("c"));
        assert!(out.altered_content.contains("Small heading. &lt;MISLEADING:"));
    }

    #[test]
    fn fallback_needs_a_text_section() {
        let candidate = AlteredPage {
            altered_content: r#"<h1 data-element-id="a">Only a title</h1>"#.into(),
            fake_marks: Vec::new(),
        };
        assert!(inject_fallback(candidate).is_none());
    }

    #[test]
    fn error_titles_are_ineligible() {
        let long = "Enough words to pass the length floor without any trouble at all. ".repeat(3);
        assert!(is_eligible(&page(Some("Daily news"), &[long.as_str()])));
        assert!(!is_eligible(&page(Some("404 - Page Not Found"), &[long.as_str()])));
        assert!(!is_eligible(&page(Some("Coming Soon"), &[long.as_str()])));
    }

    #[test]
    fn thin_pages_are_ineligible() {
        assert!(!is_eligible(&page(None, &["Too short.", "Still short."])));
    }
}
