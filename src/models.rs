use serde::{Deserialize, Serialize};

// ── Input ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlEntry {
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlItem {
    Bare(String),
    Entry(UrlEntry),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    #[serde(default = "default_project")]
    pub project_id: String,
    pub urls: Vec<UrlItem>,
}

fn default_project() -> String {
    "default".to_string()
}

impl InputFile {
    /// Normalize mixed bare/object entries, keeping file order.
    pub fn resolved_urls(&self) -> Vec<UrlEntry> {
        self.urls
            .iter()
            .map(|item| match item {
                UrlItem::Bare(url) => UrlEntry {
                    url: url.clone(),
                    tags: Vec::new(),
                },
                UrlItem::Entry(entry) => entry.clone(),
            })
            .collect()
    }
}

// ── Page snapshot ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    P,
    Li,
    Blockquote,
    Figcaption,
    Img,
    Pre,
    Code,
    Td,
    Th,
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "h1" => Self::H1,
            "h2" => Self::H2,
            "h3" => Self::H3,
            "h4" => Self::H4,
            "h5" => Self::H5,
            "h6" => Self::H6,
            "p" => Self::P,
            "li" => Self::Li,
            "blockquote" => Self::Blockquote,
            "figcaption" => Self::Figcaption,
            "img" => Self::Img,
            "pre" => Self::Pre,
            "code" => Self::Code,
            "td" => Self::Td,
            "th" => Self::Th,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "h1",
            Self::H2 => "h2",
            Self::H3 => "h3",
            Self::H4 => "h4",
            Self::H5 => "h5",
            Self::H6 => "h6",
            Self::P => "p",
            Self::Li => "li",
            Self::Blockquote => "blockquote",
            Self::Figcaption => "figcaption",
            Self::Img => "img",
            Self::Pre => "pre",
            Self::Code => "code",
            Self::Td => "td",
            Self::Th => "th",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Img)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    pub element_id: String,
    pub tag: ElementKind,
    pub text: Option<String>,
    pub src: Option<String>,
    pub srcset: Option<String>,
    pub alt: Option<String>,
    pub href: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAsset {
    pub src: String,
    pub alt: Option<String>,
    pub srcset: Option<String>,
    pub element_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub page_id: String,
    pub url: String,
    pub title: Option<String>,
    /// RFC 3339, UTC.
    pub captured_at: String,
    pub html: String,
    pub elements: Vec<PageElement>,
    pub assets: Vec<PageAsset>,
    pub tags: Vec<String>,
    pub project_id: String,
}

// ── Mutation ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationParams {
    pub fake_rate: f64,
    pub subtlety: f64,
    pub max_fake_spans: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FakeKind {
    Fake,
    Misleading,
}

impl FakeKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FAKE" => Some(Self::Fake),
            "MISLEADING" => Some(Self::Misleading),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FakeMark {
    pub kind: FakeKind,
    pub element_id: Option<String>,
    pub snippet: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlteredPage {
    pub altered_content: String,
    pub fake_marks: Vec<FakeMark>,
}

impl AlteredPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

// ── Levels and variants ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVariant {
    pub variant_id: String,
    pub page_id: String,
    pub level_id: String,
    pub difficulty: u32,
    pub altered_content: String,
    pub fake_marks: Vec<FakeMark>,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub level_id: String,
    pub project_id: String,
    pub difficulty: u32,
    pub page_ids: Vec<String>,
    pub mutation_params: MutationParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_url_entries() {
        let raw = r#"{"urls": ["https://a.example", {"url": "https://b.example", "tags": ["news"]}]}"#;
        let input: InputFile = serde_json::from_str(raw).unwrap();
        assert_eq!(input.project_id, "default");
        let urls = input.resolved_urls();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].url, "https://a.example");
        assert!(urls[0].tags.is_empty());
        assert_eq!(urls[1].tags, vec!["news".to_string()]);
    }

    #[test]
    fn element_kind_round_trips_tag_names() {
        assert_eq!(ElementKind::from_tag("FIGCAPTION"), Some(ElementKind::Figcaption));
        assert_eq!(ElementKind::from_tag("div"), None);
        let json = serde_json::to_string(&ElementKind::H3).unwrap();
        assert_eq!(json, "\"h3\"");
    }

    #[test]
    fn variant_serializes_camel_case() {
        let v = PageVariant {
            variant_id: "abc".into(),
            page_id: "p".into(),
            level_id: "proj_level_01".into(),
            difficulty: 1,
            altered_content: "<p>x</p>".into(),
            fake_marks: vec![FakeMark {
                kind: FakeKind::Misleading,
                element_id: None,
                snippet: "s".into(),
                explanation: "e".into(),
            }],
            project_id: "proj".into(),
        };
        let value = serde_json::to_value(&v).unwrap();
        assert_eq!(value["levelId"], "proj_level_01");
        assert_eq!(value["fakeMarks"][0]["kind"], "MISLEADING");
    }
}
