use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::cache::Cache;
use crate::generator::Generator;
use crate::ids::IdSource;
use crate::levels::LevelAllocator;
use crate::models::{PageSnapshot, UrlEntry};
use crate::mutate::{is_eligible, MutationEngine};
use crate::scraper::{scrape_urls, ScrapeSource};
use crate::upload::{upload_all, UploadReport, Uploader};
use crate::variants::VariantBuilder;

/// Collaborators a build talks to.
pub struct Services {
    pub sources: Vec<Arc<dyn ScrapeSource>>,
    pub generator: Arc<dyn Generator>,
    pub uploader: Option<Arc<dyn Uploader>>,
    pub ids: Arc<dyn IdSource>,
}

pub struct BuildOptions {
    pub project_id: String,
    pub allocator: LevelAllocator,
    pub workers: usize,
    pub retries: u32,
    pub max_words: usize,
    pub cache: Option<Cache>,
}

#[derive(Debug, Default)]
pub struct BuildSummary {
    pub requested: usize,
    pub scraped: usize,
    pub eligible: usize,
    pub attempted: usize,
    pub valid: usize,
    pub rejected: usize,
    pub levels: usize,
    pub upload: Option<UploadReport>,
}

/// Scrape, filter, mutate, re-level, cache and upload one batch of URLs.
pub async fn run_build(
    urls: &[UrlEntry],
    opts: &BuildOptions,
    services: &Services,
) -> Result<BuildSummary> {
    let mut summary = BuildSummary {
        requested: urls.len(),
        ..Default::default()
    };

    info!("Scraping {} URLs (project={})", urls.len(), opts.project_id);
    let pages = scrape_urls(&services.sources, urls, &opts.project_id, opts.max_words).await;
    if pages.is_empty() {
        bail!("No pages scraped from {} URLs", urls.len());
    }
    summary.scraped = pages.len();

    if let Some(cache) = &opts.cache {
        for page in &pages {
            cache.save_page(page)?;
        }
    }

    let eligible: Vec<Arc<PageSnapshot>> = pages
        .iter()
        .filter(|p| is_eligible(p))
        .cloned()
        .map(Arc::new)
        .collect();
    let dropped = pages.len() - eligible.len();
    if dropped > 0 {
        warn!("Dropped {} ineligible pages", dropped);
    }
    if eligible.is_empty() {
        bail!("None of the {} scraped pages is eligible for mutation", pages.len());
    }
    summary.eligible = eligible.len();

    let engine = MutationEngine::new(Arc::clone(&services.generator), opts.retries);
    let builder = VariantBuilder::new(engine, Arc::clone(&services.ids), opts.allocator, opts.workers);
    let batch = builder.build(&eligible, &opts.project_id).await?;
    summary.attempted = batch.attempted;
    summary.valid = batch.variants.len();
    summary.rejected = batch.rejected;
    summary.levels = batch.levels.len();

    if let Some(cache) = &opts.cache {
        for level in &batch.levels {
            cache.save_level(level)?;
        }
        for variant in &batch.variants {
            cache.save_variant(variant)?;
        }
        info!("Cached {} levels and {} variants", batch.levels.len(), batch.variants.len());
    }

    match &services.uploader {
        Some(uploader) => {
            let report = upload_all(uploader.as_ref(), &pages, &batch.levels, &batch.variants).await?;
            summary.upload = Some(report);
        }
        None => info!("Upload skipped (no upload target configured)"),
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::ids::SequentialIds;
    use crate::levels::AllocationPolicy;
    use crate::scraper::RawItem;
    use crate::upload::Tally;

    const URLS: [&str; 3] = [
        "https://news.example.com/harbor",
        "https://news.example.com/missing",
        "https://news.example.com/council",
    ];

    /// Returns the fixture article for every URL except the missing one.
    struct FixtureSource;

    #[async_trait]
    impl ScrapeSource for FixtureSource {
        fn name(&self) -> &str {
            "fixture"
        }

        async fn fetch(&self, urls: &[UrlEntry]) -> anyhow::Result<Vec<RawItem>> {
            let html = std::fs::read_to_string("tests/fixtures/article.html")?;
            Ok(urls
                .iter()
                .filter(|u| !u.url.ends_with("missing"))
                .map(|u| json!({ "url": u.url, "html": html, "title": "Harbor reopens after storm" }))
                .collect())
        }
    }

    /// Marks exactly one rewritten sentence per page as fake.
    struct OneFake;

    #[async_trait]
    impl Generator for OneFake {
        async fn generate(&self, system: &str, _user: &str) -> anyhow::Result<String> {
            let spans = if system.contains("maxFakeSpans: 1\n") { 1 } else { 2 };
            Ok(json!({
                "alteredContent": [
                    {"elementId": "a", "type": "h1", "text": "Harbor reopens after storm"},
                    {"elementId": "b", "type": "p", "text": "The harbor reopened on Monday morning."},
                    {"elementId": "c", "type": "p", "text": format!("Repairs cost <FAKE: {spans} billion dollars>.")},
                    {"elementId": "d", "type": "p", "text": "Ferries resumed their normal schedule."},
                    {"elementId": "e", "type": "blockquote", "text": "We are glad to be back, said a captain."}
                ],
                "fakeMarks": [{"kind": "FAKE", "elementId": "c", "snippet": "billion dollars", "explanation": "Repairs were modest."}]
            })
            .to_string())
        }
    }

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(&'static str, Value)>>,
    }

    #[async_trait]
    impl Uploader for Recording {
        async fn upsert_page(&self, page: Value) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(("pages:upsert", page));
            Ok(())
        }

        async fn upsert_level(&self, level: Value) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(("levels:upsert", level));
            Ok(())
        }

        async fn insert_variant(&self, variant: Value) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(("pageVariants:insert", variant));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ScrapeSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self, _urls: &[UrlEntry]) -> anyhow::Result<Vec<RawItem>> {
            Err(anyhow!("network down"))
        }
    }

    fn entries() -> Vec<UrlEntry> {
        URLS.iter()
            .map(|u| UrlEntry {
                url: u.to_string(),
                tags: Vec::new(),
            })
            .collect()
    }

    fn options() -> BuildOptions {
        BuildOptions {
            project_id: "demo".into(),
            allocator: LevelAllocator::new(10, AllocationPolicy::Submission),
            workers: 4,
            retries: 1,
            max_words: 1000,
            cache: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_two_of_three_urls() {
        let recorder = Arc::new(Recording::default());
        let services = Services {
            sources: vec![Arc::new(FixtureSource)],
            generator: Arc::new(OneFake),
            uploader: Some(recorder.clone()),
            ids: Arc::new(SequentialIds::default()),
        };

        let summary = run_build(&entries(), &options(), &services).await.unwrap();
        assert_eq!(summary.requested, 3);
        assert_eq!(summary.scraped, 2);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.levels, 2);

        let report = summary.upload.unwrap();
        assert_eq!(report.pages, Tally { ok: 2, total: 2 });
        assert_eq!(report.levels, Tally { ok: 2, total: 2 });
        assert_eq!(report.variants, Tally { ok: 2, total: 2 });

        let calls = recorder.calls.lock().unwrap();
        let levels: Vec<&Value> = calls
            .iter()
            .filter(|(path, _)| *path == "levels:upsert")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(levels[0]["levelId"], "demo_level_01");
        assert_eq!(levels[0]["mutationParams"]["maxFakeSpans"], 1);
        assert_eq!(levels[1]["levelId"], "demo_level_02");

        let variants: Vec<&Value> = calls
            .iter()
            .filter(|(path, _)| *path == "pageVariants:insert")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(variants[0]["difficulty"], 1);
        assert_eq!(variants[1]["difficulty"], 2);
        assert_eq!(variants[0]["fakeMarks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_scraped_pages_is_fatal() {
        let services = Services {
            sources: vec![Arc::new(Failing)],
            generator: Arc::new(OneFake),
            uploader: None,
            ids: Arc::new(SequentialIds::default()),
        };
        let err = run_build(&entries(), &options(), &services).await.unwrap_err();
        assert!(err.to_string().starts_with("No pages scraped"));
    }

    #[tokio::test]
    async fn build_writes_cache_without_uploader() {
        let root = std::env::temp_dir().join(format!("dust_pipeline_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let opts = BuildOptions {
            cache: Some(Cache::new(&root)),
            ..options()
        };
        let services = Services {
            sources: vec![Arc::new(FixtureSource)],
            generator: Arc::new(OneFake),
            uploader: None,
            ids: Arc::new(SequentialIds::default()),
        };

        let summary = run_build(&entries(), &opts, &services).await.unwrap();
        assert!(summary.upload.is_none());
        assert!(root.join("levels/demo_level_01.json").exists());
        assert!(root.join("variants/0000000000000000.json").exists());
        let cached = std::fs::read_to_string(
            root.join("pages")
                .join(crate::ids::page_id(URLS[0]))
                .join("raw.html"),
        )
        .unwrap();
        assert!(!cached.contains("<script"));
        assert!(cached.contains("<p"));
        let _ = std::fs::remove_dir_all(&root);
    }
}
