use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde_json::{json, Value};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::ids::page_id;
use crate::models::{PageSnapshot, UrlEntry};
use crate::normalize::normalize_page;

/// One dataset item as returned by a scraping backend.
pub type RawItem = Value;

const APIFY_BASE: &str = "https://api.apify.com/v2";
const HTML_FIELDS: &[&str] = &[
    "html",
    "pageHtml",
    "pageContent",
    "contentHtml",
    "htmlContent",
    "body",
    "rawHtml",
    "content",
];
const MIN_HTML_LEN: usize = 50;

const SPIDER_CONCURRENCY: usize = 10;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

#[async_trait]
pub trait ScrapeSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, urls: &[UrlEntry]) -> Result<Vec<RawItem>>;
}

// ── Apify ──

pub struct ApifyActor {
    client: reqwest::Client,
    token: String,
    actor_id: String,
    timeout_secs: u64,
}

impl ApifyActor {
    pub fn new(token: &str, actor_id: &str, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            actor_id: actor_id.to_string(),
            timeout_secs,
        }
    }

    fn input(&self, urls: &[UrlEntry]) -> Value {
        json!({
            "startUrls": urls.iter().map(|u| json!({ "url": u.url })).collect::<Vec<_>>(),
            "maxCrawlDepth": 0,
            "maxCrawlPages": urls.len(),
            "saveHtml": true,
            "crawlerType": "cheerio",
            "maxRequestRetries": 2,
            "requestTimeoutSecs": self.timeout_secs,
        })
    }
}

#[async_trait]
impl ScrapeSource for ApifyActor {
    fn name(&self) -> &str {
        &self.actor_id
    }

    async fn fetch(&self, urls: &[UrlEntry]) -> Result<Vec<RawItem>> {
        let run_timeout = self.timeout_secs * urls.len() as u64 + 60;
        let endpoint = format!(
            "{APIFY_BASE}/acts/{}/run-sync-get-dataset-items",
            self.actor_id.replace('/', "~")
        );
        info!("Starting Apify actor {} for {} URLs", self.actor_id, urls.len());

        let resp = self
            .client
            .post(&endpoint)
            .query(&[("token", self.token.as_str())])
            .query(&[("timeout", run_timeout)])
            .timeout(Duration::from_secs(run_timeout + 30))
            .json(&self.input(urls))
            .send()
            .await
            .with_context(|| format!("Apify actor {} unreachable", self.actor_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Apify actor {} returned {}: {}", self.actor_id, status, body));
        }

        let items: Vec<RawItem> = resp.json().await.context("Apify dataset is not a JSON array")?;
        info!("Actor {} returned {} items", self.actor_id, items.len());
        Ok(items)
    }
}

// ── spider.cloud ──

pub struct SpiderSource {
    spider: Arc<Spider>,
}

impl SpiderSource {
    pub fn new(api_key: &str) -> Result<Self> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self {
            spider: Arc::new(spider),
        })
    }
}

#[async_trait]
impl ScrapeSource for SpiderSource {
    fn name(&self) -> &str {
        "spider.cloud"
    }

    async fn fetch(&self, urls: &[UrlEntry]) -> Result<Vec<RawItem>> {
        let semaphore = Arc::new(Semaphore::new(SPIDER_CONCURRENCY));
        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel::<RawItem>(SPIDER_CONCURRENCY * 2);
        for entry in urls {
            let spider = Arc::clone(&self.spider);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let url = entry.url.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                match fetch_with_retry(&spider, &url).await {
                    Ok(item) => {
                        let _ = tx.send(item).await;
                    }
                    Err(e) => warn!("spider.cloud failed for {}: {:#}", url, e),
                }
            });
        }
        drop(tx);

        let mut items = Vec::with_capacity(urls.len());
        while let Some(item) = rx.recv().await {
            items.push(item);
            pb.inc(1);
        }
        pb.finish_and_clear();
        info!("spider.cloud returned {} of {} pages", items.len(), urls.len());
        Ok(items)
    }
}

async fn fetch_with_retry(spider: &Spider, url: &str) -> Result<RawItem> {
    let mut attempt = 0;
    loop {
        match fetch_one(spider, url).await {
            Ok(item) => return Ok(item),
            Err(e) => {
                let msg = e.to_string();
                let retryable = ["429", "rate", "500", "502", "503"]
                    .iter()
                    .any(|code| msg.contains(code));
                if !retryable || attempt == MAX_RETRIES {
                    return Err(e);
                }
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                    url,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

async fn fetch_one(spider: &Spider, url: &str) -> Result<RawItem> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };
    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| anyhow!("Spider scrape failed: {}", e))?;

    let parsed: Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let mut item = parsed
        .as_array()
        .and_then(|arr| arr.first())
        .cloned()
        .ok_or_else(|| anyhow!("No content in spider response"))?;
    if let Some(obj) = item.as_object_mut() {
        obj.entry("url").or_insert_with(|| Value::String(url.to_string()));
    }
    Ok(item)
}

// ── Item → snapshot ──

/// First string field in `HTML_FIELDS` order that looks like real HTML.
pub fn extract_html(item: &RawItem) -> Option<&str> {
    HTML_FIELDS
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .find(|html| html.len() > MIN_HTML_LEN)
}

fn item_title(item: &RawItem) -> Option<String> {
    item.get("title")
        .and_then(Value::as_str)
        .or_else(|| item.pointer("/metadata/title").and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

/// Normalize every usable item in parallel. Items without HTML are skipped.
pub fn items_to_snapshots(
    items: &[RawItem],
    urls: &[UrlEntry],
    project_id: &str,
    max_words: usize,
) -> Vec<PageSnapshot> {
    let tags: HashMap<&str, &[String]> = urls
        .iter()
        .map(|u| (u.url.as_str(), u.tags.as_slice()))
        .collect();
    let captured_at = Utc::now().to_rfc3339();

    items
        .par_iter()
        .filter_map(|item| {
            let url = item.get("url").and_then(Value::as_str).unwrap_or("");
            let Some(raw_html) = extract_html(item) else {
                warn!("No HTML for {:?}, skipping", url);
                return None;
            };
            let normalized = normalize_page(raw_html, url, max_words);
            Some(PageSnapshot {
                page_id: page_id(url),
                url: url.to_string(),
                title: item_title(item),
                captured_at: captured_at.clone(),
                html: normalized.html,
                elements: normalized.elements,
                assets: normalized.assets,
                tags: tags.get(url).map(|t| t.to_vec()).unwrap_or_default(),
                project_id: project_id.to_string(),
            })
        })
        .collect()
}

/// Try each source in order; the first that yields a usable snapshot wins.
pub async fn scrape_urls(
    sources: &[Arc<dyn ScrapeSource>],
    urls: &[UrlEntry],
    project_id: &str,
    max_words: usize,
) -> Vec<PageSnapshot> {
    for source in sources {
        let items = match source.fetch(urls).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Source {} failed: {:#}", source.name(), e);
                continue;
            }
        };
        let pages = items_to_snapshots(&items, urls, project_id, max_words);
        if !pages.is_empty() {
            info!(
                "Source {} produced {} snapshots for {} URLs",
                source.name(),
                pages.len(),
                urls.len()
            );
            return pages;
        }
        warn!("Source {} produced no usable HTML, trying next", source.name());
    }
    error!("All scrape sources failed or returned no HTML");
    Vec::new()
}
