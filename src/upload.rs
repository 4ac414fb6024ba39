use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::models::{Level, PageSnapshot, PageVariant};
use crate::validate::validate;

const MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upsert_page(&self, page: Value) -> Result<()>;
    async fn upsert_level(&self, level: Value) -> Result<()>;
    async fn insert_variant(&self, variant: Value) -> Result<()>;
}

/// Convex deployment reached through its public HTTP mutation API.
pub struct ConvexClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ConvexClient {
    pub fn new(convex_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(MUTATION_TIMEOUT)
            .build()
            .context("Failed to build Convex HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/mutation", convex_url.trim_end_matches('/')),
        })
    }

    async fn call_mutation(&self, path: &str, args: Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "path": path, "args": args, "format": "json" }))
            .send()
            .await
            .with_context(|| format!("Convex mutation {path} unreachable"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("Convex mutation {} failed (HTTP {}): {}", path, status.as_u16(), body);
            return Err(anyhow!("Convex mutation {path} failed with HTTP {status}"));
        }
        resp.json().await.context("Convex returned a non-JSON body")
    }
}

#[async_trait]
impl Uploader for ConvexClient {
    async fn upsert_page(&self, page: Value) -> Result<()> {
        self.call_mutation("pages:upsert", page).await.map(|_| ())
    }

    async fn upsert_level(&self, level: Value) -> Result<()> {
        self.call_mutation("levels:upsert", level).await.map(|_| ())
    }

    async fn insert_variant(&self, variant: Value) -> Result<()> {
        self.call_mutation("pageVariants:insert", variant).await.map(|_| ())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub ok: usize,
    pub total: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub pages: Tally,
    pub levels: Tally,
    pub variants: Tally,
    /// Variants that failed re-validation and were never sent.
    pub skipped_variants: usize,
}

fn to_payload<T: Serialize>(item: &T) -> Result<Value> {
    serde_json::to_value(item).context("Failed to serialize upload payload")
}

/// Page payloads always carry a string title.
fn page_payload(page: &PageSnapshot) -> Result<Value> {
    let mut payload = to_payload(page)?;
    if let Some(title) = payload.get_mut("title") {
        if title.is_null() {
            *title = Value::String(String::new());
        }
    }
    Ok(payload)
}

/// Upload pages, then levels, then variants. Individual failures are counted, not raised.
pub async fn upload_all(
    uploader: &dyn Uploader,
    pages: &[PageSnapshot],
    levels: &[Level],
    variants: &[PageVariant],
) -> Result<UploadReport> {
    let mut report = UploadReport::default();

    for page in pages {
        report.pages.total += 1;
        match uploader.upsert_page(page_payload(page)?).await {
            Ok(()) => {
                report.pages.ok += 1;
                debug!("Uploaded page {}", page.page_id);
            }
            Err(e) => warn!("Failed to upload page {}: {:#}", page.page_id, e),
        }
    }

    for level in levels {
        report.levels.total += 1;
        match uploader.upsert_level(to_payload(level)?).await {
            Ok(()) => {
                report.levels.ok += 1;
                debug!("Uploaded level {}", level.level_id);
            }
            Err(e) => warn!("Failed to upload level {}: {:#}", level.level_id, e),
        }
    }

    for variant in variants {
        if let Err(reason) = validate(variant) {
            report.skipped_variants += 1;
            warn!("Skipping variant {}: {}", variant.variant_id, reason);
            continue;
        }
        report.variants.total += 1;
        match uploader.insert_variant(to_payload(variant)?).await {
            Ok(()) => {
                report.variants.ok += 1;
                debug!("Uploaded variant {}", variant.variant_id);
            }
            Err(e) => warn!("Failed to upload variant {}: {:#}", variant.variant_id, e),
        }
    }

    if report.skipped_variants > 0 {
        info!("Skipped {} invalid variants", report.skipped_variants);
    }
    info!(
        "Uploaded {}/{} pages, {}/{} levels, {}/{} variants",
        report.pages.ok,
        report.pages.total,
        report.levels.ok,
        report.levels.total,
        report.variants.ok,
        report.variants.total
    );
    Ok(report)
}
