use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::models::{Level, PageSnapshot, PageVariant};

/// On-disk replay cache of everything a build produced.
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Snapshot JSON plus the sanitized, truncated HTML it was extracted from.
    pub fn save_page(&self, page: &PageSnapshot) -> Result<()> {
        let dir = self.root.join("pages").join(&page.page_id);
        write_json(&dir.join("snapshot.json"), page)?;
        write_text(&dir.join("raw.html"), &page.html)
    }

    pub fn save_level(&self, level: &Level) -> Result<()> {
        let path = self.root.join("levels").join(format!("{}.json", level.level_id));
        write_json(&path, level)
    }

    pub fn save_variant(&self, variant: &PageVariant) -> Result<()> {
        let path = self
            .root
            .join("variants")
            .join(format!("{}.json", variant.variant_id));
        write_json(&path, variant)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_text(path, &body)
}

fn write_text(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Cached {}", path.display());
    Ok(())
}
