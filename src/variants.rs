//! Concurrent variant generation followed by re-leveling.
//!
//! Pages are placed into levels up front to pick a difficulty, mutated on a
//! bounded worker pool, validated, and then re-leveled so that pages which
//! failed do not leave holes in the level plan.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::ids::IdSource;
use crate::levels::{self, LevelAllocator};
use crate::models::{Level, PageSnapshot, PageVariant};
use crate::mutate::MutationEngine;
use crate::validate::{validate, Rejection};

pub struct VariantBatch {
    /// Leveled variants first, overflow variants last.
    pub variants: Vec<PageVariant>,
    pub levels: Vec<Level>,
    pub attempted: usize,
    pub rejected: usize,
}

/// Words across the page's text elements.
pub fn page_complexity(page: &PageSnapshot) -> usize {
    page.elements
        .iter()
        .filter_map(|e| e.text.as_deref())
        .map(|t| t.split_whitespace().count())
        .sum()
}

pub struct VariantBuilder {
    engine: Arc<MutationEngine>,
    ids: Arc<dyn IdSource>,
    allocator: LevelAllocator,
    workers: usize,
}

impl VariantBuilder {
    pub fn new(
        engine: MutationEngine,
        ids: Arc<dyn IdSource>,
        allocator: LevelAllocator,
        workers: usize,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            ids,
            allocator,
            workers: workers.max(1),
        }
    }

    pub async fn build(&self, pages: &[Arc<PageSnapshot>], project_id: &str) -> Result<VariantBatch> {
        let num_levels = self.allocator.num_levels();
        let slots = self.allocator.assign(pages, |p| page_complexity(p));
        let total = pages.len();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} variants ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<(usize, Result<PageVariant, Rejection>)>(self.workers * 2);

        for (index, (page, slot)) in pages.iter().zip(slots).enumerate() {
            let page = Arc::clone(page);
            let engine = Arc::clone(&self.engine);
            let ids = Arc::clone(&self.ids);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let project_id = project_id.to_string();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let difficulty = slot.difficulty();
                let params = levels::mutation_params(difficulty, num_levels);
                let altered = engine.mutate(&page, &params, difficulty).await;

                let variant = PageVariant {
                    variant_id: ids.variant_id(),
                    page_id: page.page_id.clone(),
                    level_id: slot.level_id(&project_id),
                    difficulty,
                    altered_content: altered.altered_content,
                    fake_marks: altered.fake_marks,
                    project_id,
                };
                let outcome = validate(&variant).map(|()| variant);
                let _ = tx.send((index, outcome)).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let mut rejected = 0usize;
        while let Some((index, outcome)) = rx.recv().await {
            match outcome {
                Ok(variant) => results.push((index, variant)),
                Err(reason) => {
                    rejected += 1;
                    warn!("Rejected variant for {}: {}", pages[index].page_id, reason);
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        // Completion order is arbitrary; re-leveling needs submission order.
        results.sort_by_key(|(index, _)| *index);
        let valid: Vec<PageVariant> = results.into_iter().map(|(_, v)| v).collect();
        info!(
            "Generated {} valid variants from {} pages ({} rejected)",
            valid.len(),
            total,
            rejected
        );

        let words: HashMap<&str, usize> = pages
            .iter()
            .map(|p| (p.page_id.as_str(), page_complexity(p)))
            .collect();
        let releveled = levels::relevel(valid, project_id, &self.allocator, |v| {
            words.get(v.page_id.as_str()).copied().unwrap_or(0)
        });

        let mut variants = releveled.assigned;
        variants.extend(releveled.overflow);
        let levels = levels::levels_from_variants(&variants, project_id, num_levels);

        Ok(VariantBatch {
            variants,
            levels,
            attempted: total,
            rejected,
        })
    }
}
