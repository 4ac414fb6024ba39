//! Level capacity planning and first-fit assignment.
//!
//! Capacity grows with difficulty as `ceil(d / 2)`: ten levels hold
//! 1,1,2,2,3,3,4,4,5,5 items (30 total). Items that find no free slot go to
//! a single overflow bucket instead of being dropped.

use serde::Deserialize;
use tracing::info;

use crate::models::{Level, MutationParams, PageVariant};

pub const DEFAULT_LEVELS: u32 = 10;
const EXTRA_DIFFICULTY: u32 = 5;
const OVERFLOW_SUFFIX: &str = "unassigned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// First-fit in submission order.
    #[default]
    Submission,
    /// Stable sort by ascending complexity, then first-fit.
    Complexity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Level(u32),
    Overflow(u32),
}

impl Slot {
    pub fn difficulty(&self) -> u32 {
        match self {
            Slot::Level(d) | Slot::Overflow(d) => *d,
        }
    }

    pub fn level_id(&self, project_id: &str) -> String {
        match self {
            Slot::Level(d) => level_id(project_id, *d),
            Slot::Overflow(_) => overflow_level_id(project_id),
        }
    }
}

pub fn capacity(difficulty: u32) -> usize {
    difficulty.div_ceil(2) as usize
}

pub fn plan(num_levels: u32) -> Vec<usize> {
    (1..=num_levels).map(capacity).collect()
}

pub fn level_id(project_id: &str, difficulty: u32) -> String {
    format!("{project_id}_level_{difficulty:02}")
}

pub fn overflow_level_id(project_id: &str) -> String {
    format!("{project_id}_{OVERFLOW_SUFFIX}")
}

pub fn extra_difficulty(num_levels: u32) -> u32 {
    EXTRA_DIFFICULTY.clamp(1, num_levels.max(1))
}

/// Linear interpolation over `[1, num_levels]`.
pub fn mutation_params(difficulty: u32, num_levels: u32) -> MutationParams {
    let span = num_levels.saturating_sub(1).max(1) as f64;
    let t = (difficulty.saturating_sub(1) as f64 / span).clamp(0.0, 1.0);
    MutationParams {
        fake_rate: round3(0.05 + t * 0.45),
        subtlety: round3(0.10 + t * 0.85),
        max_fake_spans: ((1.0 + t * 7.0).round() as u32).max(1),
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy)]
pub struct LevelAllocator {
    num_levels: u32,
    policy: AllocationPolicy,
}

impl LevelAllocator {
    pub fn new(num_levels: u32, policy: AllocationPolicy) -> Self {
        Self { num_levels, policy }
    }

    pub fn num_levels(&self) -> u32 {
        self.num_levels
    }

    /// One slot per item, in the same order as `items`.
    pub fn assign<T>(&self, items: &[T], complexity: impl Fn(&T) -> usize) -> Vec<Slot> {
        let mut order: Vec<usize> = (0..items.len()).collect();
        if self.policy == AllocationPolicy::Complexity {
            order.sort_by_key(|&i| complexity(&items[i]));
        }

        let capacities = plan(self.num_levels);
        let mut counts = vec![0usize; capacities.len()];
        let overflow = Slot::Overflow(extra_difficulty(self.num_levels));
        let mut slots = vec![overflow; items.len()];

        for idx in order {
            let free = (0..capacities.len()).find(|&d| counts[d] < capacities[d]);
            if let Some(d) = free {
                counts[d] += 1;
                slots[idx] = Slot::Level(d as u32 + 1);
            }
        }
        slots
    }
}

pub struct Releveled {
    pub assigned: Vec<PageVariant>,
    pub overflow: Vec<PageVariant>,
}

/// Re-run first-fit over validated variants and rewrite their level and difficulty.
pub fn relevel(
    variants: Vec<PageVariant>,
    project_id: &str,
    allocator: &LevelAllocator,
    complexity: impl Fn(&PageVariant) -> usize,
) -> Releveled {
    let slots = allocator.assign(&variants, complexity);
    let mut assigned = Vec::new();
    let mut overflow = Vec::new();

    for (mut variant, slot) in variants.into_iter().zip(slots) {
        variant.difficulty = slot.difficulty();
        variant.level_id = slot.level_id(project_id);
        match slot {
            Slot::Level(_) => assigned.push(variant),
            Slot::Overflow(_) => overflow.push(variant),
        }
    }

    info!(
        "Re-leveled {} variants ({} assigned to levels, {} leftovers)",
        assigned.len() + overflow.len(),
        assigned.len(),
        overflow.len()
    );
    Releveled { assigned, overflow }
}

/// One `Level` per distinct level id, overflow bucket last.
pub fn levels_from_variants(
    variants: &[PageVariant],
    project_id: &str,
    num_levels: u32,
) -> Vec<Level> {
    let mut levels: Vec<Level> = Vec::new();
    for v in variants {
        match levels.iter_mut().find(|l| l.level_id == v.level_id) {
            Some(level) => {
                if !level.page_ids.contains(&v.page_id) {
                    level.page_ids.push(v.page_id.clone());
                }
            }
            None => levels.push(Level {
                level_id: v.level_id.clone(),
                project_id: project_id.to_string(),
                difficulty: v.difficulty,
                page_ids: vec![v.page_id.clone()],
                mutation_params: mutation_params(v.difficulty, num_levels),
            }),
        }
    }

    let overflow_id = overflow_level_id(project_id);
    levels.sort_by_key(|l| (l.level_id == overflow_id, l.difficulty));
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(page: &str) -> PageVariant {
        PageVariant {
            variant_id: format!("v-{page}"),
            page_id: page.to_string(),
            level_id: String::new(),
            difficulty: 0,
            altered_content: "<p>x</p>".into(),
            fake_marks: Vec::new(),
            project_id: "proj".into(),
        }
    }

    #[test]
    fn ten_level_capacities() {
        let caps = plan(10);
        assert_eq!(caps, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
        assert_eq!(caps.iter().sum::<usize>(), 30);
    }

    #[test]
    fn params_interpolate_between_endpoints() {
        let first = mutation_params(1, 10);
        assert_eq!(first.fake_rate, 0.05);
        assert_eq!(first.subtlety, 0.1);
        assert_eq!(first.max_fake_spans, 1);

        let last = mutation_params(10, 10);
        assert_eq!(last.fake_rate, 0.5);
        assert_eq!(last.subtlety, 0.95);
        assert_eq!(last.max_fake_spans, 8);

        let mid = mutation_params(4, 10);
        assert_eq!(mid.fake_rate, 0.2);
        assert_eq!(mid.max_fake_spans, 3);
    }

    #[test]
    fn single_level_does_not_divide_by_zero() {
        let p = mutation_params(1, 1);
        assert_eq!(p.fake_rate, 0.05);
        assert_eq!(p.max_fake_spans, 1);
    }

    #[test]
    fn first_fit_then_overflow() {
        let alloc = LevelAllocator::new(3, AllocationPolicy::Submission);
        let items = vec!["a", "b", "c", "d", "e", "f"];
        let slots = alloc.assign(&items, |_| 0);
        assert_eq!(
            slots,
            vec![
                Slot::Level(1),
                Slot::Level(2),
                Slot::Level(3),
                Slot::Level(3),
                Slot::Overflow(3),
                Slot::Overflow(3),
            ]
        );
    }

    #[test]
    fn complexity_policy_orders_by_score() {
        let alloc = LevelAllocator::new(2, AllocationPolicy::Complexity);
        let items = vec![("hard", 900), ("easy", 10), ("mid", 300)];
        let slots = alloc.assign(&items, |(_, score)| *score);
        assert_eq!(slots[1], Slot::Level(1));
        assert_eq!(slots[2], Slot::Level(2));
        assert_eq!(slots[0], Slot::Overflow(2));
    }

    #[test]
    fn relevel_backfills_in_submission_order() {
        // Page "b" failed mutation; "c" takes its place at level 2.
        let alloc = LevelAllocator::new(10, AllocationPolicy::Submission);
        let survivors = vec![variant("a"), variant("c")];
        let out = relevel(survivors, "proj", &alloc, |_| 0);
        assert_eq!(out.assigned[0].level_id, "proj_level_01");
        assert_eq!(out.assigned[1].level_id, "proj_level_02");
        assert_eq!(out.assigned[1].difficulty, 2);
        assert!(out.overflow.is_empty());
    }

    #[test]
    fn relevel_overflow_uses_extra_difficulty() {
        let alloc = LevelAllocator::new(2, AllocationPolicy::Submission);
        let vs = vec![variant("a"), variant("b"), variant("c")];
        let out = relevel(vs, "proj", &alloc, |_| 0);
        assert_eq!(out.assigned.len(), 2);
        assert_eq!(out.overflow.len(), 1);
        assert_eq!(out.overflow[0].level_id, "proj_unassigned");
        assert_eq!(out.overflow[0].difficulty, 2);
    }

    #[test]
    fn levels_group_variants() {
        let alloc = LevelAllocator::new(3, AllocationPolicy::Submission);
        let vs = vec![variant("a"), variant("b"), variant("c"), variant("d"), variant("e")];
        let out = relevel(vs, "proj", &alloc, |_| 0);
        let mut all = out.assigned;
        all.extend(out.overflow);
        let levels = levels_from_variants(&all, "proj", 3);
        let ids: Vec<_> = levels.iter().map(|l| l.level_id.as_str()).collect();
        assert_eq!(ids, vec!["proj_level_01", "proj_level_02", "proj_level_03", "proj_unassigned"]);
        assert_eq!(levels[2].page_ids, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(levels[3].difficulty, 3);
    }
}
