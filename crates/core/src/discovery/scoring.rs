//! # Candidate Scoring
//!
//! Weighted sum of normalized signals, bounded to 0..=100. The weights are
//! policy; every signal is non-decreasing in its input.
//!
//! | Signal     | Weight | Normalization                               |
//! |------------|--------|---------------------------------------------|
//! | popularity | 30     | `log10(count + 1) / 4`, capped at 1         |
//! | recency    | 20     | age buckets 1y / 3y / 5y / 10y              |
//! | overlap    | 25     | significant words shared with report / 10   |
//! | diversity  | 15     | best `1 / (1 + times seen)` over tags       |
//! | guidance   | 10     | fraction of guidance keywords present       |

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::items::WorkItem;
use crate::text::significant_words;

pub const POPULARITY_WEIGHT: f64 = 30.0;
pub const RECENCY_WEIGHT: f64 = 20.0;
pub const OVERLAP_WEIGHT: f64 = 25.0;
pub const DIVERSITY_WEIGHT: f64 = 15.0;
pub const GUIDANCE_WEIGHT: f64 = 10.0;

/// Shared words at which the overlap signal saturates
const OVERLAP_SATURATION: f64 = 10.0;

/// Inputs shared by every candidate of one fetch pass
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    report_words: HashSet<String>,
    guidance_words: HashSet<String>,
    /// Lowercased tag -> times seen among explored items
    topic_counts: HashMap<String, usize>,
    current_year: i32,
}

impl ScoringContext {
    pub fn new(
        report_text: &str,
        guidance: Option<&str>,
        topic_counts: &HashMap<String, usize>,
        current_year: i32,
    ) -> Self {
        Self {
            report_words: significant_words(report_text),
            guidance_words: guidance.map(significant_words).unwrap_or_default(),
            topic_counts: topic_counts
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
            current_year,
        }
    }
}

/// Per-signal contributions, already weighted
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub popularity: f64,
    pub recency: f64,
    pub overlap: f64,
    pub diversity: f64,
    pub guidance: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.popularity + self.recency + self.overlap + self.diversity + self.guidance)
            .clamp(0.0, 100.0)
    }
}

pub fn breakdown(item: &WorkItem, ctx: &ScoringContext) -> ScoreBreakdown {
    let words = significant_words(&item.text());

    let popularity = ((item.popularity as f64 + 1.0).log10() / 4.0).min(1.0);

    let recency = item
        .year
        .map(|year| recency_factor(ctx.current_year - year))
        .unwrap_or(0.0);

    let shared = words.intersection(&ctx.report_words).count() as f64;
    let overlap = (shared / OVERLAP_SATURATION).min(1.0);

    let diversity = item
        .tags
        .iter()
        .map(|tag| {
            let seen = ctx
                .topic_counts
                .get(&tag.to_lowercase())
                .copied()
                .unwrap_or(0);
            1.0 / (1.0 + seen as f64)
        })
        .fold(0.0, f64::max);

    let guidance = if ctx.guidance_words.is_empty() {
        0.0
    } else {
        ctx.guidance_words.intersection(&words).count() as f64 / ctx.guidance_words.len() as f64
    };

    ScoreBreakdown {
        popularity: popularity * POPULARITY_WEIGHT,
        recency: recency * RECENCY_WEIGHT,
        overlap: overlap * OVERLAP_WEIGHT,
        diversity: diversity * DIVERSITY_WEIGHT,
        guidance: guidance * GUIDANCE_WEIGHT,
    }
}

/// Score a candidate in 0..=100
pub fn score(item: &WorkItem, ctx: &ScoringContext) -> f64 {
    breakdown(item, ctx).total()
}

fn recency_factor(age: i32) -> f64 {
    match age {
        a if a <= 1 => 1.0,
        a if a <= 3 => 0.7,
        a if a <= 5 => 0.4,
        a if a <= 10 => 0.2,
        _ => 0.0,
    }
}
