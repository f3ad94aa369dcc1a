//! # Candidate Fetch & Score
//!
//! Turns an iteration report into new queue entries.
//!
//! ```text
//! IterationReport ──▶ extract_queries ──▶ sources (sequential, delayed) ──▶ dedup ──▶ score ──▶ top N
//! ```

pub mod fetcher;
pub mod queries;
pub mod scoring;
pub mod sources;

pub use fetcher::{topic_counts, CandidateFetcher, FetchConfig, FetchContext};
pub use queries::extract_queries;
pub use scoring::{score, ScoreBreakdown, ScoringContext};
pub use sources::{DiscoverySource, OpenAlexSource, SemanticScholarSource, SourceError};

use std::sync::Arc;

/// Both public sources, configured from the environment
pub fn default_sources() -> Vec<Arc<dyn DiscoverySource>> {
    vec![
        Arc::new(SemanticScholarSource::from_env()),
        Arc::new(OpenAlexSource::from_env()),
    ]
}
