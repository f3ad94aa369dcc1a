//! # Candidate Fetcher
//!
//! Issues queries against every configured source, drops anything already
//! explored, queued or seen earlier in the same pass, scores the rest and
//! keeps the top N.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::scoring::{score, ScoringContext};
use super::sources::DiscoverySource;
use crate::items::WorkItem;
use crate::report::IterationReport;
use crate::retry::RetryPolicy;

/// Fetch policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Queries derived per iteration
    pub max_queries: usize,
    /// Candidates kept per iteration
    pub top_n: usize,
    /// Results requested from each source per query
    pub results_per_query: usize,
    /// Pause between consecutive source calls
    pub request_delay_ms: u64,
    /// Applied to each source call; only rate limiting is retried
    pub rate_limit_retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_queries: 5,
            top_n: 5,
            results_per_query: 10,
            request_delay_ms: 1000,
            rate_limit_retry: RetryPolicy::once_after(Duration::from_secs(3)),
        }
    }
}

impl FetchConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Engine-owned state the fetcher reads
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub guidance: Option<&'a str>,
    pub explored: &'a HashSet<String>,
    pub queued: &'a HashSet<String>,
    /// Tag -> times seen among explored items
    pub topic_counts: &'a HashMap<String, usize>,
}

/// Sequential multi-source search with dedup and ranking
#[derive(Clone)]
pub struct CandidateFetcher {
    sources: Vec<Arc<dyn DiscoverySource>>,
    config: FetchConfig,
}

impl CandidateFetcher {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>) -> Self {
        Self {
            sources,
            config: FetchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Search, dedupe, score and rank.
    ///
    /// Returns at most `top_n` items sorted by score descending; equal
    /// scores keep first-seen order. Source failures count as no results.
    #[tracing::instrument(skip_all, fields(queries = queries.len()))]
    pub async fn fetch_and_score(
        &self,
        queries: &[String],
        report: &IterationReport,
        ctx: &FetchContext<'_>,
    ) -> Vec<WorkItem> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<WorkItem> = Vec::new();
        let mut raw_results = 0usize;
        let mut first_call = true;

        for query in queries.iter().take(self.config.max_queries) {
            for source in &self.sources {
                if !first_call {
                    tokio::time::sleep(self.config.request_delay()).await;
                }
                first_call = false;

                let results = self.search_source(source.as_ref(), query).await;
                raw_results += results.len();
                for item in results {
                    if ctx.explored.contains(&item.id)
                        || ctx.queued.contains(&item.id)
                        || !seen.insert(item.id.clone())
                    {
                        continue;
                    }
                    candidates.push(item);
                }
            }
        }

        let scoring = ScoringContext::new(
            &report.text(),
            ctx.guidance,
            ctx.topic_counts,
            chrono::Utc::now().year(),
        );

        let mut ranked: Vec<WorkItem> = candidates
            .into_iter()
            .map(|mut item| {
                item.score = Some(score(&item, &scoring));
                item
            })
            .collect();
        ranked.sort_by(|a, b| {
            let a = a.score.unwrap_or(0.0);
            let b = b.score.unwrap_or(0.0);
            b.total_cmp(&a)
        });
        ranked.truncate(self.config.top_n);

        tracing::info!(
            raw = raw_results,
            unique = seen.len(),
            kept = ranked.len(),
            "Candidate fetch finished"
        );
        ranked
    }

    async fn search_source(&self, source: &dyn DiscoverySource, query: &str) -> Vec<WorkItem> {
        let limit = self.config.results_per_query;
        match self
            .config
            .rate_limit_retry
            .run(move || source.search(query, limit))
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(
                    source = source.name(),
                    query,
                    error = %e,
                    "Discovery source failed; counting as no results"
                );
                Vec::new()
            }
        }
    }
}

/// Count tags across items, keyed lowercase
pub fn topic_counts<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for item in items {
        for tag in &item.tags {
            *counts.entry(tag.to_lowercase()).or_insert(0) += 1;
        }
    }
    counts
}
