//! # Loop Health
//!
//! Rolling diagnostics over the iteration history that detect a loop going
//! stale: falling novelty, repeated queries, narrowing topics, redundant
//! ideas and a draining queue.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::text::{jaccard, significant_words};

/// Iterations inspected by the windowed checks
pub const HEALTH_WINDOW: usize = 3;
/// Novelty below this is considered exhausted
pub const CRITICAL_NOVELTY: f64 = 25.0;
/// A query used this many times raises a warning
pub const QUERY_REPEAT_LIMIT: usize = 3;
/// Jaccard similarity above which two ideas are near-duplicates
pub const REDUNDANCY_THRESHOLD: f64 = 0.6;
/// Difference in mean new items that counts as a trend
const QUEUE_TREND_MARGIN: f64 = 0.5;
/// Queue length at or below which a shrinking trend warns
const LOW_QUEUE: usize = 2;

/// What the health checks need from one iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationDigest {
    pub novelty: Option<f64>,
    pub queries: Vec<String>,
    /// Batch tags plus gap fields
    pub topics: Vec<String>,
    /// Idea texts (title and description)
    pub ideas: Vec<String>,
    pub new_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    NoveltyTrend,
    QueryDiversity,
    Coverage,
    Redundancy,
    QueueHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub check: HealthCheck,
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoveltyTrend {
    Stable,
    Declining,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    Diverse,
    Narrow,
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTrend {
    Growing,
    Stable,
    Shrinking,
}

/// Two ideas that say nearly the same thing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundantPair {
    pub first: String,
    pub second: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopHealth {
    pub novelty_trend: NoveltyTrend,
    pub recent_novelty: Vec<f64>,
    /// Unique queries / total queries (1.0 with no queries)
    pub query_diversity: f64,
    pub repeated_queries: Vec<String>,
    pub coverage: Coverage,
    pub recent_topics: Vec<String>,
    pub redundant_pairs: Vec<RedundantPair>,
    pub queue_trend: QueueTrend,
    pub alerts: Vec<HealthAlert>,
    pub overall: HealthStatus,
}

impl LoopHealth {
    pub fn is_critical(&self) -> bool {
        self.overall == HealthStatus::Critical
    }

    pub fn critical_alerts(&self) -> usize {
        self.alerts
            .iter()
            .filter(|a| a.level == AlertLevel::Critical)
            .count()
    }
}

/// Diagnose the loop from its full history, current iteration last
pub fn diagnose(history: &[IterationDigest], queue_len: usize) -> LoopHealth {
    let mut alerts = Vec::new();
    let recent = &history[history.len().saturating_sub(HEALTH_WINDOW)..];

    // Novelty trend
    let recent_novelty: Vec<f64> = history
        .iter()
        .filter_map(|d| d.novelty)
        .rev()
        .take(HEALTH_WINDOW)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let novelty_trend = novelty_trend(&recent_novelty);
    match novelty_trend {
        NoveltyTrend::Critical => alerts.push(HealthAlert {
            check: HealthCheck::NoveltyTrend,
            level: AlertLevel::Critical,
            message: format!("Novelty has collapsed: {:?}", recent_novelty),
        }),
        NoveltyTrend::Declining => alerts.push(HealthAlert {
            check: HealthCheck::NoveltyTrend,
            level: AlertLevel::Warning,
            message: format!("Novelty is declining: {:?}", recent_novelty),
        }),
        NoveltyTrend::Stable => {}
    }

    // Query diversity
    let mut query_counts: HashMap<String, usize> = HashMap::new();
    let mut total_queries = 0;
    for query in history.iter().flat_map(|d| d.queries.iter()) {
        total_queries += 1;
        *query_counts.entry(query.trim().to_lowercase()).or_insert(0) += 1;
    }
    let query_diversity = if total_queries == 0 {
        1.0
    } else {
        query_counts.len() as f64 / total_queries as f64
    };
    let mut repeated_queries: Vec<String> = query_counts
        .iter()
        .filter(|(_, count)| **count >= QUERY_REPEAT_LIMIT)
        .map(|(query, _)| query.clone())
        .collect();
    repeated_queries.sort();
    if !repeated_queries.is_empty() {
        alerts.push(HealthAlert {
            check: HealthCheck::QueryDiversity,
            level: AlertLevel::Warning,
            message: format!(
                "Queries repeated {}+ times: {}",
                QUERY_REPEAT_LIMIT,
                repeated_queries.join(", ")
            ),
        });
    }

    // Topic coverage; needs a full window before it can collapse
    let recent_topics: BTreeSet<String> = recent
        .iter()
        .flat_map(|d| d.topics.iter())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let coverage = if recent.len() < HEALTH_WINDOW || recent_topics.len() > 2 {
        Coverage::Diverse
    } else if recent_topics.len() == 2 {
        Coverage::Narrow
    } else {
        Coverage::Stuck
    };
    match coverage {
        Coverage::Stuck => alerts.push(HealthAlert {
            check: HealthCheck::Coverage,
            level: AlertLevel::Critical,
            message: format!(
                "Last {} iterations touched {} topic(s)",
                HEALTH_WINDOW,
                recent_topics.len()
            ),
        }),
        Coverage::Narrow => alerts.push(HealthAlert {
            check: HealthCheck::Coverage,
            level: AlertLevel::Warning,
            message: format!(
                "Topic coverage is narrow: {}",
                recent_topics.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }),
        Coverage::Diverse => {}
    }

    // Idea redundancy across the whole run
    let ideas: Vec<(&str, _)> = history
        .iter()
        .flat_map(|d| d.ideas.iter())
        .map(|idea| (idea.as_str(), significant_words(idea)))
        .filter(|(_, words)| !words.is_empty())
        .collect();
    let mut redundant_pairs = Vec::new();
    for (i, (first, first_words)) in ideas.iter().enumerate() {
        for (second, second_words) in ideas.iter().skip(i + 1) {
            let similarity = jaccard(first_words, second_words);
            if similarity > REDUNDANCY_THRESHOLD {
                redundant_pairs.push(RedundantPair {
                    first: first.to_string(),
                    second: second.to_string(),
                    similarity,
                });
            }
        }
    }
    if !redundant_pairs.is_empty() {
        alerts.push(HealthAlert {
            check: HealthCheck::Redundancy,
            level: AlertLevel::Warning,
            message: format!("{} near-duplicate idea pair(s)", redundant_pairs.len()),
        });
    }

    // Queue trend
    let queue_trend = queue_trend(history);
    if queue_trend == QueueTrend::Shrinking && queue_len <= LOW_QUEUE {
        alerts.push(HealthAlert {
            check: HealthCheck::QueueHealth,
            level: AlertLevel::Warning,
            message: format!("Queue is shrinking with {} item(s) left", queue_len),
        });
    }

    let warnings = alerts
        .iter()
        .filter(|a| a.level == AlertLevel::Warning)
        .count();
    let overall = if alerts.iter().any(|a| a.level == AlertLevel::Critical) {
        HealthStatus::Critical
    } else if warnings >= 2 {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };

    LoopHealth {
        novelty_trend,
        recent_novelty,
        query_diversity,
        repeated_queries,
        coverage,
        recent_topics: recent_topics.into_iter().collect(),
        redundant_pairs,
        queue_trend,
        alerts,
        overall,
    }
}

fn novelty_trend(scores: &[f64]) -> NoveltyTrend {
    let [a, b, c] = match scores {
        [a, b, c] => [*a, *b, *c],
        _ => return NoveltyTrend::Stable,
    };
    let declining = a > b && b > c;
    if scores.iter().all(|s| *s < CRITICAL_NOVELTY) || (declining && c < CRITICAL_NOVELTY) {
        NoveltyTrend::Critical
    } else if declining {
        NoveltyTrend::Declining
    } else {
        NoveltyTrend::Stable
    }
}

fn queue_trend(history: &[IterationDigest]) -> QueueTrend {
    let counts: Vec<f64> = history.iter().map(|d| d.new_items as f64).collect();
    let split = counts.len().saturating_sub(HEALTH_WINDOW);
    let (earlier, recent) = counts.split_at(split);
    let previous = &earlier[earlier.len().saturating_sub(HEALTH_WINDOW)..];
    if previous.is_empty() || recent.is_empty() {
        return QueueTrend::Stable;
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let delta = mean(recent) - mean(previous);
    if delta > QUEUE_TREND_MARGIN {
        QueueTrend::Growing
    } else if delta < -QUEUE_TREND_MARGIN {
        QueueTrend::Shrinking
    } else {
        QueueTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(novelty: f64, topics: &[&str], new_items: usize) -> IterationDigest {
        IterationDigest {
            novelty: Some(novelty),
            queries: Vec::new(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ideas: Vec::new(),
            new_items,
        }
    }

    const VARIED: &[&str] = &["biology", "physics", "chemistry"];

    #[test]
    fn test_healthy_loop() {
        let history = vec![
            digest(70.0, VARIED, 5),
            digest(65.0, VARIED, 5),
            digest(80.0, VARIED, 5),
        ];
        let health = diagnose(&history, 10);
        assert_eq!(health.overall, HealthStatus::Healthy);
        assert!(health.alerts.is_empty());
    }

    #[test]
    fn test_novelty_trends() {
        assert_eq!(novelty_trend(&[60.0, 50.0, 40.0]), NoveltyTrend::Declining);
        assert_eq!(novelty_trend(&[60.0, 40.0, 20.0]), NoveltyTrend::Critical);
        assert_eq!(novelty_trend(&[10.0, 20.0, 24.0]), NoveltyTrend::Critical);
        assert_eq!(novelty_trend(&[60.0, 60.0, 40.0]), NoveltyTrend::Stable);
        assert_eq!(novelty_trend(&[10.0, 5.0]), NoveltyTrend::Stable);
    }

    #[test]
    fn test_collapsed_novelty_is_critical() {
        let history = vec![
            digest(20.0, VARIED, 5),
            digest(15.0, VARIED, 5),
            digest(10.0, VARIED, 5),
        ];
        let health = diagnose(&history, 10);
        assert!(health.is_critical());
        assert_eq!(health.critical_alerts(), 1);
    }

    #[test]
    fn test_repeated_query_warns() {
        let mut history = vec![digest(70.0, VARIED, 5); 3];
        for (i, d) in history.iter_mut().enumerate() {
            d.queries = vec!["Protein Folding".to_string(), format!("q{}", i)];
        }
        let health = diagnose(&history, 10);
        assert_eq!(health.repeated_queries, vec!["protein folding"]);
        assert!((health.query_diversity - 4.0 / 6.0).abs() < 1e-9);
        assert_eq!(health.overall, HealthStatus::Healthy);
    }

    #[test]
    fn test_coverage_needs_full_window() {
        let short = vec![digest(70.0, &["biology"], 5), digest(70.0, &["Biology"], 5)];
        assert_eq!(diagnose(&short, 10).coverage, Coverage::Diverse);

        let stuck = vec![digest(70.0, &["biology"], 5); 3];
        let health = diagnose(&stuck, 10);
        assert_eq!(health.coverage, Coverage::Stuck);
        assert!(health.is_critical());

        let narrow = vec![
            digest(70.0, &["biology"], 5),
            digest(70.0, &["physics"], 5),
            digest(70.0, &["Biology"], 5),
        ];
        assert_eq!(diagnose(&narrow, 10).coverage, Coverage::Narrow);
    }

    #[test]
    fn test_redundant_ideas() {
        let mut first = digest(70.0, VARIED, 5);
        first.ideas = vec!["Attention heads encode residue contact maps".to_string()];
        let mut second = digest(70.0, VARIED, 5);
        second.ideas = vec![
            "Attention heads encode residue contact maps directly".to_string(),
            "Diffusion priors for membrane protein design".to_string(),
        ];
        let health = diagnose(&[first, second], 10);
        assert_eq!(health.redundant_pairs.len(), 1);
        assert!(health.redundant_pairs[0].similarity > REDUNDANCY_THRESHOLD);
    }

    #[test]
    fn test_shrinking_queue_and_two_warnings() {
        let mut history: Vec<IterationDigest> = [6, 6, 6, 1, 0, 0]
            .iter()
            .map(|n| digest(70.0, VARIED, *n))
            .collect();
        history[5].ideas = vec![
            "Graph kernels for crystal lattices".to_string(),
            "Graph kernels for crystal lattices".to_string(),
        ];

        let health = diagnose(&history, 1);
        assert_eq!(health.queue_trend, QueueTrend::Shrinking);
        assert_eq!(health.overall, HealthStatus::Warning);

        let roomy = diagnose(&history, 5);
        assert_eq!(roomy.overall, HealthStatus::Healthy);
    }

    #[test]
    fn test_queue_trend_needs_prior_window() {
        let history: Vec<IterationDigest> =
            [0, 0, 0].iter().map(|n| digest(70.0, VARIED, *n)).collect();
        assert_eq!(queue_trend(&history), QueueTrend::Stable);

        let growing: Vec<IterationDigest> =
            [0, 1, 5, 5].iter().map(|n| digest(70.0, VARIED, *n)).collect();
        assert_eq!(queue_trend(&growing), QueueTrend::Growing);
    }
}
