//! # Checkpoints
//!
//! When the loop should stop for a human, and what to show them when it
//! does. Both functions are pure; the engine owns the actual pause.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::health::LoopHealth;
use super::{VerificationResult, VerificationSettings};
use crate::report::{Direction, Gap, Hypothesis, Impact, IterationReport, Potential, Severity};

/// Iterations a checkpoint summary looks back over
pub const SUMMARY_WINDOW: usize = 10;
/// Entries kept per findings list
const MAX_FINDINGS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Iteration id hit the configured interval
    Scheduled,
    /// Loop health went critical with pause-on-critical enabled
    CriticalHealth,
}

/// Decide whether iteration `iteration_id` ends in a checkpoint
pub fn checkpoint_reason(
    iteration_id: u32,
    health: Option<&LoopHealth>,
    settings: &VerificationSettings,
) -> Option<CheckpointReason> {
    if settings.pause_on_critical && health.is_some_and(LoopHealth::is_critical) {
        return Some(CheckpointReason::CriticalHealth);
    }
    let interval = settings.checkpoint_interval;
    if interval > 0 && iteration_id > 0 && iteration_id % interval == 0 {
        return Some(CheckpointReason::Scheduled);
    }
    None
}

/// One iteration as seen by the summary builder
#[derive(Debug, Clone, Copy)]
pub struct SummaryEntry<'a> {
    pub report: &'a IterationReport,
    pub verification: Option<&'a VerificationResult>,
    pub batch_size: usize,
}

/// Findings and aggregates for human review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub iterations_reviewed: usize,
    pub items_processed: usize,
    pub breakthrough_ideas: Vec<Hypothesis>,
    pub critical_gaps: Vec<Gap>,
    pub promising_directions: Vec<Direction>,
    pub avg_novelty: Option<f64>,
    pub avg_trust: Option<f64>,
    pub total_flags: usize,
}

/// Summarize the most recent iterations (oldest first in `entries`)
pub fn build_summary(entries: &[SummaryEntry<'_>]) -> CheckpointSummary {
    let window = &entries[entries.len().saturating_sub(SUMMARY_WINDOW)..];

    let mut summary = CheckpointSummary {
        iterations_reviewed: window.len(),
        items_processed: window.iter().map(|e| e.batch_size).sum(),
        ..CheckpointSummary::default()
    };

    let mut seen_ideas = HashSet::new();
    let mut seen_gaps = HashSet::new();
    let mut seen_directions = HashSet::new();

    // Newest first so the freshest findings win the limited slots
    for entry in window.iter().rev() {
        for idea in &entry.report.hypotheses {
            if idea.impact == Impact::Breakthrough
                && summary.breakthrough_ideas.len() < MAX_FINDINGS
                && seen_ideas.insert(idea.title.to_lowercase())
            {
                summary.breakthrough_ideas.push(idea.clone());
            }
        }
        for gap in &entry.report.gaps {
            if gap.severity == Severity::Critical
                && !gap.resolved
                && summary.critical_gaps.len() < MAX_FINDINGS
                && seen_gaps.insert(gap.title.to_lowercase())
            {
                summary.critical_gaps.push(gap.clone());
            }
        }
        for direction in &entry.report.directions {
            if direction.potential == Potential::High
                && summary.promising_directions.len() < MAX_FINDINGS
                && seen_directions.insert(direction.direction.to_lowercase())
            {
                summary.promising_directions.push(direction.clone());
            }
        }
    }

    let novelty: Vec<f64> = window
        .iter()
        .filter_map(|e| e.verification.and_then(VerificationResult::novelty_score))
        .collect();
    let trust: Vec<f64> = window
        .iter()
        .filter_map(|e| e.verification.and_then(VerificationResult::trust_score))
        .collect();

    summary.avg_novelty = mean(&novelty);
    summary.avg_trust = mean(&trust);
    summary.total_flags = window
        .iter()
        .filter_map(|e| e.verification)
        .map(VerificationResult::flag_count)
        .sum();
    summary
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::grounding::check_grounding;
    use crate::verification::health::{diagnose, IterationDigest};
    use crate::verification::plausibility::PlausibilityReport;

    fn settings(interval: u32, pause_on_critical: bool) -> VerificationSettings {
        VerificationSettings {
            checkpoint_interval: interval,
            pause_on_critical,
            ..VerificationSettings::default()
        }
    }

    #[test]
    fn test_interval_of_five() {
        let settings = settings(5, true);
        let triggered: Vec<u32> = (1..=16)
            .filter(|id| checkpoint_reason(*id, None, &settings).is_some())
            .collect();
        assert_eq!(triggered, vec![5, 10, 15]);
    }

    #[test]
    fn test_zero_interval_disables_schedule() {
        assert!(checkpoint_reason(5, None, &settings(0, true)).is_none());
    }

    #[test]
    fn test_critical_health_respects_setting() {
        let stuck = vec![
            IterationDigest {
                novelty: Some(10.0),
                ..IterationDigest::default()
            };
            3
        ];
        let health = diagnose(&stuck, 5);
        assert!(health.is_critical());

        assert_eq!(
            checkpoint_reason(3, Some(&health), &settings(5, true)),
            Some(CheckpointReason::CriticalHealth)
        );
        assert_eq!(checkpoint_reason(3, Some(&health), &settings(5, false)), None);
    }

    fn idea(title: &str, impact: Impact) -> Hypothesis {
        Hypothesis {
            title: title.to_string(),
            description: String::new(),
            rationale: String::new(),
            impact,
        }
    }

    #[test]
    fn test_summary_collects_findings() {
        let first = IterationReport {
            hypotheses: vec![
                idea("Contact maps from attention", Impact::Breakthrough),
                idea("Minor tweak", Impact::Incremental),
            ],
            gaps: vec![Gap {
                title: "No membrane data".to_string(),
                description: String::new(),
                field: "Biology".to_string(),
                severity: Severity::Critical,
                resolved: false,
            }],
            ..IterationReport::default()
        };
        let second = IterationReport {
            hypotheses: vec![idea("contact maps from attention", Impact::Breakthrough)],
            directions: vec![Direction {
                direction: "Diffusion for design".to_string(),
                potential: Potential::High,
                rationale: String::new(),
            }],
            ..IterationReport::default()
        };

        let verification = VerificationResult {
            plausibility: Some(PlausibilityReport::neutral("n/a")),
            grounding: Some(check_grounding(&IterationReport::default(), &[])),
            health: None,
        };

        let entries = vec![
            SummaryEntry {
                report: &first,
                verification: Some(&verification),
                batch_size: 2,
            },
            SummaryEntry {
                report: &second,
                verification: None,
                batch_size: 2,
            },
        ];
        let summary = build_summary(&entries);

        assert_eq!(summary.iterations_reviewed, 2);
        assert_eq!(summary.items_processed, 4);
        assert_eq!(summary.breakthrough_ideas.len(), 1);
        assert_eq!(summary.critical_gaps.len(), 1);
        assert_eq!(summary.promising_directions.len(), 1);
        assert_eq!(summary.avg_novelty, Some(50.0));
        assert_eq!(summary.avg_trust, Some(100.0));
        assert_eq!(summary.total_flags, 0);
    }

    #[test]
    fn test_summary_window() {
        let report = IterationReport::default();
        let entries: Vec<SummaryEntry> = (0..15)
            .map(|_| SummaryEntry {
                report: &report,
                verification: None,
                batch_size: 1,
            })
            .collect();
        let summary = build_summary(&entries);
        assert_eq!(summary.iterations_reviewed, SUMMARY_WINDOW);
        assert_eq!(summary.avg_novelty, None);
    }
}
