//! # Grounding Check
//!
//! Lexical heuristics that test whether generated claims relate to the
//! batch they were generated from. Pure; no model call.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::items::WorkItem;
use crate::report::IterationReport;
use crate::text::{loosely_matches, shared_word_count, significant_words};

/// Shared significant words for a gap description to count as grounded
const GAP_WORDS_REQUIRED: usize = 2;
/// Shared significant words for a connection description to count as grounded
const CONNECTION_WORDS_REQUIRED: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Connection,
    Experiment,
}

/// A generated claim with little or no support in the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationFlag {
    pub kind: ClaimKind,
    /// Position within the report's connections or experiments
    pub index: usize,
    pub claim: String,
    pub reason: String,
    pub severity: FlagSeverity,
}

/// Fraction of entries passing a check, as a percentage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub score: f64,
    pub matched: usize,
    pub total: usize,
}

impl Alignment {
    /// An empty set is fully aligned
    fn of(matched: usize, total: usize) -> Self {
        let score = if total == 0 {
            100.0
        } else {
            matched as f64 / total as f64 * 100.0
        };
        Self {
            score,
            matched,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingReport {
    /// Gaps whose declared field matches a batch topic tag
    pub field_alignment: Alignment,
    /// Gaps whose description shares enough words with the batch
    pub gap_grounding: Alignment,
    pub flags: Vec<HallucinationFlag>,
    /// 0.4 field alignment + 0.4 gap grounding + 0.2 * 100 / (1 + flags)
    pub trust_score: f64,
}

pub fn check_grounding(report: &IterationReport, batch: &[WorkItem]) -> GroundingReport {
    let tags: Vec<&str> = batch
        .iter()
        .flat_map(|item| item.tags.iter().map(String::as_str))
        .collect();
    let batch_words: HashSet<String> = batch
        .iter()
        .flat_map(|item| significant_words(&item.text()))
        .collect();
    let matches_tag = |field: &str| tags.iter().any(|tag| loosely_matches(field, tag));

    let fields_matched = report.gaps.iter().filter(|g| matches_tag(&g.field)).count();
    let descriptions_grounded = report
        .gaps
        .iter()
        .filter(|g| {
            let text = if g.description.is_empty() {
                &g.title
            } else {
                &g.description
            };
            shared_word_count(text, &batch_words) >= GAP_WORDS_REQUIRED
        })
        .count();

    let mut flags = Vec::new();

    for (index, connection) in report.connections.iter().enumerate() {
        let field_grounded = matches_tag(&connection.source_field)
            || shared_word_count(&connection.source_field, &batch_words) > 0;
        let description_grounded =
            shared_word_count(&connection.description, &batch_words) >= CONNECTION_WORDS_REQUIRED;

        let (severity, reason) = match (field_grounded, description_grounded) {
            (true, true) => continue,
            (false, false) => (
                FlagSeverity::High,
                "Neither the source field nor the description appears in the batch",
            ),
            (false, true) => (
                FlagSeverity::Medium,
                "Source field does not appear in the batch",
            ),
            (true, false) => (
                FlagSeverity::Medium,
                "Description shares too few words with the batch",
            ),
        };
        flags.push(HallucinationFlag {
            kind: ClaimKind::Connection,
            index,
            claim: format!("{} -> {}", connection.source_field, connection.target_field),
            reason: reason.to_string(),
            severity,
        });
    }

    for (index, experiment) in report.experiments.iter().enumerate() {
        let severity = match shared_word_count(&experiment.text(), &batch_words) {
            0 => FlagSeverity::Medium,
            1 => FlagSeverity::Low,
            _ => continue,
        };
        flags.push(HallucinationFlag {
            kind: ClaimKind::Experiment,
            index,
            claim: experiment.title.clone(),
            reason: "Experiment content has little overlap with the batch".to_string(),
            severity,
        });
    }

    let field_alignment = Alignment::of(fields_matched, report.gaps.len());
    let gap_grounding = Alignment::of(descriptions_grounded, report.gaps.len());
    let trust_score = 0.4 * field_alignment.score
        + 0.4 * gap_grounding.score
        + 0.2 * (100.0 / (1.0 + flags.len() as f64));

    GroundingReport {
        field_alignment,
        gap_grounding,
        flags,
        trust_score,
    }
}
