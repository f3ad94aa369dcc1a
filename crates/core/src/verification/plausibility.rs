//! # Plausibility Check
//!
//! One model call that rates each proposed idea for novelty, evidence and
//! feasibility. Any failure degrades to a neutral report; this check never
//! errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::items::{digest, WorkItem};
use crate::llm::{extract_json, CallOptions, ChatMessage, ModelClient};
use crate::prompts;
use crate::report::Hypothesis;

/// Score used whenever no assessment is available
pub const NEUTRAL_NOVELTY: f64 = 50.0;

/// Characters of each paper's content included in the digest
const DIGEST_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Novelty {
    Novel,
    Incremental,
    Known,
}

impl Novelty {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "novel" | "new" => Some(Self::Novel),
            "incremental" => Some(Self::Incremental),
            "known" | "established" => Some(Self::Known),
            _ => None,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::Novel => 100.0,
            Self::Incremental => 50.0,
            Self::Known => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Evidence {
    Strong,
    Moderate,
    Weak,
    Unsupported,
}

impl Evidence {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Some(Self::Strong),
            "moderate" => Some(Self::Moderate),
            "weak" => Some(Self::Weak),
            "unsupported" | "none" => Some(Self::Unsupported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feasibility {
    Feasible,
    Challenging,
    Infeasible,
}

impl Feasibility {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feasible" => Some(Self::Feasible),
            "challenging" => Some(Self::Challenging),
            "infeasible" => Some(Self::Infeasible),
            _ => None,
        }
    }
}

/// Verdict for one idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaAssessment {
    /// Position of the idea in the iteration's hypothesis list
    pub index: usize,
    pub novelty: Novelty,
    pub evidence: Evidence,
    pub feasibility: Feasibility,
    #[serde(default)]
    pub comment: String,
}

impl IdeaAssessment {
    /// Weak on at least two of the three dimensions
    pub fn is_flagged(&self) -> bool {
        let weak = [
            self.novelty == Novelty::Known,
            matches!(self.evidence, Evidence::Weak | Evidence::Unsupported),
            self.feasibility == Feasibility::Infeasible,
        ];
        weak.iter().filter(|w| **w).count() >= 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityReport {
    pub assessments: Vec<IdeaAssessment>,
    /// Aggregate novelty, 0-100
    pub novelty_score: f64,
    /// Indices of flagged ideas
    pub flagged: Vec<usize>,
    pub summary: String,
}

impl PlausibilityReport {
    pub fn neutral(summary: impl Into<String>) -> Self {
        Self {
            assessments: Vec::new(),
            novelty_score: NEUTRAL_NOVELTY,
            flagged: Vec::new(),
            summary: summary.into(),
        }
    }
}

/// Model-backed idea reviewer
#[derive(Clone)]
pub struct PlausibilityChecker {
    model: Arc<dyn ModelClient>,
    options: CallOptions,
}

impl PlausibilityChecker {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            options: CallOptions {
                temperature: 0.2,
                max_tokens: 2048,
            },
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn check(&self, ideas: &[Hypothesis], batch: &[WorkItem]) -> PlausibilityReport {
        if ideas.is_empty() {
            return PlausibilityReport::neutral("No ideas were proposed in this iteration.");
        }

        let listing = ideas
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if h.description.is_empty() {
                    format!("{}. {}", i, h.title)
                } else {
                    format!("{}. {}: {}", i, h.title, h.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let message = format!(
            "## Ideas\n\n{}\n\n## Source papers\n\n{}",
            listing,
            digest(batch, DIGEST_CHARS)
        );

        let raw = match self
            .model
            .call(
                prompts::PLAUSIBILITY_CHECKER,
                &[ChatMessage::user(message)],
                &self.options,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Plausibility call failed; using neutral assessment");
                return PlausibilityReport::neutral(format!("Plausibility check unavailable: {}", e));
            }
        };

        parse_plausibility(&raw, ideas.len()).unwrap_or_else(|| {
            tracing::warn!("Plausibility reply could not be parsed; using neutral assessment");
            PlausibilityReport::neutral("Plausibility reply could not be parsed.")
        })
    }
}

/// Parse a reviewer reply. `None` when it holds nothing usable.
pub fn parse_plausibility(raw: &str, idea_count: usize) -> Option<PlausibilityReport> {
    let value = extract_json(raw)?;

    let assessments: Vec<IdeaAssessment> = value
        .get("assessments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .filter_map(|(position, entry)| {
            let index = entry
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            if index >= idea_count {
                return None;
            }
            let field = |key: &str| entry.get(key).and_then(Value::as_str).unwrap_or_default();
            Some(IdeaAssessment {
                index,
                novelty: Novelty::parse(field("novelty"))?,
                evidence: Evidence::parse(field("evidence"))?,
                feasibility: Feasibility::parse(field("feasibility"))?,
                comment: field("comment").to_string(),
            })
        })
        .collect();

    let stated_score = value
        .get("novelty_score")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite());

    if assessments.is_empty() && stated_score.is_none() {
        return None;
    }

    let novelty_score = match stated_score {
        Some(score) => score.clamp(0.0, 100.0),
        None => {
            assessments.iter().map(|a| a.novelty.score()).sum::<f64>() / assessments.len() as f64
        }
    };

    let flagged = assessments
        .iter()
        .filter(|a| a.is_flagged())
        .map(|a| a.index)
        .collect();

    Some(PlausibilityReport {
        assessments,
        novelty_score,
        flagged,
        summary: value
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
