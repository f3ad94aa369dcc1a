//! # Verification Engine
//!
//! Per-iteration quality control. Three checks, each skippable on its own:
//!
//! - **Plausibility**: one model call rating the proposed ideas
//! - **Grounding**: lexical overlap between claims and the batch
//! - **Loop health**: trends over the iteration history
//!
//! Plausibility and grounding are independent and run concurrently. Loop
//! health runs afterwards because it consumes the novelty score.

pub mod checkpoint;
pub mod grounding;
pub mod health;
pub mod plausibility;

pub use checkpoint::{
    build_summary, checkpoint_reason, CheckpointReason, CheckpointSummary, SummaryEntry,
    SUMMARY_WINDOW,
};
pub use grounding::{check_grounding, GroundingReport, HallucinationFlag};
pub use health::{diagnose, HealthStatus, IterationDigest, LoopHealth};
pub use plausibility::{PlausibilityChecker, PlausibilityReport};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::items::WorkItem;
use crate::llm::{CallOptions, ModelClient};
use crate::report::IterationReport;

/// Outputs of the checks that ran for one iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub plausibility: Option<PlausibilityReport>,
    pub grounding: Option<GroundingReport>,
    pub health: Option<LoopHealth>,
}

impl VerificationResult {
    pub fn novelty_score(&self) -> Option<f64> {
        self.plausibility.as_ref().map(|p| p.novelty_score)
    }

    pub fn trust_score(&self) -> Option<f64> {
        self.grounding.as_ref().map(|g| g.trust_score)
    }

    /// Hallucination flags plus flagged ideas
    pub fn flag_count(&self) -> usize {
        self.grounding.as_ref().map_or(0, |g| g.flags.len())
            + self.plausibility.as_ref().map_or(0, |p| p.flagged.len())
    }
}

/// Which checks run and when the loop pauses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSettings {
    pub enabled: bool,
    pub plausibility: bool,
    pub grounding: bool,
    pub loop_health: bool,
    /// Checkpoint every N iterations; 0 disables scheduled checkpoints
    pub checkpoint_interval: u32,
    pub pause_on_critical: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            plausibility: true,
            grounding: true,
            loop_health: true,
            checkpoint_interval: 5,
            pause_on_critical: true,
        }
    }
}

/// Partial update; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSettingsPatch {
    pub enabled: Option<bool>,
    pub plausibility: Option<bool>,
    pub grounding: Option<bool>,
    pub loop_health: Option<bool>,
    pub checkpoint_interval: Option<u32>,
    pub pause_on_critical: Option<bool>,
}

impl VerificationSettings {
    /// Merge a patch (patch values take precedence)
    pub fn merge(&mut self, patch: &VerificationSettingsPatch) {
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
        if let Some(v) = patch.plausibility {
            self.plausibility = v;
        }
        if let Some(v) = patch.grounding {
            self.grounding = v;
        }
        if let Some(v) = patch.loop_health {
            self.loop_health = v;
        }
        if let Some(v) = patch.checkpoint_interval {
            self.checkpoint_interval = v;
        }
        if let Some(v) = patch.pause_on_critical {
            self.pause_on_critical = v;
        }
    }
}

/// Running totals across verified iterations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationStats {
    pub verified_iterations: u32,
    pub avg_novelty: Option<f64>,
    pub avg_trust: Option<f64>,
    pub total_flags: usize,
    pub critical_alerts: usize,
    pub checkpoints_triggered: u32,
    #[serde(skip)]
    novelty_samples: u32,
    #[serde(skip)]
    trust_samples: u32,
}

impl VerificationStats {
    pub fn record(&mut self, result: &VerificationResult) {
        self.verified_iterations += 1;
        if let Some(novelty) = result.novelty_score() {
            self.avg_novelty = Some(running_mean(self.avg_novelty, self.novelty_samples, novelty));
            self.novelty_samples += 1;
        }
        if let Some(trust) = result.trust_score() {
            self.avg_trust = Some(running_mean(self.avg_trust, self.trust_samples, trust));
            self.trust_samples += 1;
        }
        self.total_flags += result.flag_count();
        self.critical_alerts += result.health.as_ref().map_or(0, LoopHealth::critical_alerts);
    }

    pub fn record_checkpoint(&mut self) {
        self.checkpoints_triggered += 1;
    }
}

fn running_mean(current: Option<f64>, samples: u32, value: f64) -> f64 {
    match current {
        Some(mean) => mean + (value - mean) / (samples as f64 + 1.0),
        None => value,
    }
}

/// Runs the enabled checks for one iteration
#[derive(Clone)]
pub struct VerificationEngine {
    plausibility: PlausibilityChecker,
}

impl VerificationEngine {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            plausibility: PlausibilityChecker::new(model),
        }
    }

    pub fn with_call_options(mut self, options: CallOptions) -> Self {
        self.plausibility = self.plausibility.with_options(options);
        self
    }

    /// Verify the current iteration.
    ///
    /// `prior` holds digests of earlier iterations; `current` is this
    /// iteration's digest, whose novelty is filled from the plausibility
    /// result before loop health runs. Returns `None` when verification is
    /// disabled.
    pub async fn verify(
        &self,
        settings: &VerificationSettings,
        report: &IterationReport,
        batch: &[WorkItem],
        prior: &[IterationDigest],
        mut current: IterationDigest,
        queue_len: usize,
    ) -> Option<VerificationResult> {
        if !settings.enabled {
            return None;
        }

        let plausibility = async {
            if settings.plausibility {
                Some(self.plausibility.check(&report.hypotheses, batch).await)
            } else {
                None
            }
        };
        let grounding = async {
            if settings.grounding {
                Some(check_grounding(report, batch))
            } else {
                None
            }
        };
        let (plausibility, grounding) = tokio::join!(plausibility, grounding);

        let health = if settings.loop_health {
            current.novelty = plausibility.as_ref().map(|p| p.novelty_score);
            let mut history = prior.to_vec();
            history.push(current);
            Some(diagnose(&history, queue_len))
        } else {
            None
        };

        tracing::debug!(
            novelty = ?plausibility.as_ref().map(|p| p.novelty_score),
            trust = ?grounding.as_ref().map(|g| g.trust_score),
            health = ?health.as_ref().map(|h| h.overall),
            "Verification finished"
        );

        Some(VerificationResult {
            plausibility,
            grounding,
            health,
        })
    }
}
