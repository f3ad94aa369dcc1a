//! # Agent Pipeline
//!
//! Runs an [`AgentRegistry`](crate::agents::AgentRegistry) over a batch of
//! work items.
//!
//! ## Execution Flow
//!
//! ```text
//! registry ──▶ compute_phases ──▶ [phase 1] ──▶ [phase 2] ──▶ ... ──▶ sweep ──▶ OutputMap
//!                                   │ │ │         │ │
//!                                   concurrent tasks, each awaited independently
//! ```
//!
//! A failing task records `{ "error": ... }` under its id; nothing else is
//! aborted. Downstream tasks simply see that input as absent.

pub mod executor;
pub mod phases;

pub use executor::{PipelineConfig, PipelineExecutor};
pub use phases::{compute_phases, PhasePlan};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of one task: its parsed output or an error marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Error { error: String },
    Success(serde_json::Value),
}

impl AgentOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The parsed output, if the task succeeded
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Error { .. } => None,
        }
    }
}

/// Outputs of one pipeline run keyed by task id
pub type OutputMap = BTreeMap<String, AgentOutput>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_marker_serialization() {
        let output = AgentOutput::error("timeout");
        assert_eq!(serde_json::to_value(&output).unwrap(), json!({"error": "timeout"}));
    }

    #[test]
    fn test_success_serializes_transparently() {
        let output = AgentOutput::Success(json!({"gaps": []}));
        assert_eq!(serde_json::to_value(&output).unwrap(), json!({"gaps": []}));
        assert!(!output.is_error());
        assert!(output.value().is_some());
    }
}
