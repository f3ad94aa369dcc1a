//! # Engine Events
//!
//! The closed set of observations the engine publishes. Every event for one
//! engine instance goes through a single channel, so consumers see them in
//! emission order. Events are informational; control only happens through
//! the engine's methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::{Checkpoint, CheckpointDecision, EngineState, Iteration};
use crate::items::WorkItem;
use crate::pipeline::OutputMap;
use crate::verification::{VerificationResult, VerificationStats};

/// Kind of engine event, with its payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    /// Engine state transitioned
    StatusChanged { state: EngineState },
    /// A batch was drawn and the pipeline is about to run
    IterationStarted {
        iteration_id: u32,
        batch: Vec<WorkItem>,
    },
    /// Iteration record appended to history (verification attached if run)
    IterationCompleted { iteration: Box<Iteration> },
    /// Agent task dispatched
    AgentStarted { agent_id: String },
    /// Agent task produced an output
    AgentCompleted {
        agent_id: String,
        output: serde_json::Value,
        duration_ms: u64,
    },
    /// Agent task failed; its output is an error marker
    AgentFailed {
        agent_id: String,
        error: String,
        duration_ms: u64,
    },
    /// Pipeline finalized (exactly once per pipeline run)
    PipelineCompleted { outputs: OutputMap },
    /// Queue contents changed
    QueueChanged { queue: Vec<WorkItem> },
    /// Cooldown countdown tick
    Cooldown { remaining_ms: u64 },
    /// Verification checks finished for an iteration
    VerificationCompleted {
        iteration_id: u32,
        verification: VerificationResult,
    },
    /// Loop is blocked awaiting a checkpoint decision
    CheckpointTriggered { checkpoint: Checkpoint },
    /// Checkpoint decision applied
    CheckpointResolved {
        iteration_id: u32,
        decision: CheckpointDecision,
        #[serde(default)]
        feedback: Option<String>,
    },
    /// Aggregate verification stats changed
    VerificationStatsUpdated { stats: VerificationStats },
}

/// An event emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    #[serde(flatten)]
    pub kind: EngineEventKind,
}

impl EngineEvent {
    /// Create a new event
    pub fn new(kind: EngineEventKind) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Cheap cloneable handle to the engine's event channel
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// An emitter that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit an event. A closed receiver is not an error for the engine.
    pub fn emit(&self, kind: EngineEventKind) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(EngineEvent::new(kind));
        }
    }
}

/// Time-ordered event id
fn event_id() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::new(EngineEventKind::Cooldown { remaining_ms: 3000 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cooldown");
        assert_eq!(json["remaining_ms"], 3000);
        assert!(json.get("id").is_some());
    }

    #[test]
    fn test_emitter_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(tx);

        emitter.emit(EngineEventKind::AgentStarted {
            agent_id: "a".to_string(),
        });
        emitter.emit(EngineEventKind::AgentStarted {
            agent_id: "b".to_string(),
        });

        let ids: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e.kind {
                EngineEventKind::AgentStarted { agent_id } => Some(agent_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_disabled_emitter_is_silent() {
        EventEmitter::disabled().emit(EngineEventKind::Cooldown { remaining_ms: 0 });
    }
}
