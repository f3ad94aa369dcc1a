//! Engine-owned state: lifecycle, iteration records, checkpoints and the
//! work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::discovery::topic_counts;
use crate::items::WorkItem;
use crate::pipeline::OutputMap;
use crate::report::IterationReport;
use crate::verification::{CheckpointReason, CheckpointSummary, IterationDigest, VerificationResult};

/// Engine lifecycle
///
/// ```text
/// idle ──▶ running ──▶ paused ──▶ running
///             │  ▲        │
///             ▼  │        ▼
///         checkpoint ──▶ stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Checkpoint,
}

/// One pass of the loop. Append-only; only `verification` is attached later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// 1-based, strictly increasing within a run
    pub id: u32,
    pub batch: Vec<WorkItem>,
    pub outputs: OutputMap,
    pub queries_used: Vec<String>,
    pub new_items_found: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub verification: Option<VerificationResult>,
}

impl Iteration {
    pub fn report(&self) -> IterationReport {
        IterationReport::from_outputs(&self.outputs)
    }

    /// What loop health needs from this iteration
    pub fn digest(&self, report: &IterationReport) -> IterationDigest {
        let mut topics: Vec<String> = self
            .batch
            .iter()
            .flat_map(|item| item.tags.iter().cloned())
            .collect();
        topics.extend(
            report
                .gaps
                .iter()
                .filter(|g| !g.field.is_empty())
                .map(|g| g.field.clone()),
        );

        IterationDigest {
            novelty: self.verification.as_ref().and_then(|v| v.novelty_score()),
            queries: self.queries_used.clone(),
            topics,
            ideas: report.hypotheses.iter().map(|h| h.text()).collect(),
            new_items: self.new_items_found,
        }
    }
}

/// Human decision at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointDecision {
    Continue,
    Redirect,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointResolution {
    #[default]
    Pending,
    Continue,
    Redirect,
    Stop,
}

impl From<CheckpointDecision> for CheckpointResolution {
    fn from(decision: CheckpointDecision) -> Self {
        match decision {
            CheckpointDecision::Continue => Self::Continue,
            CheckpointDecision::Redirect => Self::Redirect,
            CheckpointDecision::Stop => Self::Stop,
        }
    }
}

/// A pause for human review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub triggered_at: DateTime<Utc>,
    pub iteration_id: u32,
    pub reason: CheckpointReason,
    pub summary: CheckpointSummary,
    pub resolution: CheckpointResolution,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Answer delivered to a waiting loop
#[derive(Debug, Clone)]
pub(crate) struct CheckpointResponse {
    pub decision: CheckpointDecision,
    pub feedback: Option<String>,
    pub new_guidance: Option<String>,
}

impl CheckpointResponse {
    pub fn stop() -> Self {
        Self {
            decision: CheckpointDecision::Stop,
            feedback: None,
            new_guidance: None,
        }
    }
}

/// Queue, explored set and history of one run. Owned by the loop task.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub(crate) queue: VecDeque<WorkItem>,
    pub(crate) explored: HashSet<String>,
    pub(crate) history: Vec<Iteration>,
    pub(crate) checkpoints: Vec<Checkpoint>,
    /// Iteration whose report was last used to refill an empty queue
    pub(crate) replenished_after: Option<u32>,
}

impl RunState {
    /// Fresh state with the seeds queued (duplicate ids dropped)
    pub fn new(seeds: Vec<WorkItem>) -> Self {
        let mut state = Self::default();
        state.enqueue(seeds);
        state
    }

    pub fn next_iteration_id(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    /// Take up to `size` items from the front and mark them explored
    pub fn take_batch(&mut self, size: usize) -> Vec<WorkItem> {
        let take = size.max(1).min(self.queue.len());
        let batch: Vec<WorkItem> = self.queue.drain(..take).collect();
        self.explored.extend(batch.iter().map(|item| item.id.clone()));
        batch
    }

    /// Queue items not already explored or queued. Returns how many were added.
    pub fn enqueue(&mut self, items: Vec<WorkItem>) -> usize {
        let mut queued = self.queued_ids();
        let mut added = 0;
        for item in items {
            if self.explored.contains(&item.id) || !queued.insert(item.id.clone()) {
                continue;
            }
            self.queue.push_back(item);
            added += 1;
        }
        added
    }

    pub fn queued_ids(&self) -> HashSet<String> {
        self.queue.iter().map(|item| item.id.clone()).collect()
    }

    /// Tag frequencies over everything processed so far
    pub fn topic_counts(&self) -> HashMap<String, usize> {
        topic_counts(self.history.iter().flat_map(|it| it.batch.iter()))
    }

    pub fn queue(&self) -> Vec<WorkItem> {
        self.queue.iter().cloned().collect()
    }

    pub fn history(&self) -> &[Iteration] {
        &self.history
    }

    pub fn is_explored(&self, id: &str) -> bool {
        self.explored.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, id.to_uppercase())
    }

    #[test]
    fn test_seeds_deduplicated() {
        let state = RunState::new(vec![item("a"), item("b"), item("a")]);
        assert_eq!(state.queue().len(), 2);
        assert_eq!(state.next_iteration_id(), 1);
    }

    #[test]
    fn test_batch_marks_explored() {
        let mut state = RunState::new(vec![item("a"), item("b"), item("c")]);
        let batch = state.take_batch(2);
        assert_eq!(batch.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(state.is_explored("a"));
        assert!(!state.is_explored("c"));
        assert_eq!(state.queue().len(), 1);
    }

    #[test]
    fn test_explored_items_never_requeued() {
        let mut state = RunState::new(vec![item("a"), item("b")]);
        state.take_batch(1);

        let added = state.enqueue(vec![item("a"), item("b"), item("c"), item("c")]);

        assert_eq!(added, 1);
        let ids: Vec<String> = state.queue().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_batch_larger_than_queue() {
        let mut state = RunState::new(vec![item("a")]);
        assert_eq!(state.take_batch(5).len(), 1);
        assert!(state.take_batch(5).is_empty());
    }

    #[test]
    fn test_decision_maps_to_resolution() {
        assert_eq!(
            CheckpointResolution::from(CheckpointDecision::Redirect),
            CheckpointResolution::Redirect
        );
        assert_eq!(CheckpointResolution::default(), CheckpointResolution::Pending);
    }
}
