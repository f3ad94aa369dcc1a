//! # Agent Definitions
//!
//! Static descriptors of the tasks the pipeline runs. Each task declares its
//! dependencies and knows how to build its model request from the current
//! batch and upstream outputs, and how to parse the reply.
//!
//! ## Task Kinds
//!
//! - **Remote** tasks make one model call (`build_request` → call → `parse_result`).
//! - **Local** tasks make no external call; `synthesize` compiles a result
//!   from upstream outputs.
//!
//! Tasks are looked up by id through an [`AgentRegistry`], which preserves
//! registration order so phase contents are deterministic.

pub mod research;

pub use research::{research_pipeline, PromptTask, ReportCompiler};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::items::WorkItem;
use crate::llm::{extract_json, ModelRequest};
use crate::pipeline::OutputMap;

/// Whether a task calls out to a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Remote,
    Local,
}

/// Everything a task may read when building its request
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    /// The batch being processed
    pub items: &'a [WorkItem],
    /// Outputs of tasks from earlier phases (failed or missing ones absent)
    pub outputs: &'a OutputMap,
    /// Current steering string, if any
    pub guidance: Option<&'a str>,
}

impl<'a> TaskContext<'a> {
    /// Successful upstream output by task id
    pub fn output(&self, id: &str) -> Option<&'a serde_json::Value> {
        self.outputs.get(id).and_then(|o| o.value())
    }
}

/// One node of the agent dependency graph
pub trait AgentTask: Send + Sync {
    /// Unique id within a registry
    fn id(&self) -> &str;

    /// Ids of tasks whose outputs this task reads
    fn depends_on(&self) -> &[String];

    fn kind(&self) -> TaskKind {
        TaskKind::Remote
    }

    /// Build the model request for this task
    fn build_request(&self, _ctx: &TaskContext<'_>) -> ModelRequest {
        ModelRequest::default()
    }

    /// Parse a raw model reply into this task's output
    fn parse_result(&self, raw: &str) -> Result<serde_json::Value> {
        match extract_json(raw) {
            Some(value) => Ok(value),
            None => bail!("{}: reply contained no JSON", self.id()),
        }
    }

    /// Compute the output of a local task
    fn synthesize(&self, _ctx: &TaskContext<'_>) -> Result<serde_json::Value> {
        bail!("{} is not a local task", self.id())
    }
}

/// Ordered set of agent tasks, addressable by id
#[derive(Default, Clone)]
pub struct AgentRegistry {
    tasks: Vec<Arc<dyn AgentTask>>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Duplicate ids are a configuration error.
    pub fn register(&mut self, task: Arc<dyn AgentTask>) -> Result<()> {
        let id = task.id().to_string();
        if self.index.contains_key(&id) {
            bail!("Agent task '{}' is already registered", id);
        }
        self.index.insert(id, self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, task: impl AgentTask + 'static) -> Result<Self> {
        self.register(Arc::new(task))?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn AgentTask>> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AgentTask>> {
        self.tasks.iter()
    }

    /// Task ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("tasks", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        id: String,
        deps: Vec<String>,
    }

    impl AgentTask for Named {
        fn id(&self) -> &str {
            &self.id
        }

        fn depends_on(&self) -> &[String] {
            &self.deps
        }
    }

    fn named(id: &str) -> Named {
        Named {
            id: id.to_string(),
            deps: Vec::new(),
        }
    }

    #[test]
    fn test_registry_preserves_order() {
        let registry = AgentRegistry::new()
            .with(named("b"))
            .and_then(|r| r.with(named("a")))
            .unwrap();
        assert_eq!(registry.ids(), vec!["b", "a"]);
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(named("a"))).unwrap();
        assert!(registry.register(Arc::new(named("a"))).is_err());
    }

    #[test]
    fn test_default_parse_requires_json() {
        let task = named("x");
        assert!(task.parse_result("{\"ok\": true}").is_ok());
        assert!(task.parse_result("nothing here").is_err());
    }

    #[test]
    fn test_default_synthesize_rejects_remote_task() {
        let task = named("x");
        let outputs = OutputMap::new();
        let ctx = TaskContext {
            items: &[],
            outputs: &outputs,
            guidance: None,
        };
        assert!(task.synthesize(&ctx).is_err());
        assert_eq!(task.kind(), TaskKind::Remote);
    }
}
