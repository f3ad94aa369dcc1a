//! # Pipeline Executor
//!
//! Phased concurrent execution of an agent registry over one batch.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{compute_phases, AgentOutput, OutputMap};
use crate::agents::{AgentRegistry, AgentTask, TaskContext, TaskKind};
use crate::events::{EngineEventKind, EventEmitter};
use crate::items::WorkItem;
use crate::llm::ModelClient;
use crate::retry::RetryPolicy;

/// Executor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum wall time a local task appears to take
    pub local_task_floor_ms: u64,
    /// Retry applied to each remote task's model call
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            local_task_floor_ms: 400,
            retry: RetryPolicy::none(),
        }
    }
}

impl PipelineConfig {
    pub fn local_task_floor(&self) -> Duration {
        Duration::from_millis(self.local_task_floor_ms)
    }
}

/// Runs a registry phase by phase
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: Arc<AgentRegistry>,
    model: Arc<dyn ModelClient>,
    config: PipelineConfig,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<AgentRegistry>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            registry,
            model,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run every task once over `items`.
    ///
    /// Never fails: task failures become error markers. Emits
    /// `PipelineCompleted` exactly once before returning.
    #[tracing::instrument(skip_all, fields(items = items.len(), tasks = self.registry.len()))]
    pub async fn run(
        &self,
        items: &[WorkItem],
        guidance: Option<&str>,
        events: &EventEmitter,
    ) -> OutputMap {
        let plan = compute_phases(&self.registry);
        let items = Arc::new(items.to_vec());
        let guidance: Option<Arc<str>> = guidance.map(Arc::from);
        let mut outputs = OutputMap::new();

        for (index, phase) in plan.phases.iter().enumerate() {
            tracing::debug!(phase = index + 1, tasks = ?phase, "Starting pipeline phase");

            // Every task in a phase sees the same upstream snapshot
            let snapshot = Arc::new(outputs.clone());
            let handles: Vec<(String, JoinHandle<AgentOutput>)> = phase
                .iter()
                .filter_map(|id| self.registry.get(id).map(|task| (id.clone(), task.clone())))
                .map(|(id, task)| {
                    let handle = self.spawn_task(task, &items, &snapshot, &guidance, events);
                    (id, handle)
                })
                .collect();

            for (id, handle) in handles {
                match handle.await {
                    Ok(output) => {
                        outputs.insert(id, output);
                    }
                    Err(e) => {
                        tracing::error!(agent = %id, error = %e, "Agent task aborted before producing output");
                    }
                }
            }
        }

        let missing: Vec<String> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| !outputs.contains_key(id))
            .collect();

        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Re-running tasks that produced no output");
            let snapshot = Arc::new(outputs.clone());
            for id in missing {
                let Some(task) = self.registry.get(&id).cloned() else {
                    continue;
                };
                let handle = self.spawn_task(task, &items, &snapshot, &guidance, events);
                let output = match handle.await {
                    Ok(output) => output,
                    Err(e) => {
                        let message = format!("Task aborted: {}", e);
                        events.emit(EngineEventKind::AgentFailed {
                            agent_id: id.clone(),
                            error: message.clone(),
                            duration_ms: 0,
                        });
                        AgentOutput::error(message)
                    }
                };
                outputs.insert(id, output);
            }
        }

        let failed = outputs.values().filter(|o| o.is_error()).count();
        tracing::info!(
            completed = outputs.len() - failed,
            failed,
            "Pipeline finished"
        );

        events.emit(EngineEventKind::PipelineCompleted {
            outputs: outputs.clone(),
        });
        outputs
    }

    fn spawn_task(
        &self,
        task: Arc<dyn AgentTask>,
        items: &Arc<Vec<WorkItem>>,
        outputs: &Arc<OutputMap>,
        guidance: &Option<Arc<str>>,
        events: &EventEmitter,
    ) -> JoinHandle<AgentOutput> {
        tokio::spawn(execute_task(
            task,
            Arc::clone(items),
            Arc::clone(outputs),
            guidance.clone(),
            Arc::clone(&self.model),
            self.config.clone(),
            events.clone(),
        ))
    }
}

async fn execute_task(
    task: Arc<dyn AgentTask>,
    items: Arc<Vec<WorkItem>>,
    outputs: Arc<OutputMap>,
    guidance: Option<Arc<str>>,
    model: Arc<dyn ModelClient>,
    config: PipelineConfig,
    events: EventEmitter,
) -> AgentOutput {
    let agent_id = task.id().to_string();
    events.emit(EngineEventKind::AgentStarted {
        agent_id: agent_id.clone(),
    });

    let started = Instant::now();
    let ctx = TaskContext {
        items: &items,
        outputs: &outputs,
        guidance: guidance.as_deref(),
    };

    let result = match task.kind() {
        TaskKind::Local => {
            let result = task.synthesize(&ctx);
            let floor = config.local_task_floor();
            let elapsed = started.elapsed();
            if elapsed < floor {
                tokio::time::sleep(floor - elapsed).await;
            }
            result
        }
        TaskKind::Remote => {
            let request = task.build_request(&ctx);
            let request = &request;
            let model = model.as_ref();
            config
                .retry
                .run(move || async move {
                    model
                        .call(&request.system_prompt, &request.messages, &request.options)
                        .await
                })
                .await
                .and_then(|raw| task.parse_result(&raw))
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => {
            tracing::debug!(agent = %agent_id, duration_ms, "Agent completed");
            events.emit(EngineEventKind::AgentCompleted {
                agent_id,
                output: value.clone(),
                duration_ms,
            });
            AgentOutput::Success(value)
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(agent = %agent_id, error = %message, "Agent failed");
            events.emit(EngineEventKind::AgentFailed {
                agent_id,
                error: message.clone(),
                duration_ms,
            });
            AgentOutput::error(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EngineEvent;
    use crate::llm::{CallOptions, ChatMessage, ModelRequest};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct Probe {
        id: String,
        deps: Vec<String>,
        local: bool,
        panic_once: Option<AtomicBool>,
    }

    impl Probe {
        fn remote(id: &str, deps: &[&str]) -> Self {
            Self {
                id: id.to_string(),
                deps: deps.iter().map(|d| d.to_string()).collect(),
                local: false,
                panic_once: None,
            }
        }

        fn local(id: &str, deps: &[&str]) -> Self {
            Self {
                local: true,
                ..Self::remote(id, deps)
            }
        }
    }

    impl AgentTask for Probe {
        fn id(&self) -> &str {
            &self.id
        }

        fn depends_on(&self) -> &[String] {
            &self.deps
        }

        fn kind(&self) -> TaskKind {
            if self.local {
                TaskKind::Local
            } else {
                TaskKind::Remote
            }
        }

        fn build_request(&self, ctx: &TaskContext<'_>) -> ModelRequest {
            if let Some(flag) = &self.panic_once {
                if !flag.swap(true, Ordering::SeqCst) {
                    panic!("probe {} panicked", self.id);
                }
            }
            let upstream: Vec<String> = self
                .deps
                .iter()
                .map(|d| {
                    let state = if ctx.output(d).is_some() { "ok" } else { "missing" };
                    format!("{}={}", d, state)
                })
                .collect();
            ModelRequest {
                system_prompt: format!("{} {}", self.id, upstream.join(",")),
                messages: vec![ChatMessage::user(format!("{} items", ctx.items.len()))],
                options: CallOptions::default(),
            }
        }

        fn synthesize(&self, ctx: &TaskContext<'_>) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "inputs": ctx.outputs.len() }))
        }
    }

    /// Echoes the prompt back as JSON; fails for the listed task ids
    struct EchoModel {
        failing: HashSet<String>,
    }

    impl EchoModel {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl ModelClient for EchoModel {
        async fn call(
            &self,
            system_prompt: &str,
            _messages: &[ChatMessage],
            _options: &CallOptions,
        ) -> anyhow::Result<String> {
            let task = system_prompt.split_whitespace().next().unwrap_or_default();
            if self.failing.contains(task) {
                anyhow::bail!("{} failed upstream", task);
            }
            Ok(serde_json::json!({ "prompt": system_prompt }).to_string())
        }
    }

    fn registry(tasks: Vec<Probe>) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for task in tasks {
            registry.register(Arc::new(task)).unwrap();
        }
        Arc::new(registry)
    }

    fn five_tasks() -> Vec<Probe> {
        vec![
            Probe::remote("A", &[]),
            Probe::remote("B", &["A"]),
            Probe::remote("C", &["A", "B"]),
            Probe::remote("D", &["B"]),
            Probe::remote("E", &["C", "D"]),
        ]
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEventKind> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect()
    }

    fn seed() -> Vec<WorkItem> {
        vec![WorkItem::new("paper-a", "Sparse attention for protein folding")]
    }

    #[tokio::test]
    async fn test_five_task_pipeline_runs_all_phases() {
        let executor = PipelineExecutor::new(registry(five_tasks()), EchoModel::new(&[]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outputs = executor.run(&seed(), None, &EventEmitter::new(tx)).await;

        assert_eq!(outputs.len(), 5);
        assert!(outputs.values().all(|o| !o.is_error()));
        assert_eq!(outputs["E"].value().unwrap()["prompt"], "E C=ok,D=ok");

        let events = drain(&mut rx);
        let started: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EngineEventKind::AgentStarted { agent_id } => Some(agent_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(started.first(), Some(&"A"));
        assert_eq!(started.last(), Some(&"E"));
    }

    #[tokio::test]
    async fn test_failed_dependency_leaves_input_absent() {
        let executor = PipelineExecutor::new(registry(five_tasks()), EchoModel::new(&["B"]));

        let outputs = executor.run(&seed(), None, &EventEmitter::disabled()).await;

        assert_eq!(outputs["B"], AgentOutput::error("B failed upstream"));
        assert_eq!(outputs["C"].value().unwrap()["prompt"], "C A=ok,B=missing");
        assert_eq!(outputs["D"].value().unwrap()["prompt"], "D B=missing");
        assert!(!outputs["E"].is_error());
    }

    #[tokio::test]
    async fn test_all_failures_still_complete_once() {
        let executor = PipelineExecutor::new(
            registry(five_tasks()),
            EchoModel::new(&["A", "B", "C", "D", "E"]),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outputs = executor.run(&seed(), None, &EventEmitter::new(tx)).await;

        assert_eq!(outputs.len(), 5);
        assert!(outputs.values().all(|o| o.is_error()));

        let completions: Vec<OutputMap> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                EngineEventKind::PipelineCompleted { outputs } => Some(outputs),
                _ => None,
            })
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0], outputs);
    }

    #[tokio::test]
    async fn test_identical_runs_are_deterministic() {
        let executor = PipelineExecutor::new(registry(five_tasks()), EchoModel::new(&["D"]));

        let first = executor.run(&seed(), Some("focus"), &EventEmitter::disabled()).await;
        let second = executor.run(&seed(), Some("focus"), &EventEmitter::disabled()).await;

        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_task_respects_time_floor() {
        let executor = PipelineExecutor::new(
            registry(vec![Probe::remote("A", &[]), Probe::local("report", &["A"])]),
            EchoModel::new(&[]),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outputs = executor.run(&seed(), None, &EventEmitter::new(tx)).await;
        assert_eq!(outputs["report"].value().unwrap()["inputs"], 1);

        let duration = drain(&mut rx).into_iter().find_map(|e| match e {
            EngineEventKind::AgentCompleted {
                agent_id,
                duration_ms,
                ..
            } if agent_id == "report" => Some(duration_ms),
            _ => None,
        });
        assert!(duration.unwrap() >= 400);
    }

    #[tokio::test]
    async fn test_sweep_reruns_panicked_task() {
        let mut flaky = Probe::remote("B", &["A"]);
        flaky.panic_once = Some(AtomicBool::new(false));
        let executor = PipelineExecutor::new(
            registry(vec![Probe::remote("A", &[]), flaky]),
            EchoModel::new(&[]),
        );

        let outputs = executor.run(&seed(), None, &EventEmitter::disabled()).await;

        assert_eq!(outputs["B"].value().unwrap()["prompt"], "B A=ok");
    }
}
