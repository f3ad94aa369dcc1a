//! # Discovery Engine
//!
//! The autonomous loop. One spawned task per active run owns the queue,
//! explored set and history; control methods only flip flags, answer a
//! pending checkpoint or read a published snapshot.
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────────┐   ┌────────┐   ┌────────────┐   ┌──────────┐
//! │ take batch│──▶│ pipeline │──▶│ fetch & score │──▶│ verify │──▶│ checkpoint?│──▶│ cooldown │──┐
//! └───────────┘   └──────────┘   └───────────────┘   └────────┘   └────────────┘   └──────────┘  │
//!       ▲                                                                                          │
//!       └──────────────────────────────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::{EngineConfig, RunOptions};
use super::state::{
    Checkpoint, CheckpointDecision, CheckpointResolution, CheckpointResponse, EngineState,
    Iteration, RunState,
};
use crate::agents::{research_pipeline, AgentRegistry};
use crate::discovery::{
    default_sources, extract_queries, CandidateFetcher, DiscoverySource, FetchContext,
};
use crate::events::{EngineEvent, EngineEventKind, EventEmitter};
use crate::items::WorkItem;
use crate::llm::ModelClient;
use crate::pipeline::PipelineExecutor;
use crate::report::IterationReport;
use crate::verification::{
    build_summary, checkpoint_reason, CheckpointReason, IterationDigest, SummaryEntry,
    VerificationEngine, VerificationSettings, VerificationSettingsPatch, VerificationStats,
    SUMMARY_WINDOW,
};

/// Everything an engine is built from
pub struct EngineComponents {
    pub registry: AgentRegistry,
    pub model: Arc<dyn ModelClient>,
    pub sources: Vec<Arc<dyn DiscoverySource>>,
    pub events: EventEmitter,
}

impl EngineComponents {
    pub fn new(
        registry: AgentRegistry,
        model: Arc<dyn ModelClient>,
        sources: Vec<Arc<dyn DiscoverySource>>,
    ) -> Self {
        Self {
            registry,
            model,
            sources,
            events: EventEmitter::disabled(),
        }
    }

    /// Default research agents over the public sources
    pub fn research(model: Arc<dyn ModelClient>) -> Result<Self> {
        Ok(Self::new(research_pipeline()?, model, default_sources()))
    }

    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.events = EventEmitter::new(tx);
        self
    }
}

/// Cloneable handle to one engine instance
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    executor: PipelineExecutor,
    fetcher: CandidateFetcher,
    verifier: VerificationEngine,
    events: EventEmitter,

    state: Mutex<EngineState>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Wakes the loop out of a cooldown
    wake: Notify,
    /// Sender for the checkpoint the loop is blocked on
    pending: Mutex<Option<oneshot::Sender<CheckpointResponse>>>,
    control: Mutex<Control>,
    snapshot: Mutex<Snapshot>,
    /// Run state of a paused run, handed back on resume
    parked: Mutex<Option<RunState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Values the control surface may change while a run is active
struct Control {
    guidance: Option<String>,
    settings: VerificationSettings,
    stats: VerificationStats,
    max_iterations: u32,
}

/// Read-only copy published by the loop for observers
#[derive(Default)]
struct Snapshot {
    history: Vec<Iteration>,
    queue: Vec<WorkItem>,
    checkpoints: Vec<Checkpoint>,
}

enum LoopExit {
    Paused,
    Finished,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DiscoveryEngine {
    pub fn new(components: EngineComponents, config: EngineConfig) -> Self {
        let EngineComponents {
            registry,
            model,
            sources,
            events,
        } = components;

        let executor = PipelineExecutor::new(Arc::new(registry), Arc::clone(&model))
            .with_config(config.pipeline.clone());
        let fetcher = CandidateFetcher::new(sources).with_config(config.fetch.clone());
        let verifier = VerificationEngine::new(model).with_call_options(config.plausibility_call);
        let control = Control {
            guidance: None,
            settings: config.verification.clone(),
            stats: VerificationStats::default(),
            max_iterations: config.max_iterations,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                fetcher,
                verifier,
                events,
                state: Mutex::new(EngineState::Idle),
                pause_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                pending: Mutex::new(None),
                control: Mutex::new(control),
                snapshot: Mutex::new(Snapshot::default()),
                parked: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Begin a new run from `seeds`. Must be called inside a tokio runtime.
    ///
    /// Returns `false` while a run is active (running or at a checkpoint).
    pub fn start(&self, seeds: Vec<WorkItem>, options: RunOptions) -> bool {
        let inner = &self.inner;
        let mut task = lock(&inner.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::warn!("start ignored: a run is still active");
            return false;
        }
        {
            let mut state = lock(&inner.state);
            if matches!(*state, EngineState::Running | EngineState::Checkpoint) {
                tracing::warn!(state = ?*state, "start ignored: engine is busy");
                return false;
            }
            *state = EngineState::Running;
        }

        inner.pause_requested.store(false, Ordering::SeqCst);
        inner.stop_requested.store(false, Ordering::SeqCst);
        lock(&inner.parked).take();
        lock(&inner.pending).take();
        {
            let mut control = lock(&inner.control);
            let mut settings = inner.config.verification.clone();
            if let Some(patch) = &options.verification {
                settings.merge(patch);
            }
            control.guidance = options.guidance.filter(|g| !g.trim().is_empty());
            control.settings = settings;
            control.stats = VerificationStats::default();
            control.max_iterations = options.max_iterations.unwrap_or(inner.config.max_iterations);
        }

        let run = RunState::new(seeds);
        inner.publish(&run);
        tracing::info!(seeds = run.queue.len(), "Discovery run started");

        inner.events.emit(EngineEventKind::StatusChanged {
            state: EngineState::Running,
        });
        inner
            .events
            .emit(EngineEventKind::QueueChanged { queue: run.queue() });

        *task = Some(tokio::spawn(Arc::clone(inner).run_loop(run)));
        true
    }

    /// Suspend after the in-flight iteration. Only valid while running.
    pub fn pause(&self) -> bool {
        {
            let state = lock(&self.inner.state);
            if *state != EngineState::Running {
                tracing::warn!(state = ?*state, "pause ignored");
                return false;
            }
            self.inner.pause_requested.store(true, Ordering::SeqCst);
        }
        self.inner.wake.notify_waiters();
        true
    }

    /// Continue a paused run from its queue and history
    pub fn resume(&self) -> bool {
        let inner = &self.inner;
        let mut task = lock(&inner.task);
        let run = {
            let mut state = lock(&inner.state);
            if *state != EngineState::Paused {
                tracing::warn!(state = ?*state, "resume ignored");
                return false;
            }
            let Some(run) = lock(&inner.parked).take() else {
                tracing::warn!("resume ignored: no parked run");
                return false;
            };
            *state = EngineState::Running;
            run
        };

        inner.pause_requested.store(false, Ordering::SeqCst);
        inner.stop_requested.store(false, Ordering::SeqCst);
        tracing::info!(next_iteration = run.next_iteration_id(), "Discovery run resumed");
        inner.events.emit(EngineEventKind::StatusChanged {
            state: EngineState::Running,
        });

        *task = Some(tokio::spawn(Arc::clone(inner).run_loop(run)));
        true
    }

    /// End the run once the in-flight work finishes. A pending checkpoint is
    /// resolved as `Stop`.
    pub fn stop(&self) -> bool {
        let inner = &self.inner;
        let current = {
            let mut state = lock(&inner.state);
            let current = *state;
            match current {
                EngineState::Paused => *state = EngineState::Stopped,
                EngineState::Running | EngineState::Checkpoint => {
                    inner.stop_requested.store(true, Ordering::SeqCst);
                }
                _ => {
                    tracing::warn!(state = ?current, "stop ignored");
                    return false;
                }
            }
            current
        };

        if current == EngineState::Paused {
            lock(&inner.parked).take();
            tracing::info!("Paused run stopped");
            inner.events.emit(EngineEventKind::StatusChanged {
                state: EngineState::Stopped,
            });
            return true;
        }

        inner.wake.notify_waiters();
        if let Some(tx) = lock(&inner.pending).take() {
            let _ = tx.send(CheckpointResponse::stop());
        }
        true
    }

    /// Answer the pending checkpoint. Returns `false` when none is pending.
    pub fn resolve_checkpoint(
        &self,
        decision: CheckpointDecision,
        feedback: Option<String>,
        new_guidance: Option<String>,
    ) -> bool {
        let Some(tx) = lock(&self.inner.pending).take() else {
            tracing::warn!(?decision, "No checkpoint pending");
            return false;
        };
        tx.send(CheckpointResponse {
            decision,
            feedback,
            new_guidance,
        })
        .is_ok()
    }

    /// Patch verification settings; applies from the next iteration
    pub fn set_verification_settings(&self, patch: &VerificationSettingsPatch) {
        lock(&self.inner.control).settings.merge(patch);
    }

    /// Wait for the current loop task to exit (finished or paused)
    pub async fn join(&self) {
        let handle = lock(&self.inner.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Discovery loop aborted");
            }
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    pub fn guidance(&self) -> Option<String> {
        lock(&self.inner.control).guidance.clone()
    }

    pub fn verification_settings(&self) -> VerificationSettings {
        lock(&self.inner.control).settings.clone()
    }

    pub fn stats(&self) -> VerificationStats {
        lock(&self.inner.control).stats.clone()
    }

    pub fn history(&self) -> Vec<Iteration> {
        lock(&self.inner.snapshot).history.clone()
    }

    pub fn queue_snapshot(&self) -> Vec<WorkItem> {
        lock(&self.inner.snapshot).queue.clone()
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        lock(&self.inner.snapshot).checkpoints.clone()
    }

    /// The checkpoint awaiting a decision, if any
    pub fn pending_checkpoint(&self) -> Option<Checkpoint> {
        if self.state() != EngineState::Checkpoint {
            return None;
        }
        lock(&self.inner.snapshot)
            .checkpoints
            .last()
            .filter(|c| c.resolution == CheckpointResolution::Pending)
            .cloned()
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>, mut run: RunState) {
        let exit = self.drive(&mut run).await;
        self.publish(&run);

        let next = match exit {
            LoopExit::Paused => {
                *lock(&self.parked) = Some(run);
                self.pause_requested.store(false, Ordering::SeqCst);
                let mut state = lock(&self.state);
                *state = if self.stop_requested.load(Ordering::SeqCst) {
                    EngineState::Stopped
                } else {
                    EngineState::Paused
                };
                *state
            }
            LoopExit::Finished => {
                *lock(&self.state) = EngineState::Stopped;
                EngineState::Stopped
            }
        };
        if next == EngineState::Stopped {
            lock(&self.parked).take();
        }

        tracing::info!(state = ?next, "Discovery loop exited");
        self.events.emit(EngineEventKind::StatusChanged { state: next });
    }

    #[tracing::instrument(skip_all)]
    async fn drive(&self, run: &mut RunState) -> LoopExit {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                tracing::info!("Stop requested");
                return LoopExit::Finished;
            }
            if self.pause_requested.load(Ordering::SeqCst) {
                tracing::info!("Pause requested");
                return LoopExit::Paused;
            }
            if self.cap_reached(run) {
                tracing::info!(iterations = run.history.len(), "Iteration cap reached");
                return LoopExit::Finished;
            }
            if run.queue.is_empty() && !self.replenish(run).await {
                tracing::info!(iterations = run.history.len(), "Queue exhausted");
                return LoopExit::Finished;
            }

            self.run_iteration(run).await;

            if let Some(reason) = self.checkpoint_due(run) {
                if !self.hold_checkpoint(run, reason).await {
                    return LoopExit::Finished;
                }
            }

            if !self.cap_reached(run) {
                self.cooldown().await;
            }
        }
    }

    fn cap_reached(&self, run: &RunState) -> bool {
        run.history.len() as u32 >= lock(&self.control).max_iterations
    }

    fn guidance(&self) -> Option<String> {
        lock(&self.control).guidance.clone()
    }

    fn interrupted(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst) || self.pause_requested.load(Ordering::SeqCst)
    }

    fn publish(&self, run: &RunState) {
        let mut snapshot = lock(&self.snapshot);
        snapshot.history = run.history.clone();
        snapshot.queue = run.queue();
        snapshot.checkpoints = run.checkpoints.clone();
    }

    async fn fetch(
        &self,
        run: &RunState,
        queries: &[String],
        report: &IterationReport,
        guidance: Option<&str>,
    ) -> Vec<WorkItem> {
        let queued = run.queued_ids();
        let topics = run.topic_counts();
        let ctx = FetchContext {
            guidance,
            explored: &run.explored,
            queued: &queued,
            topic_counts: &topics,
        };
        self.fetcher.fetch_and_score(queries, report, &ctx).await
    }

    /// One extra fetch from the last report when the queue runs dry
    async fn replenish(&self, run: &mut RunState) -> bool {
        let Some(last) = run.history.last() else {
            return false;
        };
        if run.replenished_after == Some(last.id) {
            return false;
        }
        let last_id = last.id;
        let report = last.report();
        run.replenished_after = Some(last_id);

        let guidance = self.guidance();
        let queries = extract_queries(
            &report,
            guidance.as_deref(),
            self.fetcher.config().max_queries,
        );
        let found = self.fetch(run, &queries, &report, guidance.as_deref()).await;
        let added = run.enqueue(found);
        tracing::info!(after_iteration = last_id, added, "Replenishment pass");

        self.publish(run);
        self.events
            .emit(EngineEventKind::QueueChanged { queue: run.queue() });
        added > 0
    }

    #[tracing::instrument(skip_all, fields(iteration = run.next_iteration_id()))]
    async fn run_iteration(&self, run: &mut RunState) {
        let id = run.next_iteration_id();
        let started_at = Utc::now();
        let clock = Instant::now();

        let batch = run.take_batch(self.config.batch_size);
        tracing::info!(batch = batch.len(), queued = run.queue.len(), "Iteration started");
        self.events
            .emit(EngineEventKind::QueueChanged { queue: run.queue() });
        self.events.emit(EngineEventKind::IterationStarted {
            iteration_id: id,
            batch: batch.clone(),
        });

        let guidance = self.guidance();
        let outputs = self
            .executor
            .run(&batch, guidance.as_deref(), &self.events)
            .await;
        let report = IterationReport::from_outputs(&outputs);

        let queries = extract_queries(
            &report,
            guidance.as_deref(),
            self.fetcher.config().max_queries,
        );
        let found = self.fetch(run, &queries, &report, guidance.as_deref()).await;
        let new_items_found = run.enqueue(found);
        self.events
            .emit(EngineEventKind::QueueChanged { queue: run.queue() });

        let mut iteration = Iteration {
            id,
            batch,
            outputs,
            queries_used: queries,
            new_items_found,
            started_at,
            duration_ms: 0,
            verification: None,
        };

        let settings = lock(&self.control).settings.clone();
        let prior: Vec<IterationDigest> = run
            .history
            .iter()
            .map(|it| it.digest(&it.report()))
            .collect();
        let current = iteration.digest(&report);
        iteration.verification = self
            .verifier
            .verify(
                &settings,
                &report,
                &iteration.batch,
                &prior,
                current,
                run.queue.len(),
            )
            .await;
        iteration.duration_ms = clock.elapsed().as_millis() as u64;

        if let Some(verification) = &iteration.verification {
            let stats = {
                let mut control = lock(&self.control);
                control.stats.record(verification);
                control.stats.clone()
            };
            self.events.emit(EngineEventKind::VerificationCompleted {
                iteration_id: id,
                verification: verification.clone(),
            });
            self.events
                .emit(EngineEventKind::VerificationStatsUpdated { stats });
        }

        tracing::info!(
            new_items = new_items_found,
            duration_ms = iteration.duration_ms,
            "Iteration completed"
        );
        run.history.push(iteration.clone());
        self.publish(run);
        self.events.emit(EngineEventKind::IterationCompleted {
            iteration: Box::new(iteration),
        });
    }

    fn checkpoint_due(&self, run: &RunState) -> Option<CheckpointReason> {
        let last = run.history.last()?;
        let settings = lock(&self.control).settings.clone();
        if !settings.enabled {
            return None;
        }
        let health = last.verification.as_ref().and_then(|v| v.health.as_ref());
        checkpoint_reason(last.id, health, &settings)
    }

    /// Block on a human decision. Returns `false` when the run should end.
    async fn hold_checkpoint(&self, run: &mut RunState, reason: CheckpointReason) -> bool {
        let (summary, iteration_id) = {
            let window = &run.history[run.history.len().saturating_sub(SUMMARY_WINDOW)..];
            let reports: Vec<IterationReport> = window.iter().map(Iteration::report).collect();
            let entries: Vec<SummaryEntry<'_>> = window
                .iter()
                .zip(&reports)
                .map(|(it, report)| SummaryEntry {
                    report,
                    verification: it.verification.as_ref(),
                    batch_size: it.batch.len(),
                })
                .collect();
            (
                build_summary(&entries),
                window.last().map_or(0, |it| it.id),
            )
        };

        let checkpoint = Checkpoint {
            triggered_at: Utc::now(),
            iteration_id,
            reason,
            summary,
            resolution: CheckpointResolution::Pending,
            feedback: None,
        };

        let (tx, rx) = oneshot::channel();
        *lock(&self.pending) = Some(tx);
        {
            let mut state = lock(&self.state);
            if self.stop_requested.load(Ordering::SeqCst) {
                lock(&self.pending).take();
                return false;
            }
            *state = EngineState::Checkpoint;
        }

        let stats = {
            let mut control = lock(&self.control);
            control.stats.record_checkpoint();
            control.stats.clone()
        };
        run.checkpoints.push(checkpoint.clone());
        self.publish(run);

        tracing::info!(iteration = iteration_id, ?reason, "Checkpoint triggered");
        self.events.emit(EngineEventKind::StatusChanged {
            state: EngineState::Checkpoint,
        });
        self.events
            .emit(EngineEventKind::CheckpointTriggered { checkpoint });
        self.events
            .emit(EngineEventKind::VerificationStatsUpdated { stats });

        // A dropped sender means nobody can answer any more
        let response = rx.await.unwrap_or_else(|_| CheckpointResponse::stop());
        let decision = response.decision;

        if decision == CheckpointDecision::Redirect {
            if let Some(guidance) = response.new_guidance.filter(|g| !g.trim().is_empty()) {
                tracing::info!(guidance = %guidance, "Run redirected");
                lock(&self.control).guidance = Some(guidance);
            }
        }
        if let Some(last) = run.checkpoints.last_mut() {
            last.resolution = decision.into();
            last.feedback = response.feedback.clone();
        }
        self.publish(run);

        tracing::info!(iteration = iteration_id, ?decision, "Checkpoint resolved");
        self.events.emit(EngineEventKind::CheckpointResolved {
            iteration_id,
            decision,
            feedback: response.feedback,
        });

        if decision == CheckpointDecision::Stop {
            return false;
        }
        *lock(&self.state) = EngineState::Running;
        self.events.emit(EngineEventKind::StatusChanged {
            state: EngineState::Running,
        });
        true
    }

    /// Countdown between iterations; returns early on pause or stop
    async fn cooldown(&self) {
        let total = self.config.cooldown();
        if total.is_zero() {
            return;
        }
        let tick = self.config.cooldown_tick();
        let deadline = Instant::now() + total;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.interrupted() {
                tracing::debug!("Cooldown interrupted");
                break;
            }

            self.events.emit(EngineEventKind::Cooldown {
                remaining_ms: remaining.as_millis() as u64,
            });
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(tick)) => {}
                _ = &mut notified => {}
            }
        }
    }
}
