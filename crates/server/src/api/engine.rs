//! # Engine API
//!
//! Control surface and event stream for the discovery engine.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;

use meridian_core::engine::{Checkpoint, CheckpointDecision, EngineState, Iteration, RunOptions};
use meridian_core::verification::{
    VerificationSettings, VerificationSettingsPatch, VerificationStats,
};
use meridian_core::WorkItem;

use crate::{ApiResponse, SharedState};

/// Quiet period after which the event stream sends a heartbeat comment
const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize, ToSchema)]
pub struct EngineStatus {
    #[schema(value_type = String)]
    pub state: EngineState,
    pub queue_length: usize,
    pub iterations: usize,
    pub guidance: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub pending_checkpoint: Option<Checkpoint>,
    #[schema(value_type = Object)]
    pub stats: VerificationStats,
    #[schema(value_type = Object)]
    pub settings: VerificationSettings,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartRequest {
    #[schema(value_type = Vec<Object>)]
    pub seeds: Vec<WorkItem>,
    #[serde(default)]
    pub guidance: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub verification: Option<VerificationPatchRequest>,
}

/// Partial verification settings; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct VerificationPatchRequest {
    pub enabled: Option<bool>,
    pub plausibility: Option<bool>,
    pub grounding: Option<bool>,
    pub loop_health: Option<bool>,
    pub checkpoint_interval: Option<u32>,
    pub pause_on_critical: Option<bool>,
}

impl From<VerificationPatchRequest> for VerificationSettingsPatch {
    fn from(req: VerificationPatchRequest) -> Self {
        Self {
            enabled: req.enabled,
            plausibility: req.plausibility,
            grounding: req.grounding,
            loop_health: req.loop_health,
            checkpoint_interval: req.checkpoint_interval,
            pause_on_critical: req.pause_on_critical,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckpointRequest {
    /// "continue", "redirect" or "stop"
    #[schema(value_type = String)]
    pub decision: CheckpointDecision,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Steering string applied on redirect
    #[serde(default)]
    pub new_guidance: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    #[schema(value_type = Object)]
    pub settings: VerificationSettings,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    #[schema(value_type = Vec<Object>)]
    pub iterations: Vec<Iteration>,
}

pub fn engine_routes() -> Router<SharedState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/start", post(start_engine))
        .route("/pause", post(pause_engine))
        .route("/resume", post(resume_engine))
        .route("/stop", post(stop_engine))
        .route("/checkpoint", post(resolve_checkpoint))
        .route(
            "/verification",
            get(get_verification).patch(update_verification),
        )
        .route("/history", get(get_history))
        .route("/events", get(events))
}

fn respond(accepted: bool, ok: &str, rejected: &str) -> Json<ApiResponse> {
    Json(ApiResponse {
        success: accepted,
        message: if accepted { ok } else { rejected }.to_string(),
    })
}

/// Current engine status
#[utoipa::path(
    get,
    path = "/api/v1/engine/status",
    tag = "engine",
    responses(
        (status = 200, description = "Engine state, queue and stats", body = EngineStatus)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<EngineStatus> {
    let engine = &state.engine;
    Json(EngineStatus {
        state: engine.state(),
        queue_length: engine.queue_snapshot().len(),
        iterations: engine.history().len(),
        guidance: engine.guidance(),
        pending_checkpoint: engine.pending_checkpoint(),
        stats: engine.stats(),
        settings: engine.verification_settings(),
    })
}

/// Start a run from seed items
#[utoipa::path(
    post,
    path = "/api/v1/engine/start",
    tag = "engine",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Whether the run started", body = ApiResponse)
    )
)]
pub async fn start_engine(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> Json<ApiResponse> {
    if req.seeds.is_empty() {
        return respond(false, "", "At least one seed item is required");
    }
    let seeds = req.seeds.len();
    let options = RunOptions {
        guidance: req.guidance,
        max_iterations: req.max_iterations,
        verification: req.verification.map(Into::into),
    };
    let started = state.engine.start(req.seeds, options);
    tracing::info!(seeds, started, "Start requested");
    respond(started, "Discovery run started", "Engine is already running")
}

/// Pause after the current iteration
#[utoipa::path(
    post,
    path = "/api/v1/engine/pause",
    tag = "engine",
    responses(
        (status = 200, description = "Whether the pause was accepted", body = ApiResponse)
    )
)]
pub async fn pause_engine(State(state): State<SharedState>) -> Json<ApiResponse> {
    respond(state.engine.pause(), "Pause requested", "Engine is not running")
}

/// Resume a paused run
#[utoipa::path(
    post,
    path = "/api/v1/engine/resume",
    tag = "engine",
    responses(
        (status = 200, description = "Whether the run resumed", body = ApiResponse)
    )
)]
pub async fn resume_engine(State(state): State<SharedState>) -> Json<ApiResponse> {
    respond(state.engine.resume(), "Run resumed", "Engine is not paused")
}

/// Stop the active run
#[utoipa::path(
    post,
    path = "/api/v1/engine/stop",
    tag = "engine",
    responses(
        (status = 200, description = "Whether the stop was accepted", body = ApiResponse)
    )
)]
pub async fn stop_engine(State(state): State<SharedState>) -> Json<ApiResponse> {
    respond(state.engine.stop(), "Stop requested", "No active run")
}

/// Answer the pending checkpoint
#[utoipa::path(
    post,
    path = "/api/v1/engine/checkpoint",
    tag = "engine",
    request_body = CheckpointRequest,
    responses(
        (status = 200, description = "Whether a checkpoint was resolved", body = ApiResponse)
    )
)]
pub async fn resolve_checkpoint(
    State(state): State<SharedState>,
    Json(req): Json<CheckpointRequest>,
) -> Json<ApiResponse> {
    let resolved = state
        .engine
        .resolve_checkpoint(req.decision, req.feedback, req.new_guidance);
    respond(resolved, "Checkpoint resolved", "No checkpoint pending")
}

/// Current verification settings
#[utoipa::path(
    get,
    path = "/api/v1/engine/verification",
    tag = "engine",
    responses(
        (status = 200, description = "Active verification settings", body = SettingsResponse)
    )
)]
pub async fn get_verification(State(state): State<SharedState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        settings: state.engine.verification_settings(),
    })
}

/// Patch verification settings; applies from the next iteration
#[utoipa::path(
    patch,
    path = "/api/v1/engine/verification",
    tag = "engine",
    request_body = VerificationPatchRequest,
    responses(
        (status = 200, description = "Settings after the patch", body = SettingsResponse)
    )
)]
pub async fn update_verification(
    State(state): State<SharedState>,
    Json(req): Json<VerificationPatchRequest>,
) -> Json<SettingsResponse> {
    state.engine.set_verification_settings(&req.into());
    Json(SettingsResponse {
        settings: state.engine.verification_settings(),
    })
}

/// Iteration history of the current or last run
#[utoipa::path(
    get,
    path = "/api/v1/engine/history",
    tag = "engine",
    responses(
        (status = 200, description = "Completed iterations, oldest first", body = HistoryResponse)
    )
)]
pub async fn get_history(State(state): State<SharedState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        iterations: state.engine.history(),
    })
}

/// SSE endpoint for engine events with heartbeat
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match tokio::time::timeout(HEARTBEAT, rx.recv()).await {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "SSE subscriber lagged");
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Ok(Err(RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_request_parses_decision() {
        let req: CheckpointRequest = serde_json::from_str(
            r#"{"decision": "redirect", "new_guidance": "membrane transport"}"#,
        )
        .unwrap();
        assert_eq!(req.decision, CheckpointDecision::Redirect);
        assert_eq!(req.new_guidance.as_deref(), Some("membrane transport"));
        assert!(req.feedback.is_none());
    }

    #[test]
    fn test_start_request_with_minimal_seeds() {
        let req: StartRequest = serde_json::from_str(
            r#"{"seeds": [{"id": "10.1/x", "title": "Folding"}], "verification": {"checkpoint_interval": 3}}"#,
        )
        .unwrap();
        assert_eq!(req.seeds[0].source, "seed");
        let patch: VerificationSettingsPatch = req.verification.unwrap().into();
        assert_eq!(patch.checkpoint_interval, Some(3));
        assert_eq!(patch.enabled, None);
    }
}
