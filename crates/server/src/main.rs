//! Meridian Server
//!
//! Axum control surface and SSE event stream over one discovery engine, plus
//! a headless `run` mode for the terminal.

mod api;

use axum::{
    body::Body,
    http::{header, Response},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use meridian_core::engine::{CheckpointDecision, DiscoveryEngine, EngineComponents, EngineConfig};
use meridian_core::engine::{EngineState, RunOptions};
use meridian_core::events::{EngineEvent, EngineEventKind};
use meridian_core::llm::RadkitClient;
use meridian_core::models::{LlmProvider, ModelConfig};
use meridian_core::WorkItem;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

/// Directory holding persisted settings and API keys
const DATA_DIR: &str = ".meridian";

/// Application state
pub struct AppState {
    pub engine: DiscoveryEngine,
    pub event_tx: broadcast::Sender<EngineEvent>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Meridian - Autonomous Research Discovery")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Meridian server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the discovery loop headless, printing events as JSON lines
    Run {
        /// JSON file containing an array of seed work items
        seeds: PathBuf,
        /// Research focus steering query extraction
        #[arg(short, long)]
        guidance: Option<String>,
        /// Iteration cap for this run
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },
}

// === Config ===

/// Persisted configuration in `.meridian/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema)]
struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_queries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pause_on_critical: Option<bool>,
}

impl PersistedConfig {
    fn path() -> PathBuf {
        PathBuf::from(DATA_DIR).join("config.json")
    }

    async fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "Ignoring malformed config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    async fn save(&self) -> Result<(), std::io::Error> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, content).await
    }

    fn merge(&mut self, other: PersistedConfig) {
        if other.provider.is_some() {
            self.provider = other.provider;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.batch_size.is_some() {
            self.batch_size = other.batch_size;
        }
        if other.max_iterations.is_some() {
            self.max_iterations = other.max_iterations;
        }
        if other.cooldown_ms.is_some() {
            self.cooldown_ms = other.cooldown_ms;
        }
        if other.max_queries.is_some() {
            self.max_queries = other.max_queries;
        }
        if other.top_n.is_some() {
            self.top_n = other.top_n;
        }
        if other.checkpoint_interval.is_some() {
            self.checkpoint_interval = other.checkpoint_interval;
        }
        if other.pause_on_critical.is_some() {
            self.pause_on_critical = other.pause_on_critical;
        }
    }

    fn model_config(&self) -> ModelConfig {
        let provider = match self.provider.as_deref() {
            Some(id) => LlmProvider::parse(id).unwrap_or_else(|| {
                tracing::warn!(provider = id, "Unknown provider, using default");
                LlmProvider::default()
            }),
            None => LlmProvider::default(),
        };
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let config = ModelConfig::with_provider(provider, model);
        match &self.base_url {
            Some(url) => config.with_base_url(url),
            None => config,
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.cooldown_ms {
            config.cooldown_ms = v;
        }
        if let Some(v) = self.max_queries {
            config.fetch.max_queries = v;
        }
        if let Some(v) = self.top_n {
            config.fetch.top_n = v;
        }
        if let Some(v) = self.checkpoint_interval {
            config.verification.checkpoint_interval = v;
        }
        if let Some(v) = self.pause_on_critical {
            config.verification.pause_on_critical = v;
        }
        config
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ConfigResponse {
    config: PersistedConfig,
    /// Config changes apply when the server restarts
    restart_required: bool,
}

/// Get persisted configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Persisted configuration", body = ConfigResponse)
    )
)]
async fn get_config() -> Json<ConfigResponse> {
    Json(ConfigResponse {
        config: PersistedConfig::load().await,
        restart_required: false,
    })
}

/// Update persisted configuration (partial)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Configuration after the update", body = ConfigResponse)
    )
)]
async fn update_config(Json(updates): Json<PersistedConfig>) -> Json<ConfigResponse> {
    let mut config = PersistedConfig::load().await;
    let before = config.clone();
    config.merge(updates);
    if let Err(e) = config.save().await {
        tracing::error!(error = %e, "Failed to save config");
    }
    let restart_required = config != before;
    Json(ConfigResponse {
        config,
        restart_required,
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::engine::get_status,
        api::engine::start_engine,
        api::engine::pause_engine,
        api::engine::resume_engine,
        api::engine::stop_engine,
        api::engine::resolve_checkpoint,
        api::engine::get_verification,
        api::engine::update_verification,
        api::engine::get_history,
        get_config,
        update_config
    ),
    components(
        schemas(
            ApiResponse,
            PersistedConfig,
            ConfigResponse,
            api::engine::EngineStatus,
            api::engine::StartRequest,
            api::engine::VerificationPatchRequest,
            api::engine::CheckpointRequest,
            api::engine::SettingsResponse,
            api::engine::HistoryResponse
        )
    ),
    tags(
        (name = "engine", description = "Discovery engine control"),
        (name = "config", description = "Configuration management")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    let mut response = Response::new(Body::from(spec));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

// === Engine wiring ===

fn build_engine(
    config: &PersistedConfig,
    tx: mpsc::UnboundedSender<EngineEvent>,
) -> anyhow::Result<DiscoveryEngine> {
    let model_config = config.model_config();
    tracing::info!(
        provider = model_config.provider.display_name(),
        model = %model_config.model,
        "Model configured"
    );
    let components =
        EngineComponents::research(Arc::new(RadkitClient::new(model_config)))?.with_event_channel(tx);
    Ok(DiscoveryEngine::new(components, config.engine_config()))
}

/// Load API keys from `.meridian/.env`, then any `.env` in the working directory
fn load_env() {
    let env_path = PathBuf::from(DATA_DIR).join(".env");
    if env_path.exists() {
        if let Err(e) = dotenvy::from_path(&env_path) {
            tracing::warn!(error = %e, "Failed to load {}", env_path.display());
        }
    }
    let _ = dotenvy::dotenv();
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meridian_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// === Server Entry ===

async fn run_server(port: u16) -> anyhow::Result<()> {
    let config = PersistedConfig::load().await;
    let (engine_tx, mut engine_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let (event_tx, _) = broadcast::channel::<EngineEvent>(256);
    let engine = build_engine(&config, engine_tx)?;

    // Fan the engine's ordered stream out to SSE subscribers
    let fanout = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = engine_rx.recv().await {
            let _ = fanout.send(event);
        }
    });

    let state: SharedState = Arc::new(AppState { engine, event_tx });

    let app = Router::new()
        .nest("/api/v1/engine", api::engine::engine_routes())
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Meridian server listening");
    tracing::info!("Engine:  /api/v1/engine/status, /start, /pause, /resume, /stop, /checkpoint, /events");
    tracing::info!("Config:  /api/v1/config (GET, PATCH)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Headless run: auto-continues checkpoints and prints every event
async fn run_headless(
    seeds: PathBuf,
    guidance: Option<String>,
    max_iterations: Option<u32>,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&seeds).await?;
    let seeds: Vec<WorkItem> = serde_json::from_str(&content)?;
    if seeds.is_empty() {
        anyhow::bail!("Seed file contains no items");
    }

    let config = PersistedConfig::load().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = build_engine(&config, tx)?;

    let options = RunOptions {
        guidance,
        max_iterations,
        verification: None,
    };
    if !engine.start(seeds, options) {
        anyhow::bail!("Engine refused to start");
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                match event.kind {
                    EngineEventKind::CheckpointTriggered { checkpoint } => {
                        tracing::info!(iteration = checkpoint.iteration_id, "Auto-continuing checkpoint");
                        engine.resolve_checkpoint(CheckpointDecision::Continue, None, None);
                    }
                    EngineEventKind::StatusChanged { state: EngineState::Stopped } => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping after the current step");
                engine.stop();
            }
        }
    }

    engine.join().await;
    let history = engine.history();
    let found: usize = history.iter().map(|it| it.new_items_found).sum();
    tracing::info!(iterations = history.len(), found, "Run finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    load_env();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Run {
            seeds,
            guidance,
            max_iterations,
        }) => run_headless(seeds, guidance, max_iterations).await,
        Some(CliCommand::Serve { port }) => run_server(port).await,
        None => run_server(8080).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut config = PersistedConfig {
            provider: Some("openai".to_string()),
            batch_size: Some(3),
            ..PersistedConfig::default()
        };
        config.merge(PersistedConfig {
            batch_size: Some(4),
            checkpoint_interval: Some(0),
            ..PersistedConfig::default()
        });
        assert_eq!(config.provider.as_deref(), Some("openai"));
        assert_eq!(config.batch_size, Some(4));
        assert_eq!(config.checkpoint_interval, Some(0));
    }

    #[test]
    fn test_engine_config_overrides() {
        let config = PersistedConfig {
            max_iterations: Some(7),
            top_n: Some(3),
            pause_on_critical: Some(false),
            ..PersistedConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.max_iterations, 7);
        assert_eq!(engine.fetch.top_n, 3);
        assert!(!engine.verification.pause_on_critical);
        assert_eq!(engine.batch_size, EngineConfig::default().batch_size);
    }

    #[test]
    fn test_model_config_defaults_per_provider() {
        let config = PersistedConfig {
            provider: Some("deepseek".to_string()),
            ..PersistedConfig::default()
        };
        let model = config.model_config();
        assert_eq!(model.provider, LlmProvider::DeepSeek);
        assert_eq!(model.model, "deepseek-chat");

        let unknown = PersistedConfig {
            provider: Some("mistral".to_string()),
            ..PersistedConfig::default()
        };
        assert_eq!(unknown.model_config().provider, LlmProvider::Anthropic);
    }

    #[test]
    fn test_openapi_lists_engine_routes() {
        let spec = ApiDoc::openapi().to_json().unwrap();
        assert!(spec.contains("/api/v1/engine/start"));
        assert!(spec.contains("/api/v1/engine/checkpoint"));
    }
}
