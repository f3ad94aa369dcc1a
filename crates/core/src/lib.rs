//! # Meridian Core
//!
//! Autonomous research discovery: a multi-agent analysis pipeline driven by
//! an iterative loop that finds, ranks and verifies new work items.
//!
//! ## Architecture
//!
//! - `agents/` - Agent task trait, registry and the default research set
//! - `pipeline/` - Phased concurrent execution of a registry over a batch
//! - `discovery/` - Query extraction, discovery sources, scoring
//! - `verification/` - Plausibility, grounding, loop health, checkpoints
//! - `engine/` - The discovery loop state machine
//! - `llm/` + `models` - Model client boundary and provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_core::engine::{DiscoveryEngine, EngineComponents, EngineConfig, RunOptions};
//!
//! let components = EngineComponents::research(model)?.with_event_channel(tx);
//! let engine = DiscoveryEngine::new(components, EngineConfig::default());
//! engine.start(seeds, RunOptions::default().with_guidance("protein design"));
//! engine.join().await;
//! ```

pub mod agents;
pub mod discovery;
pub mod engine;
pub mod events;
pub mod items;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod retry;
pub mod text;
pub mod verification;

pub use engine::{DiscoveryEngine, EngineComponents, EngineConfig, EngineState, RunOptions};
pub use events::{EngineEvent, EngineEventKind};
pub use items::WorkItem;
