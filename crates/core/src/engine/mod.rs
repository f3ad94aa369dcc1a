//! # Engine
//!
//! The discovery loop and the state it owns.

pub mod config;
pub mod discovery;
pub mod state;

pub use config::{EngineConfig, RunOptions};
pub use discovery::{DiscoveryEngine, EngineComponents};
pub use state::{
    Checkpoint, CheckpointDecision, CheckpointResolution, EngineState, Iteration, RunState,
};
