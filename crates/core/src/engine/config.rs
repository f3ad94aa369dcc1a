//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::discovery::FetchConfig;
use crate::llm::CallOptions;
use crate::pipeline::PipelineConfig;
use crate::verification::{VerificationSettings, VerificationSettingsPatch};

/// Tuning for one discovery engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Items drawn from the queue per iteration
    pub batch_size: usize,
    /// Default iteration cap per run
    pub max_iterations: u32,
    /// Pause between iterations
    pub cooldown_ms: u64,
    /// Interval of cooldown countdown events
    pub cooldown_tick_ms: u64,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Settings each run starts from
    #[serde(default)]
    pub verification: VerificationSettings,
    /// Sampling options for the plausibility call
    #[serde(default = "default_plausibility_call")]
    pub plausibility_call: CallOptions,
}

fn default_plausibility_call() -> CallOptions {
    CallOptions {
        temperature: 0.2,
        max_tokens: 2048,
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            max_iterations: 20,
            cooldown_ms: 10_000,
            cooldown_tick_ms: 1_000,
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            verification: VerificationSettings::default(),
            plausibility_call: default_plausibility_call(),
        }
    }
}

impl EngineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Never zero, so the countdown always advances
    pub fn cooldown_tick(&self) -> Duration {
        Duration::from_millis(self.cooldown_tick_ms.max(1))
    }
}

/// Per-run options passed to `start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Steering string for query extraction and idea generation
    #[serde(default)]
    pub guidance: Option<String>,
    /// Overrides `EngineConfig::max_iterations`
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Applied on top of `EngineConfig::verification`
    #[serde(default)]
    pub verification: Option<VerificationSettingsPatch>,
}

impl RunOptions {
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.cooldown(), Duration::from_secs(10));
        assert_eq!(config.verification.checkpoint_interval, 5);
    }

    #[test]
    fn test_partial_config_file() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"batch_size": 3, "max_iterations": 5, "cooldown_ms": 0, "cooldown_tick_ms": 0}"#,
        )
        .unwrap();
        assert_eq!(config.fetch.top_n, 5);
        assert_eq!(config.cooldown_tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::default()
            .with_guidance("membrane proteins")
            .with_max_iterations(3);
        assert_eq!(options.guidance.as_deref(), Some("membrane proteins"));
        assert_eq!(options.max_iterations, Some(3));
    }
}
