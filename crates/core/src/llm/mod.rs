//! # LLM Boundary
//!
//! The single seam through which the core talks to a language model.
//! Pipeline agents and the plausibility check only see [`ModelClient`];
//! [`RadkitClient`] is the production implementation.

pub mod helpers;

pub use helpers::extract_json;

use crate::models::ModelConfig;
use crate::run_llm_function;
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a model conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options for a single call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// A fully built request, as produced by an agent task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub options: CallOptions,
}

/// Anything that can answer a prompt with text.
///
/// Failures are returned as errors; callers own their fallback and retry
/// behavior.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> anyhow::Result<String>;
}

/// Reply envelope for radkit's structured output
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ModelReply {
    /// The complete answer, exactly as requested by the instructions
    pub content: String,
}

/// radkit-backed client for the configured provider
///
/// radkit's `LlmFunction` owns sampling parameters, so `CallOptions` are
/// folded into the instructions as output limits rather than sent verbatim.
#[derive(Debug, Clone)]
pub struct RadkitClient {
    config: ModelConfig,
}

impl RadkitClient {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[async_trait]
impl ModelClient for RadkitClient {
    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> anyhow::Result<String> {
        let instructions = format!(
            "{}\n\nKeep the answer under roughly {} tokens.",
            system_prompt, options.max_tokens
        );
        let input = render_transcript(messages);

        tracing::debug!(
            provider = self.config.provider.display_name(),
            model = %self.config.model,
            messages = messages.len(),
            "Calling model"
        );

        let reply = run_llm_function!(&self.config, ModelReply, instructions.as_str(), input)?;
        Ok(reply.content)
    }
}

/// Flatten a conversation into the single input radkit functions take
fn render_transcript(messages: &[ChatMessage]) -> String {
    if let [only] = messages {
        return only.content.clone();
    }

    messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!("User:\n{}", m.content),
            Role::Assistant => format!("Assistant:\n{}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message_transcript_is_verbatim() {
        let messages = vec![ChatMessage::user("Analyze these papers")];
        assert_eq!(render_transcript(&messages), "Analyze these papers");
    }

    #[test]
    fn test_multi_turn_transcript_labels_roles() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];
        let transcript = render_transcript(&messages);
        assert!(transcript.starts_with("User:\nfirst"));
        assert!(transcript.contains("Assistant:\nreply"));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }
}
