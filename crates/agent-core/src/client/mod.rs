//! LLM Client Contract
//!
//! The agent talks to the hosted model exclusively through [`LlmClient`]:
//! given the full message list and the tool schema list, return one
//! assistant message that may carry tool calls. Model selection and
//! sampling settings ride along in [`CompletionOptions`] untouched.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::client::{CompletionOptions, LlmClient};
//!
//! let reply = client.complete(conversation.messages(), &registry.schemas(), &options).await?;
//! ```

pub mod mock;

pub use mock::ScriptedClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::ToolSchema;

/// Sampling settings forwarded to the LLM service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.0 }
const fn default_max_tokens() -> u32 { 2048 }
const fn default_top_p() -> f32 { 1.0 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Per-request options: the agent's model plus its generation settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "llama3.2")
    pub model: String,

    #[serde(flatten)]
    pub generation: GenerationOptions,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            generation: GenerationOptions::default(),
        }
    }
}

/// Stateless chat-completion service
///
/// Implementations map transport failures to [`crate::AgentError::Transport`],
/// [`crate::AgentError::RateLimited`] or [`crate::AgentError::Auth`]. Retries,
/// if any, belong here and not in the agent.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produce the next assistant message for `messages`
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &CompletionOptions,
    ) -> Result<Message>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!(opts.temperature.abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 2048);
        assert!(opts.stop_sequences.is_empty());
    }

    #[test]
    fn test_completion_options_flatten() {
        let opts = CompletionOptions::new("gpt-4o-mini");
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 2048);
    }
}
