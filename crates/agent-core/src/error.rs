//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
///
/// Only transport and plugin-load failures surface here. Everything that goes
/// wrong inside a tool is a [`ToolError`] and gets folded back into the
/// conversation as the tool's answer.
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM client call failed (network, protocol, provider error)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rate limited by the LLM service
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication against the LLM service failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A plugin could not be resolved, started or understood
    #[error("Failed to load plugin '{plugin}': {reason}")]
    PluginLoad { plugin: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The agent was closed and can no longer be used
    #[error("Agent is closed")]
    Closed,

    /// The turn was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn plugin_load(plugin: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PluginLoad {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("The AI service encountered an error: {msg}"),
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            Self::PluginLoad { plugin, .. } => format!("The tool plugin '{plugin}' could not be loaded."),
            Self::Config(msg) => format!("Invalid agent configuration: {msg}"),
            Self::Closed => "This agent has been closed. Start a new session.".into(),
            Self::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Errors raised while running a single tool call
///
/// These never abort a turn. The registry renders them into the content of
/// the tool message that answers the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Arguments were not a JSON object
    #[error("argument decode error: {0}")]
    ArgumentDecode(String),

    /// The model asked for a tool that is not registered
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran and reported a failure
    #[error("{0}")]
    Exec(String),

    /// The tool did not finish in time
    #[error("tool timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The turn was cancelled while the tool was running
    #[error("tool execution cancelled")]
    Cancelled,

    /// Talking to an out-of-process plugin failed
    #[error("plugin error: {0}")]
    Plugin(String),
}

impl ToolError {
    pub fn exec(msg: impl std::fmt::Display) -> Self {
        Self::Exec(msg.to_string())
    }
}
