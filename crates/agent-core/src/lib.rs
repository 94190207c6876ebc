//! # agent-core
//!
//! Tool-calling core of a conversational agent: the tool registry, plugin
//! loading and the per-turn conversation state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Agent                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Turn loop  │──│    Tool     │──│     LlmClient       │  │
//! │  │ (reasoning) │  │  Registry   │  │     (Strategy)      │  │
//! │  └─────────────┘  └──────▲──────┘  └─────────────────────┘  │
//! └──────────────────────────┼──────────────────────────────────┘
//!                            │ register_package
//!                   ┌────────┴────────┐
//!                   │  PluginLoader   │── builtin:<name> ──▶ PluginCatalog
//!                   └────────┬────────┘
//!                            └── executable ──▶ child process (JSON lines)
//! ```
//!
//! The `LlmClient` trait keeps the agent independent of any particular chat
//! completion service.

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod plugin;
pub mod reasoning;
pub mod registry;
pub mod tool;

pub use client::{CompletionOptions, GenerationOptions, LlmClient, ScriptedClient};
pub use config::AgentConfig;
pub use error::{AgentError, Result, ToolError};
pub use message::{Conversation, Message, Role, ToolCall};
pub use plugin::{PluginCatalog, PluginLoader, PluginSource};
pub use reasoning::{Agent, AgentBuilder, AgentState, SharedAgent};
pub use registry::{ToolRegistry, UnknownToolPolicy};
pub use tool::{PackageInfo, ParameterSchema, Tool, ToolArgs, ToolExec, ToolPackage, ToolSchema};
