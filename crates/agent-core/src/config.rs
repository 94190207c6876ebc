//! Agent Configuration
//!
//! Declarative construction input for an [`crate::Agent`]. Serde derives make
//! it loadable from any format; [`AgentConfig::from_env`] covers the common
//! case of configuring through environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{CompletionOptions, GenerationOptions};
use crate::error::{AgentError, Result};
use crate::plugin::DEFAULT_PLUGIN_DIR;
use crate::registry::UnknownToolPolicy;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools.
Call a tool whenever it can answer the request more reliably than you can.
If none of the available tools fits, say that you don't have the necessary tools.";

pub const DEFAULT_MAX_TOOL_HOPS: usize = 1;
pub const DEFAULT_TOOL_TIMEOUT_SECS: f64 = 60.0;

/// Agent configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name of the agent
    pub name: String,

    /// Model identifier passed to the LLM client
    pub model: String,

    /// Plugin specs: `builtin:<name>`, a path, or a bare name under `plugin_dir`
    pub plugin_paths: Vec<String>,

    /// First message of every conversation
    pub system_prompt: String,

    /// Rounds of tool dispatch allowed per turn
    pub max_tool_hops: usize,

    /// Per-call tool timeout in seconds, fractions allowed; `None` or 0 disables it
    pub tool_timeout_secs: Option<f64>,

    /// What to do with calls naming an unregistered tool
    pub unknown_tool_policy: UnknownToolPolicy,

    /// Directory searched for bare plugin names
    pub plugin_dir: String,

    /// Sampling settings forwarded to the LLM client
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "assistant".into(),
            model: "gpt-4o-mini".into(),
            plugin_paths: Vec::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_hops: DEFAULT_MAX_TOOL_HOPS,
            tool_timeout_secs: Some(DEFAULT_TOOL_TIMEOUT_SECS),
            unknown_tool_policy: UnknownToolPolicy::default(),
            plugin_dir: DEFAULT_PLUGIN_DIR.into(),
            generation: GenerationOptions::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_plugins<S: Into<String>>(mut self, plugins: impl IntoIterator<Item = S>) -> Self {
        self.plugin_paths = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Defaults overlaid with `AGENT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `AGENT_*` key
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("AGENT_NAME") {
            config.name = name;
        }
        if let Some(model) = lookup("AGENT_MODEL") {
            config.model = model;
        }
        if let Some(plugins) = lookup("AGENT_PLUGINS") {
            config.plugin_paths = plugins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup("AGENT_PLUGIN_DIR") {
            config.plugin_dir = dir;
        }
        if let Some(hops) = lookup("AGENT_MAX_TOOL_HOPS") {
            config.max_tool_hops = parse_var("AGENT_MAX_TOOL_HOPS", &hops)?;
        }
        if let Some(secs) = lookup("AGENT_TOOL_TIMEOUT_SECS") {
            config.tool_timeout_secs = Some(parse_var("AGENT_TOOL_TIMEOUT_SECS", &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Config("agent name must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        if self.max_tool_hops == 0 {
            return Err(AgentError::Config("max_tool_hops must be at least 1".into()));
        }
        if self.tool_timeout_secs.is_some_and(|secs| !secs.is_finite() || secs < 0.0) {
            return Err(AgentError::Config("tool_timeout_secs must be a non-negative number".into()));
        }
        Ok(())
    }

    /// Effective tool timeout
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Options attached to every LLM request
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            generation: self.generation.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AgentError::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tool_hops, 1);
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.unknown_tool_policy, UnknownToolPolicy::Answer);
        assert_eq!(config.plugin_dir, "plugins");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overlays_env() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("AGENT_NAME", "calc"),
            ("AGENT_MODEL", "llama3.2"),
            ("AGENT_PLUGINS", "builtin:calculator, ./bin/clock-plugin,,"),
            ("AGENT_MAX_TOOL_HOPS", "3"),
            ("AGENT_TOOL_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.name, "calc");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.plugin_paths, vec!["builtin:calculator", "./bin/clock-plugin"]);
        assert_eq!(config.max_tool_hops, 3);
        assert_eq!(config.tool_timeout(), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[("AGENT_MAX_TOOL_HOPS", "many")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(msg) if msg.contains("AGENT_MAX_TOOL_HOPS")));

        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_MAX_TOOL_HOPS", "0")])).is_err());
        assert!(AgentConfig::new("", "model").validate().is_err());
        assert!(AgentConfig::new("name", " ").validate().is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("AGENT_TOOL_TIMEOUT_SECS", "-1")])).is_err());
    }

    #[test]
    fn test_fractional_tool_timeout() {
        let config = AgentConfig::from_lookup(lookup(&[("AGENT_TOOL_TIMEOUT_SECS", "1.5")])).unwrap();
        assert_eq!(config.tool_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"name": "calc", "model": "gpt-4o", "plugin_paths": ["builtin:calculator"], "unknown_tool_policy": "drop"}"#,
        )
        .unwrap();
        assert_eq!(config.unknown_tool_policy, UnknownToolPolicy::Drop);
        assert_eq!(config.max_tool_hops, 1);
        assert_eq!(config.generation.max_tokens, 2048);
    }
}
