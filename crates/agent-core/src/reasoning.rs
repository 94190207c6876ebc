//! Agent Turn Loop
//!
//! One agent owns one conversation and one tool registry. Each user turn runs
//! through a small state machine:
//!
//! ```text
//! Idle ──user msg──▶ AwaitingFirstResponse ──no tool calls──────────────────▶ Idle
//!                              │
//!                              └─tool calls─▶ DispatchingTools ─▶ AwaitingFinalResponse ─▶ Idle
//!                                                   ▲                      │
//!                                                   └──tool calls (hops)───┘
//! ```
//!
//! With the default budget of one hop, tools requested by the final
//! response are recorded in history but not run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{CompletionOptions, LlmClient};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message, Role};
use crate::plugin::{PluginCatalog, PluginLoader};
use crate::registry::{ToolRegistry, UnknownToolPolicy};
use crate::tool::{PackageInfo, Tool, ToolPackage, ToolSchema};

/// Where the agent is within a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingFirstResponse,
    DispatchingTools,
    AwaitingFinalResponse,
    Closed,
}

/// The main Agent struct
pub struct Agent {
    id: Uuid,
    name: String,
    model: String,
    config: AgentConfig,
    client: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    conversation: Conversation,
    state: AgentState,
}

impl Agent {
    /// Create an agent and load `plugin_paths` into its registry
    pub async fn new<S: Into<String>>(
        client: Arc<dyn LlmClient>,
        name: impl Into<String>,
        model: impl Into<String>,
        plugin_paths: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let config = AgentConfig::new(name, model).with_plugins(plugin_paths);
        Self::from_config(client, config).await
    }

    /// Create an agent from a declarative configuration
    pub async fn from_config(client: Arc<dyn LlmClient>, config: AgentConfig) -> Result<Self> {
        AgentBuilder::new(client).config(config).build().await
    }

    pub fn builder(client: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder::new(client)
    }

    /// Run one turn and return the final assistant reply
    pub async fn send_message(&mut self, text: impl Into<String>) -> Result<String> {
        self.send_message_with_cancel(text, &CancellationToken::new()).await
    }

    /// Like [`Agent::send_message`], aborting LLM requests and tool calls once
    /// `cancel` fires
    ///
    /// On error the messages appended so far stay in history.
    pub async fn send_message_with_cancel(
        &mut self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if self.state == AgentState::Closed {
            return Err(AgentError::Closed);
        }

        self.conversation.push(Message::user(text));
        let result = self.run_turn(cancel).await;
        self.transition(AgentState::Idle);

        if let Err(e) = &result {
            tracing::warn!(agent = %self.name, error = %e, "Turn failed");
        }
        result
    }

    async fn run_turn(&mut self, cancel: &CancellationToken) -> Result<String> {
        let options = self.config.completion_options();
        let schemas = self.registry.schemas();
        let mut hops = 0;

        self.transition(AgentState::AwaitingFirstResponse);
        let mut reply = self.complete(&schemas, &options, cancel).await?;

        loop {
            let content = reply.content.clone();
            let calls = reply.tool_calls.clone();
            self.conversation.push(reply);

            if calls.is_empty() {
                return Ok(content);
            }
            if hops == self.config.max_tool_hops {
                tracing::warn!(
                    agent = %self.name,
                    hops,
                    pending = calls.len(),
                    "Tool hop budget exhausted, leaving calls unanswered"
                );
                return Ok(content);
            }
            hops += 1;

            self.transition(AgentState::DispatchingTools);
            tracing::debug!(agent = %self.name, hop = hops, calls = calls.len(), "Dispatching tool calls");
            for answer in self.registry.dispatch_all(&calls, cancel).await {
                self.conversation.push(answer);
            }

            self.transition(AgentState::AwaitingFinalResponse);
            reply = self.complete(&schemas, &options, cancel).await?;
        }
    }

    async fn complete(
        &self,
        schemas: &[ToolSchema],
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        self.conversation.check_tool_correlation()?;

        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            reply = self.client.complete(self.conversation.messages(), schemas, options) => reply?,
        };

        if reply.role != Role::Assistant {
            return Err(AgentError::Transport(format!(
                "expected an assistant message, got role '{}'",
                reply.role
            )));
        }
        Ok(reply)
    }

    fn transition(&mut self, next: AgentState) {
        if self.state != next {
            tracing::debug!(agent = %self.name, from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }
    }

    /// Release the registry (stopping plugin processes) and the turn history
    ///
    /// Every later [`Agent::send_message`] fails with [`AgentError::Closed`].
    pub fn close(&mut self) {
        if self.state == AgentState::Closed {
            return;
        }
        tracing::info!(agent = %self.name, id = %self.id, "Closing agent");
        self.registry.clear();
        self.conversation = Conversation::with_system_prompt(self.config.system_prompt.clone());
        self.name.clear();
        self.model.clear();
        self.state = AgentState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == AgentState::Closed
    }

    /// Session id
    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub const fn state(&self) -> AgentState {
        self.state
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Every message so far, system prompt first
    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Mutable registry access, e.g. to register tools between turns
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Registered tools in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.registry.tools()
    }

    /// Provenance of every loaded package
    pub fn packages(&self) -> &[PackageInfo] {
        self.registry.packages()
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Agent: {}", self.name)?;
        writeln!(f, "Model: {}", self.model)?;
        write!(f, "{}", self.registry)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("messages", &self.conversation.len())
            .finish_non_exhaustive()
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    client: Arc<dyn LlmClient>,
    config: AgentConfig,
    catalog: PluginCatalog,
    registry: ToolRegistry,
}

impl AgentBuilder {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            config: AgentConfig::default(),
            catalog: PluginCatalog::default(),
            registry: ToolRegistry::new(),
        }
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Add one plugin spec
    #[must_use]
    pub fn plugin(mut self, spec: impl Into<String>) -> Self {
        self.config.plugin_paths.push(spec.into());
        self
    }

    #[must_use]
    pub fn plugins<S: Into<String>>(mut self, specs: impl IntoIterator<Item = S>) -> Self {
        self.config.plugin_paths.extend(specs.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn plugin_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.plugin_dir = dir.into();
        self
    }

    /// Packages reachable through `builtin:<name>` specs
    #[must_use]
    pub fn catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register a tool directly, without a plugin
    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.registry.register(tool);
        self
    }

    #[must_use]
    pub fn package(mut self, package: ToolPackage) -> Self {
        self.registry.register_package(package);
        self
    }

    #[must_use]
    pub fn max_tool_hops(mut self, hops: usize) -> Self {
        self.config.max_tool_hops = hops;
        self
    }

    /// Per-call tool timeout; `None` or a zero duration disables it
    #[must_use]
    pub fn tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.tool_timeout_secs = timeout.filter(|t| !t.is_zero()).map(|t| t.as_secs_f64());
        self
    }

    #[must_use]
    pub fn unknown_tool_policy(mut self, policy: UnknownToolPolicy) -> Self {
        self.config.unknown_tool_policy = policy;
        self
    }

    #[must_use]
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    /// Validate the configuration and load every plugin
    ///
    /// Fails without building anything if a single plugin fails to load.
    pub async fn build(self) -> Result<Agent> {
        let Self {
            client,
            config,
            catalog,
            mut registry,
        } = self;
        config.validate()?;

        registry.set_tool_timeout(config.tool_timeout());
        registry.set_unknown_tool_policy(config.unknown_tool_policy);

        let loader = PluginLoader::new()
            .with_plugin_dir(&config.plugin_dir)
            .with_catalog(catalog);
        loader.load_into(config.plugin_paths.as_slice(), &mut registry).await?;

        let agent = Agent {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            model: config.model.clone(),
            client,
            registry,
            conversation: Conversation::with_system_prompt(config.system_prompt.clone()),
            state: AgentState::Idle,
            config,
        };

        tracing::info!(
            agent = %agent.name,
            id = %agent.id,
            model = %agent.model,
            tools = agent.registry.len(),
            "Agent ready"
        );
        Ok(agent)
    }
}

/// Agent handle for concurrent callers; turns are serialised
#[derive(Clone, Debug)]
pub struct SharedAgent {
    inner: Arc<Mutex<Agent>>,
}

impl SharedAgent {
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Arc::new(Mutex::new(agent)),
        }
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<String> {
        self.inner.lock().await.send_message(text).await
    }

    pub async fn send_message_with_cancel(
        &self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.inner.lock().await.send_message_with_cancel(text, cancel).await
    }

    /// Exclusive access, waiting for any running turn
    pub async fn lock(&self) -> MutexGuard<'_, Agent> {
        self.inner.lock().await
    }

    pub async fn close(&self) {
        self.inner.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedClient;
    use crate::error::ToolError;
    use crate::message::ToolCall;
    use crate::tool::{ParameterSchema, object_schema};

    fn add_tool() -> Tool {
        Tool::from_fn(
            "add",
            "Add two numbers",
            object_schema(&[
                ParameterSchema::required("a", "number", "First operand"),
                ParameterSchema::required("b", "number", "Second operand"),
            ]),
            |args| {
                let number = |key: &str| {
                    args.get(key)
                        .and_then(serde_json::Value::as_f64)
                        .ok_or_else(|| ToolError::exec(format!("missing number '{key}'")))
                };
                Ok(format!("{}", number("a")? + number("b")?))
            },
        )
    }

    #[tokio::test]
    async fn test_builder_tool_timeout_is_exact() {
        let client = Arc::new(ScriptedClient::new());
        let agent = Agent::builder(client.clone())
            .tool_timeout(Some(Duration::from_millis(1500)))
            .build()
            .await
            .unwrap();
        assert_eq!(agent.registry().tool_timeout(), Some(Duration::from_millis(1500)));

        let agent = Agent::builder(client)
            .tool_timeout(Some(Duration::ZERO))
            .build()
            .await
            .unwrap();
        assert_eq!(agent.registry().tool_timeout(), None);
        assert_eq!(agent.config().tool_timeout_secs, None);
    }

    async fn agent_with(client: &Arc<ScriptedClient>) -> Agent {
        Agent::builder(client.clone())
            .name("test")
            .model("test-model")
            .tool(add_tool())
            .build()
            .await
            .unwrap()
    }

    fn roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_add_turn_end_to_end() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("call_1", "add", r#"{"a":2,"b":3}"#)])
                .reply("5"),
        );
        let mut agent = agent_with(&client).await;

        let reply = agent.send_message("add 2 and 3").await.unwrap();

        assert_eq!(reply, "5");
        assert_eq!(client.call_count(), 2);
        let history = agent.history();
        assert_eq!(history.len(), 5);
        assert_eq!(
            roles(&history[1..]),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[3].content, "5");
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(agent.state(), AgentState::Idle);

        let first = &client.requests()[0];
        assert_eq!(first.tools[0].name, "add");
        assert_eq!(first.options.model, "test-model");
        assert_eq!(first.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_plain_reply_is_single_hop() {
        let client = Arc::new(ScriptedClient::new().reply("hello"));
        let mut agent = agent_with(&client).await;

        assert_eq!(agent.send_message("hi").await.unwrap(), "hello");
        assert_eq!(client.call_count(), 1);
        assert_eq!(agent.history().len(), 3);
    }

    #[tokio::test]
    async fn test_tool_answers_follow_call_order() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![
                    ToolCall::with_id("c1", "add", r#"{"a":1,"b":1}"#),
                    ToolCall::with_id("c2", "add", r#"{"a":10,"b":5}"#),
                ])
                .reply("2 and 15"),
        );
        let mut agent = agent_with(&client).await;
        agent.send_message("two sums").await.unwrap();

        assert_eq!(client.call_count(), 2);
        let second = &client.requests()[1].messages;
        let answers: Vec<_> = second[3..]
            .iter()
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(answers, vec![("c1", "2"), ("c2", "15")]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_answered_by_default() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("c1", "frobnicate", "{}")])
                .reply("sorry"),
        );
        let mut agent = agent_with(&client).await;
        agent.send_message("frobnicate it").await.unwrap();

        let second = &client.requests()[1].messages;
        let last = second.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "Error: unknown tool: frobnicate");
    }

    #[tokio::test]
    async fn test_unknown_tool_dropped_under_legacy_policy() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("c1", "frobnicate", "{}")])
                .reply("sorry"),
        );
        let mut agent = Agent::builder(client.clone())
            .tool(add_tool())
            .unknown_tool_policy(UnknownToolPolicy::Drop)
            .build()
            .await
            .unwrap();
        agent.send_message("frobnicate it").await.unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), requests[0].messages.len() + 1);
        assert_eq!(requests[1].messages.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_bad_arguments_become_error_answer() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("c1", "add", "not-json")])
                .reply("could not add"),
        );
        let mut agent = agent_with(&client).await;
        assert_eq!(agent.send_message("add").await.unwrap(), "could not add");

        assert_eq!(client.call_count(), 2);
        let answer = &agent.history()[3];
        assert_eq!(answer.role, Role::Tool);
        assert!(answer.content.to_lowercase().contains("error"));
    }

    #[tokio::test]
    async fn test_plugin_failure_aborts_construction() {
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new());

        let err = Agent::new(client.clone(), "test", "model", ["./no/such/plugin"])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PluginLoad { .. }));

        let catalog = PluginCatalog::new().with("math", || {
            ToolPackage::new("Math", "v1", "").with_tool(add_tool())
        });
        let err = Agent::builder(client)
            .catalog(catalog)
            .plugins(["builtin:math", "builtin:missing"])
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PluginLoad { plugin, .. } if plugin == "builtin:missing"));
    }

    #[tokio::test]
    async fn test_history_is_append_only() {
        let client = Arc::new(
            ScriptedClient::new()
                .reply("first")
                .tool_calls(vec![ToolCall::with_id("c1", "add", r#"{"a":"x"}"#)])
                .reply("second"),
        );
        let mut agent = agent_with(&client).await;

        agent.send_message("one").await.unwrap();
        let before: Vec<(Role, String)> = agent
            .history()
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect();

        agent.send_message("two").await.unwrap();
        let after = agent.history();
        assert!(after.len() > before.len());
        for (index, (role, content)) in before.iter().enumerate() {
            assert_eq!(after[index].role, *role);
            assert_eq!(&after[index].content, content);
        }
    }

    #[tokio::test]
    async fn test_transport_error_keeps_user_message() {
        let client = Arc::new(ScriptedClient::new().fail("connection refused").reply("ok"));
        let mut agent = agent_with(&client).await;

        let err = agent.send_message("hello?").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
        assert_eq!(agent.history().len(), 2);
        assert_eq!(agent.history()[1].content, "hello?");
        assert_eq!(agent.state(), AgentState::Idle);

        assert_eq!(agent.send_message("again").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_multi_hop_budget() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("c1", "add", r#"{"a":1,"b":2}"#)])
                .tool_calls(vec![ToolCall::with_id("c2", "add", r#"{"a":3,"b":3}"#)])
                .reply("6"),
        );
        let mut agent = Agent::builder(client.clone())
            .tool(add_tool())
            .max_tool_hops(2)
            .build()
            .await
            .unwrap();

        assert_eq!(agent.send_message("chain").await.unwrap(), "6");
        assert_eq!(client.call_count(), 3);
        assert_eq!(agent.history().len(), 7);
    }

    #[tokio::test]
    async fn test_second_round_of_calls_is_not_dispatched() {
        let client = Arc::new(
            ScriptedClient::new()
                .tool_calls(vec![ToolCall::with_id("c1", "add", r#"{"a":1,"b":2}"#)])
                .message(Message::assistant_with_tools(
                    "let me add more",
                    vec![ToolCall::with_id("c2", "add", r#"{"a":3,"b":3}"#)],
                ))
                .reply("next turn"),
        );
        let mut agent = agent_with(&client).await;

        assert_eq!(agent.send_message("chain").await.unwrap(), "let me add more");
        assert_eq!(client.call_count(), 2);
        let last = agent.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.has_tool_calls());

        assert_eq!(agent.send_message("go on").await.unwrap(), "next turn");
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let client = Arc::new(ScriptedClient::new().reply("late").with_delay(Duration::from_secs(30)));
        let mut agent = agent_with(&client).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent.send_message_with_cancel("hi", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_closed_agent_rejects_messages() {
        let client = Arc::new(ScriptedClient::new().reply("unused"));
        let mut agent = agent_with(&client).await;

        agent.close();
        assert!(agent.is_closed());
        assert!(agent.registry().is_empty());
        assert!(agent.name().is_empty());

        let err = agent.send_message("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Closed));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_agent_serialises_turns() {
        let client = Arc::new(ScriptedClient::new().reply("a").reply("b"));
        let shared = SharedAgent::new(agent_with(&client).await);

        let (first, second) = tokio::join!(shared.send_message("one"), shared.send_message("two"));
        assert!(first.is_ok() && second.is_ok());

        let agent = shared.lock().await;
        assert_eq!(
            roles(&agent.history()[1..]),
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_display() {
        let client = Arc::new(ScriptedClient::new());
        let agent = agent_with(&client).await;

        let shown = agent.to_string();
        assert!(shown.starts_with("Agent: test\nModel: test-model\n"));
        assert!(shown.contains("add: Add two numbers"));
    }
}
