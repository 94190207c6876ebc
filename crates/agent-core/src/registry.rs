//! Tool Registry
//!
//! Single source of truth for what the model can currently call and how to
//! run it. Every registration derives an executor that decodes the raw JSON
//! arguments and runs the tool; [`ToolRegistry::dispatch`] folds any failure
//! into the tool message that answers the call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::message::{Message, ToolCall};
use crate::tool::{PackageInfo, Tool, ToolArgs, ToolPackage, ToolSchema};

/// Derived executor: raw JSON arguments in, tool output out
type Handler = Arc<dyn Fn(String, CancellationToken) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// What to do with a call naming a tool that is not registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownToolPolicy {
    /// Answer with an error tool message so every call gets a reply
    #[default]
    Answer,
    /// Produce no message at all
    Drop,
}

/// Registry for available tools, owned by one agent
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    handlers: HashMap<String, Handler>,
    order: Vec<String>,
    packages: Vec<PackageInfo>,
    tool_timeout: Option<Duration>,
    unknown_tool_policy: UnknownToolPolicy,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            handlers: HashMap::new(),
            order: Vec::new(),
            packages: Vec::new(),
            tool_timeout: None,
            unknown_tool_policy: UnknownToolPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_unknown_tool_policy(mut self, policy: UnknownToolPolicy) -> Self {
        self.unknown_tool_policy = policy;
        self
    }

    pub fn set_tool_timeout(&mut self, timeout: Option<Duration>) {
        self.tool_timeout = timeout;
    }

    pub fn set_unknown_tool_policy(&mut self, policy: UnknownToolPolicy) {
        self.unknown_tool_policy = policy;
    }

    pub const fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout
    }

    pub const fn unknown_tool_policy(&self) -> UnknownToolPolicy {
        self.unknown_tool_policy
    }

    /// Register a tool, replacing any tool with the same name
    ///
    /// The schema is not validated. An overwrite keeps the position of the
    /// first registration in [`ToolRegistry::schemas`].
    pub fn register(&mut self, tool: Tool) {
        let name = tool.name.clone();
        if self.tools.contains_key(&name) {
            tracing::debug!(tool = %name, "Replacing registered tool");
        } else {
            self.order.push(name.clone());
        }
        self.handlers.insert(name.clone(), make_handler(tool.clone()));
        self.tools.insert(name, tool);
    }

    /// Register every tool of a package and record its provenance
    pub fn register_package(&mut self, package: ToolPackage) {
        let info = package.info();
        tracing::debug!(
            package = %info.name,
            version = %info.version,
            tools = package.tools.len(),
            "Registering tool package"
        );
        for tool in package.tools {
            self.register(tool);
        }
        self.packages.retain(|p| p.name != info.name);
        self.packages.push(info);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// LLM-facing schema of every tool, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.iter().map(Tool::schema).collect()
    }

    /// Tools in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.iter().cloned().collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Packages loaded into this registry
    pub fn packages(&self) -> &[PackageInfo] {
        &self.packages
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Drop every tool, executor and package record
    pub fn clear(&mut self) {
        self.tools.clear();
        self.handlers.clear();
        self.order.clear();
        self.packages.clear();
    }

    /// Run one tool call and produce the tool message that answers it
    ///
    /// Returns `None` only for unknown tools under [`UnknownToolPolicy::Drop`].
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> Option<Message> {
        let Some(handler) = self.handlers.get(&call.name).cloned() else {
            return match self.unknown_tool_policy {
                UnknownToolPolicy::Drop => {
                    tracing::warn!(tool = %call.name, call_id = %call.id, "Dropping call to unknown tool");
                    None
                }
                UnknownToolPolicy::Answer => {
                    tracing::warn!(tool = %call.name, call_id = %call.id, "Call to unknown tool");
                    let error = ToolError::UnknownTool(call.name.clone());
                    Some(Message::tool(format!("Error: {error}"), call.id.clone()))
                }
            };
        };

        tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        let content = match self.run(&handler, call, cancel).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, %error, "Tool failed");
                format!("Error: {error}")
            }
        };

        Some(Message::tool(content, call.id.clone()))
    }

    /// Run several calls concurrently; answers come back in call order
    pub async fn dispatch_all(&self, calls: &[ToolCall], cancel: &CancellationToken) -> Vec<Message> {
        join_all(calls.iter().map(|call| self.dispatch(call, cancel)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn run(
        &self,
        handler: &Handler,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let token = cancel.child_token();
        let execution = handler(call.arguments.clone(), token.clone());

        let bounded = async {
            match self.tool_timeout {
                Some(limit) => match tokio::time::timeout(limit, execution).await {
                    Ok(result) => result,
                    Err(_) => {
                        token.cancel();
                        Err(ToolError::Timeout(limit))
                    }
                },
                None => execution.await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::Cancelled),
            result = bounded => result,
        }
    }
}

impl fmt::Display for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tools:")?;
        if self.is_empty() {
            return writeln!(f, "  (none)");
        }
        for tool in self.iter() {
            writeln!(f, "  - {}: {}", tool.name, tool.description)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .field("packages", &self.packages)
            .field("tool_timeout", &self.tool_timeout)
            .field("unknown_tool_policy", &self.unknown_tool_policy)
            .finish()
    }
}

fn make_handler(tool: Tool) -> Handler {
    Arc::new(move |raw: String, cancel: CancellationToken| -> BoxFuture<'static, Result<String, ToolError>> {
        let tool = tool.clone();
        Box::pin(async move {
            let args = decode_arguments(&raw)?;
            tool.exec(args, cancel).await
        })
    })
}

/// Decode the model's argument string into a JSON object
///
/// Blank input counts as `{}`: some services send `""` for calls without
/// arguments.
pub fn decode_arguments(raw: &str) -> Result<ToolArgs, ToolError> {
    if raw.trim().is_empty() {
        return Ok(ToolArgs::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(other) => Err(ToolError::ArgumentDecode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolError::ArgumentDecode(e.to_string())),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
