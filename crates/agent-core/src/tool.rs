//! Tool System
//!
//! A [`Tool`] is a named, schema-described capability the model may ask the
//! host to run. Tools travel in [`ToolPackage`]s, one per plugin.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Decoded tool-call arguments
pub type ToolArgs = Map<String, Value>;

/// Executable half of a tool
#[async_trait]
pub trait ToolExec: Send + Sync {
    /// Run the tool. `cancel` fires when the turn is abandoned.
    async fn exec(&self, args: ToolArgs, cancel: CancellationToken) -> Result<String, ToolError>;
}

/// Adapter turning a synchronous closure into a [`ToolExec`]
struct FnExec<F>(F);

#[async_trait]
impl<F> ToolExec for FnExec<F>
where
    F: Fn(ToolArgs) -> Result<String, ToolError> + Send + Sync,
{
    async fn exec(&self, args: ToolArgs, _cancel: CancellationToken) -> Result<String, ToolError> {
        (self.0)(args)
    }
}

/// LLM-facing description of a tool (also the wire shape in plugin manifests)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON-Schema for the arguments, passed through verbatim
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// A named, described, executable capability
///
/// Immutable once built; cloning shares the executor.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    exec: Arc<dyn ToolExec>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        exec: impl ToolExec + 'static,
    ) -> Self {
        Self::from_shared(name, description, parameters, Arc::new(exec))
    }

    pub fn from_shared(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        exec: Arc<dyn ToolExec>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            exec,
        }
    }

    /// Build a tool from a synchronous function of its arguments
    pub fn from_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self::new(name, description, parameters, FnExec(f))
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub async fn exec(&self, args: ToolArgs, cancel: CancellationToken) -> Result<String, ToolError> {
        self.exec.exec(args, cancel).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Provenance of a loaded package
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A versioned bundle of tools produced by one plugin
///
/// Only the metadata is serialized; `tools` carries executable code.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolPackage {
    pub name: String,
    pub version: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip)]
    pub tools: Vec<Tool>,
}

impl ToolPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn info(&self) -> PackageInfo {
        PackageInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            link: self.link.clone(),
            description: self.description.clone(),
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(Tool::schema).collect()
    }
}

impl fmt::Display for ToolPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ToolPackage: {} ({})", self.name, self.version)?;
        writeln!(f, "Link: {}", self.link)?;
        writeln!(f, "Tools:")?;
        if self.tools.is_empty() {
            return write!(f, "  (none)");
        }
        for tool in &self.tools {
            writeln!(f, "  - {}: {}", tool.name, tool.description)?;
        }
        Ok(())
    }
}

/// Parameter definition, the convenient way to spell a tool's JSON-Schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Build a JSON-Schema object from a parameter list
pub fn object_schema(params: &[ParameterSchema]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::String(param.param_type.clone()));
        prop.insert("description".into(), Value::String(param.description.clone()));
        if let Some(default) = &param.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(values) = &param.enum_values {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        properties.insert(param.name.clone(), Value::Object(prop));

        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
