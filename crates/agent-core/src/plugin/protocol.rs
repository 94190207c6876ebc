//! Plugin Wire Protocol
//!
//! Newline-delimited JSON frames exchanged with an out-of-process plugin over
//! its stdin/stdout.
//!
//! ```text
//! host → plugin   {"id":1,"method":"manifest"}
//! plugin → host   {"id":1,"result":{"abi_version":1,"package":{...}}}
//! host → plugin   {"id":2,"method":"call","params":{"tool":"add","arguments":{"a":2,"b":3}}}
//! plugin → host   {"id":2,"result":"5"}          or {"id":2,"error":"division by zero"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::{ToolArgs, ToolPackage, ToolSchema};

/// Current manifest version
pub const ABI_VERSION: u32 = 1;

/// Manifest version of plugins that only export a bare tool list
pub const LEGACY_ABI_VERSION: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Manifest,
    Call,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub tool: String,
    #[serde(default)]
    pub arguments: ToolArgs,
}

/// Host-to-plugin request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<CallParams>,
}

impl RequestFrame {
    pub const fn manifest(id: u64) -> Self {
        Self {
            id,
            method: Method::Manifest,
            params: None,
        }
    }

    pub fn call(id: u64, tool: impl Into<String>, arguments: ToolArgs) -> Self {
        Self {
            id,
            method: Method::Call,
            params: Some(CallParams {
                tool: tool.into(),
                arguments,
            }),
        }
    }
}

/// Plugin-to-host response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    pub const fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// An `error` wins over a `result`; a frame with neither is `null`
    pub fn into_result(self) -> Result<Value, String> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Package metadata plus tool schemas, as a plugin advertises them
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

impl From<&ToolPackage> for ManifestPackage {
    fn from(package: &ToolPackage) -> Self {
        Self {
            name: package.name.clone(),
            version: package.version.clone(),
            link: package.link.clone(),
            description: package.description.clone(),
            tools: package.schemas(),
        }
    }
}

/// Versioned manifest: one explicit version check replaces export probing
#[derive(Clone, Debug, PartialEq)]
pub enum PluginManifest {
    /// `abi_version` 1: full package with metadata
    Package(ManifestPackage),
    /// `abi_version` 0: bare tool list, no package metadata
    Legacy(Vec<ToolSchema>),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    abi_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package: Option<ManifestPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSchema>>,
}

impl PluginManifest {
    pub const fn abi_version(&self) -> u32 {
        match self {
            Self::Package(_) => ABI_VERSION,
            Self::Legacy(_) => LEGACY_ABI_VERSION,
        }
    }

    pub fn tools(&self) -> &[ToolSchema] {
        match self {
            Self::Package(package) => &package.tools,
            Self::Legacy(tools) => tools,
        }
    }

    pub fn to_value(&self) -> Value {
        let envelope = match self {
            Self::Package(package) => Envelope {
                abi_version: ABI_VERSION,
                package: Some(package.clone()),
                tools: None,
            },
            Self::Legacy(tools) => Envelope {
                abi_version: LEGACY_ABI_VERSION,
                package: None,
                tools: Some(tools.clone()),
            },
        };
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        let envelope: Envelope =
            serde_json::from_value(value).map_err(|e| format!("invalid manifest: {e}"))?;

        match envelope.abi_version {
            ABI_VERSION => envelope
                .package
                .map(Self::Package)
                .ok_or_else(|| "manifest v1 has no package".to_string()),
            LEGACY_ABI_VERSION => envelope
                .tools
                .map(Self::Legacy)
                .ok_or_else(|| "legacy manifest has no tools".to_string()),
            other => Err(format!(
                "unsupported plugin ABI version {other} (host speaks {LEGACY_ABI_VERSION}..={ABI_VERSION})"
            )),
        }
    }
}
