//! Plugin Channel
//!
//! Host side of the plugin wire protocol over any byte stream pair: a child
//! process's stdio in production, an in-memory duplex in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::protocol::{PluginManifest, RequestFrame, ResponseFrame};
use crate::error::ToolError;
use crate::tool::{Tool, ToolArgs, ToolExec, ToolPackage};

/// Errors talking to a plugin
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("plugin I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin sent invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plugin closed the connection")]
    Closed,

    /// The plugin answered with an error frame
    #[error("{0}")]
    Remote(String),

    #[error("plugin protocol violation: {0}")]
    Protocol(String),
}

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ChannelIo {
    lines: Lines<BufReader<BoxReader>>,
    writer: BufWriter<BoxWriter>,
    // Spawned with kill_on_drop: the process lives as long as its tools.
    _child: Option<Child>,
}

/// Request/response connection to one plugin
///
/// Requests are serialized: one frame in flight at a time. Responses to
/// requests whose caller gave up (timeout, cancellation) are skipped by id.
pub struct PluginChannel {
    label: String,
    pid: Option<u32>,
    io: Mutex<ChannelIo>,
    next_id: AtomicU64,
}

impl PluginChannel {
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(label.into(), Box::new(reader), Box::new(writer), None)
    }

    /// Channel over a child's piped stdin/stdout, owning the child
    pub fn from_child(label: impl Into<String>, mut child: Child) -> Result<Self, ChannelError> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ChannelError::Protocol("plugin process has no piped stdio".into()));
        };
        Ok(Self::build(label.into(), Box::new(stdout), Box::new(stdin), Some(child)))
    }

    fn build(label: String, reader: BoxReader, writer: BoxWriter, child: Option<Child>) -> Self {
        Self {
            label,
            pid: child.as_ref().and_then(Child::id),
            io: Mutex::new(ChannelIo {
                lines: BufReader::new(reader).lines(),
                writer: BufWriter::new(writer),
                _child: child,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id of the plugin, when it runs as a child process
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send one request and wait for its response
    ///
    /// Ids are assigned under the lock, so they grow in send order and
    /// anything older than the current id is a leftover.
    async fn request(&self, frame: impl FnOnce(u64) -> RequestFrame) -> Result<Value, ChannelError> {
        let mut io = self.io.lock().await;

        let id = self.next_id();
        let mut payload = serde_json::to_vec(&frame(id))?;
        payload.push(b'\n');

        io.writer.write_all(&payload).await?;
        io.writer.flush().await?;

        loop {
            let Some(line) = io.lines.next_line().await? else {
                return Err(ChannelError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }

            let response: ResponseFrame = serde_json::from_str(&line)?;
            if response.id < id {
                tracing::warn!(plugin = %self.label, stale = response.id, expected = id, "Skipping stale plugin response");
                continue;
            }
            if response.id != id {
                return Err(ChannelError::Protocol(format!(
                    "expected response {id}, got {}",
                    response.id
                )));
            }
            return response.into_result().map_err(ChannelError::Remote);
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Ask the plugin what it provides
    pub async fn manifest(&self) -> Result<PluginManifest, ChannelError> {
        let value = self.request(RequestFrame::manifest).await?;
        PluginManifest::from_value(value).map_err(ChannelError::Protocol)
    }

    /// Run one tool inside the plugin
    pub async fn call(&self, tool: &str, arguments: ToolArgs) -> Result<String, ChannelError> {
        let request = |id| RequestFrame::call(id, tool, arguments);
        match self.request(request).await? {
            Value::String(output) => Ok(output),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

/// Executor forwarding calls to a tool living in a plugin
struct RemoteExec {
    channel: Arc<PluginChannel>,
    tool: String,
}

#[async_trait]
impl ToolExec for RemoteExec {
    async fn exec(&self, args: ToolArgs, cancel: CancellationToken) -> Result<String, ToolError> {
        tokio::select! {
            () = cancel.cancelled() => Err(ToolError::Cancelled),
            result = self.channel.call(&self.tool, args) => result.map_err(|e| match e {
                ChannelError::Remote(msg) => ToolError::Exec(msg),
                other => ToolError::Plugin(format!("{}: {other}", self.channel.label())),
            }),
        }
    }
}

/// Perform the manifest handshake and wrap every advertised tool
///
/// `fallback_name` names the package when the plugin speaks the legacy ABI.
pub async fn fetch_package(
    channel: Arc<PluginChannel>,
    fallback_name: &str,
) -> Result<ToolPackage, ChannelError> {
    let manifest = channel.manifest().await?;

    if let Some(tool) = manifest.tools().iter().find(|t| t.name.trim().is_empty()) {
        return Err(ChannelError::Protocol(format!(
            "tool with empty name (description: {:?})",
            tool.description
        )));
    }

    let (mut package, schemas) = match manifest {
        PluginManifest::Package(manifest) => (
            ToolPackage::new(manifest.name, manifest.version, manifest.link)
                .with_description(manifest.description),
            manifest.tools,
        ),
        PluginManifest::Legacy(tools) => (ToolPackage::new(fallback_name, "", ""), tools),
    };

    package.tools = schemas
        .into_iter()
        .map(|schema| {
            let exec = RemoteExec {
                channel: Arc::clone(&channel),
                tool: schema.name.clone(),
            };
            Tool::new(schema.name, schema.description, schema.parameters, exec)
        })
        .collect();

    Ok(package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::protocol::Method;
    use serde_json::json;
    use tokio::io::{DuplexStream, duplex, split};

    /// Minimal fake plugin answering from a closure
    fn fake_plugin<F>(respond: F) -> Arc<PluginChannel>
    where
        F: Fn(RequestFrame) -> Vec<String> + Send + 'static,
    {
        let (host, plugin): (DuplexStream, DuplexStream) = duplex(4096);
        let (plugin_read, mut plugin_write) = split(plugin);

        tokio::spawn(async move {
            let mut lines = BufReader::new(plugin_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: RequestFrame = serde_json::from_str(&line).unwrap();
                for out in respond(frame) {
                    plugin_write.write_all(out.as_bytes()).await.unwrap();
                    plugin_write.write_all(b"\n").await.unwrap();
                }
            }
        });

        let (host_read, host_write) = split(host);
        Arc::new(PluginChannel::new("fake", host_read, host_write))
    }

    fn v1_manifest() -> Value {
        json!({
            "abi_version": 1,
            "package": {
                "name": "Echo", "version": "v1.2.0", "link": "https://example.com/echo",
                "tools": [{"name": "echo", "description": "Echo", "parameters": {"type": "object"}}]
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_package_and_call() {
        let channel = fake_plugin(|frame| {
            let response = match frame.method {
                Method::Manifest => ResponseFrame::ok(frame.id, v1_manifest()),
                Method::Call => {
                    let params = frame.params.unwrap();
                    match params.arguments.get("text") {
                        Some(text) => ResponseFrame::ok(frame.id, text.clone()),
                        None => ResponseFrame::err(frame.id, "missing text"),
                    }
                }
            };
            vec![serde_json::to_string(&response).unwrap()]
        });

        let package = fetch_package(channel, "unused").await.unwrap();
        assert_eq!(package.name, "Echo");
        assert_eq!(package.version, "v1.2.0");
        assert_eq!(package.tools.len(), 1);

        let tool = &package.tools[0];
        let mut args = ToolArgs::new();
        args.insert("text".into(), json!("hello"));
        assert_eq!(tool.exec(args, CancellationToken::new()).await.unwrap(), "hello");

        let err = tool.exec(ToolArgs::new(), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, ToolError::Exec("missing text".into()));
    }

    #[tokio::test]
    async fn test_legacy_manifest_uses_fallback_name() {
        let channel = fake_plugin(|frame| {
            let manifest = json!({"abi_version": 0, "tools": [{"name": "ping"}]});
            vec![serde_json::to_string(&ResponseFrame::ok(frame.id, manifest)).unwrap()]
        });

        let package = fetch_package(channel, "old_plugin").await.unwrap();
        assert_eq!(package.name, "old_plugin");
        assert!(package.version.is_empty());
        assert_eq!(package.tools[0].name, "ping");
    }

    #[tokio::test]
    async fn test_stale_responses_are_skipped() {
        let channel = fake_plugin(|frame| {
            vec![
                serde_json::to_string(&ResponseFrame::ok(frame.id.saturating_sub(1), json!("stale"))).unwrap(),
                String::new(),
                serde_json::to_string(&ResponseFrame::ok(frame.id, json!("fresh"))).unwrap(),
            ]
        });

        channel.next_id();
        assert_eq!(channel.call("any", ToolArgs::new()).await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_non_string_results_are_stringified() {
        let channel = fake_plugin(|frame| {
            vec![serde_json::to_string(&ResponseFrame::ok(frame.id, json!({"sum": 5}))).unwrap()]
        });
        assert_eq!(channel.call("add", ToolArgs::new()).await.unwrap(), r#"{"sum":5}"#);
    }

    #[tokio::test]
    async fn test_garbage_and_closed_streams() {
        let channel = fake_plugin(|_| vec!["this is not json".to_string()]);
        assert!(matches!(channel.manifest().await, Err(ChannelError::Json(_))));

        let (host, plugin) = duplex(64);
        drop(plugin);
        let (read, write) = split(host);
        let channel = PluginChannel::new("gone", read, write);
        assert!(channel.manifest().await.is_err());
        assert!(channel.pid().is_none());
    }

    #[tokio::test]
    async fn test_empty_tool_name_is_rejected() {
        let channel = fake_plugin(|frame| {
            let manifest = json!({"abi_version": 0, "tools": [{"name": " "}]});
            vec![serde_json::to_string(&ResponseFrame::ok(frame.id, manifest)).unwrap()]
        });
        assert!(matches!(
            fetch_package(channel, "x").await,
            Err(ChannelError::Protocol(_))
        ));
    }
}
