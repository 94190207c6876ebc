//! Plugin Side of the Wire Protocol
//!
//! Answers `manifest` and `call` requests for one [`ToolPackage`] until the
//! host closes the stream.

use std::collections::HashMap;

use agent_core::plugin::protocol::{ManifestPackage, Method, PluginManifest, RequestFrame, ResponseFrame};
use agent_core::tool::{Tool, ToolPackage};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Errors that end the serving loop
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serve `package` over a line-oriented byte stream pair
pub async fn serve<R, W>(package: &ToolPackage, reader: R, writer: W) -> Result<(), ServeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let manifest = PluginManifest::Package(ManifestPackage::from(package)).to_value();
    let tools: HashMap<&str, &Tool> = package.tools.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = handle_line(&line, &manifest, &tools).await else {
            continue;
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
        writer.flush().await?;
    }

    tracing::debug!(package = %package.name, "Host closed the connection");
    Ok(())
}

async fn handle_line(line: &str, manifest: &Value, tools: &HashMap<&str, &Tool>) -> Option<ResponseFrame> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unparseable request");
            return None;
        }
    };
    let Some(id) = raw.get("id").and_then(Value::as_u64) else {
        tracing::warn!("Ignoring request without an id");
        return None;
    };

    let request: RequestFrame = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => return Some(ResponseFrame::err(id, format!("invalid request: {e}"))),
    };

    let response = match request.method {
        Method::Manifest => ResponseFrame::ok(id, manifest.clone()),
        Method::Call => {
            let Some(params) = request.params else {
                return Some(ResponseFrame::err(id, "call without params"));
            };
            let Some(tool) = tools.get(params.tool.as_str()) else {
                return Some(ResponseFrame::err(id, format!("unknown tool: {}", params.tool)));
            };

            tracing::debug!(tool = %params.tool, id, "Executing tool");
            match tool.exec(params.arguments, CancellationToken::new()).await {
                Ok(output) => ResponseFrame::ok(id, Value::String(output)),
                Err(e) => {
                    tracing::warn!(tool = %params.tool, id, error = %e, "Tool failed");
                    ResponseFrame::err(id, e.to_string())
                }
            }
        }
    };
    Some(response)
}

/// Serve `package` on stdin/stdout
pub async fn serve_stdio(package: &ToolPackage) -> Result<(), ServeError> {
    serve(package, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Entry point for plugin executables
///
/// Logs go to stderr, since stdout carries the protocol.
pub async fn run_plugin(package: ToolPackage) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();

    tracing::info!(
        package = %package.name,
        version = %package.version,
        tools = package.tools.len(),
        "Plugin serving on stdio"
    );
    serve_stdio(&package).await?;
    Ok(())
}
