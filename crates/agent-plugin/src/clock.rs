//! Clock package: current date and time.

use agent_core::tool::{ParameterSchema, Tool, ToolPackage, object_schema};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

pub const NAME: &str = "Clock";

pub fn package() -> ToolPackage {
    ToolPackage::new(NAME, concat!("v", env!("CARGO_PKG_VERSION")), env!("CARGO_PKG_REPOSITORY"))
        .with_description("Wall-clock time in UTC")
        .with_tool(datetime())
}

fn datetime() -> Tool {
    let parameters = object_schema(&[ParameterSchema::optional(
        "format",
        "string",
        "Output format: 'iso', 'human', or 'unix'",
    )
    .with_default(json!("human"))
    .with_enum(vec![json!("iso"), json!("human"), json!("unix")])]);

    Tool::from_fn("datetime", "Get the current date and time", parameters, |args| {
        let format = args.get("format").and_then(Value::as_str).unwrap_or("human");
        Ok(render(Utc::now(), format))
    })
}

fn render(now: DateTime<Utc>, format: &str) -> String {
    match format {
        "iso" => now.to_rfc3339(),
        "unix" => now.timestamp().to_string(),
        _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
    }
}
