//! # agent-plugin
//!
//! Plugin side of the agent tool protocol, plus the packages that ship with
//! it.
//!
//! A plugin executable is a [`ToolPackage`] served over stdin/stdout:
//!
//! ```rust,ignore
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     agent_plugin::run_plugin(my_package()).await
//! }
//! ```
//!
//! The same packages can be linked into the host instead and reached through
//! `builtin:<name>` specs, see [`catalog`].

pub mod calculator;
pub mod clock;
pub mod serve;

pub use serve::{ServeError, run_plugin, serve, serve_stdio};

use agent_core::plugin::PluginCatalog;
use agent_core::tool::ToolPackage;

/// Every bundled package, keyed by its `builtin:` name
pub fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with("calculator", calculator::package)
        .with("clock", clock::package)
}

/// Bundled package by name
pub fn package(name: &str) -> Option<ToolPackage> {
    catalog().get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        let catalog = catalog();
        assert_eq!(catalog.names(), vec!["calculator", "clock"]);
        assert_eq!(package("clock").unwrap().name, clock::NAME);
        assert!(package("weather").is_none());
    }
}
