//! Plugin Loader
//!
//! Turns a list of plugin specs into registered tools. Two kinds of plugin
//! are understood:
//!
//! - `builtin:<name>`: a package compiled into the host, looked up in a
//!   [`PluginCatalog`]
//! - anything else: a plugin executable, started as a child process and
//!   driven over the JSON-lines protocol in [`protocol`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  resolve   ┌──────────────┐  spawn + manifest  ┌──────────────┐
//! │ plugin specs │──────────▶ │ PluginSource │──────────────────▶ │ ToolPackage  │
//! └──────────────┘            └──────────────┘                    └──────┬───────┘
//!                                                                        │ register_package
//!                                                                        ▼
//!                                                                 ┌──────────────┐
//!                                                                 │ ToolRegistry │
//!                                                                 └──────────────┘
//! ```
//!
//! Loading is all-or-nothing: every spec is loaded before anything is
//! registered, and the first failure aborts the whole batch.

pub mod catalog;
pub mod channel;
pub mod protocol;

pub use catalog::PluginCatalog;
pub use channel::{ChannelError, PluginChannel, fetch_package};
pub use protocol::{ABI_VERSION, LEGACY_ABI_VERSION, PluginManifest};

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{AgentError, Result};
use crate::registry::ToolRegistry;
use crate::tool::{PackageInfo, ToolPackage};

/// Spec prefix selecting a package from the catalog
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Directory searched for bare plugin names
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// How long a plugin process gets to answer the manifest request
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a plugin spec points
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginSource {
    /// Entry in the in-process catalog
    Builtin(String),
    /// Canonical path of a plugin executable
    Executable(PathBuf),
}

/// Resolves, starts and handshakes plugins
#[derive(Clone, Debug)]
pub struct PluginLoader {
    plugin_dir: PathBuf,
    catalog: PluginCatalog,
    handshake_timeout: Duration,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            catalog: PluginCatalog::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Work out what a spec refers to without starting anything
    pub fn resolve(&self, spec: &str) -> Result<PluginSource> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(AgentError::plugin_load(spec, "empty plugin spec"));
        }

        if let Some(name) = spec.strip_prefix(BUILTIN_PREFIX) {
            if self.catalog.contains(name) {
                return Ok(PluginSource::Builtin(name.to_string()));
            }
            return Err(AgentError::plugin_load(
                spec,
                format!(
                    "no built-in plugin named '{name}' (available: {})",
                    self.catalog.names().join(", ")
                ),
            ));
        }

        let path = Path::new(spec);
        let candidate = if path.is_absolute() || path.components().count() > 1 {
            path.to_path_buf()
        } else {
            find_in_dir(&self.plugin_dir, spec).ok_or_else(|| {
                AgentError::plugin_load(
                    spec,
                    format!("not found under {}", self.plugin_dir.display()),
                )
            })?
        };

        let canonical = fs::canonicalize(&candidate)
            .map_err(|e| AgentError::plugin_load(spec, format!("{}: {e}", candidate.display())))?;
        if !canonical.is_file() {
            return Err(AgentError::plugin_load(spec, "not a file"));
        }

        Ok(PluginSource::Executable(canonical))
    }

    /// Resolve and load a single plugin
    pub async fn load(&self, spec: &str) -> Result<ToolPackage> {
        match self.resolve(spec)? {
            PluginSource::Builtin(name) => self
                .catalog
                .get(&name)
                .ok_or_else(|| AgentError::plugin_load(spec, "vanished from catalog")),
            PluginSource::Executable(path) => self.spawn(spec, &path).await,
        }
    }

    /// Load every spec, or none of them
    pub async fn load_all<S: AsRef<str>>(&self, specs: &[S]) -> Result<Vec<ToolPackage>> {
        let mut packages = Vec::with_capacity(specs.len());
        for spec in specs {
            // Earlier packages are dropped on failure, which stops their processes.
            let package = self.load(spec.as_ref()).await?;
            tracing::info!(
                plugin = %spec.as_ref(),
                package = %package.name,
                version = %package.version,
                tools = package.tools.len(),
                "Plugin loaded"
            );
            packages.push(package);
        }
        Ok(packages)
    }

    /// Load every spec and register the packages; the registry is untouched
    /// on failure. Returns the number of tools registered.
    pub async fn load_into<S: AsRef<str>>(
        &self,
        specs: &[S],
        registry: &mut ToolRegistry,
    ) -> Result<usize> {
        let packages = self.load_all(specs).await?;
        let mut count = 0;
        for package in packages {
            count += package.tools.len();
            registry.register_package(package);
        }
        Ok(count)
    }

    /// Handshake every file under `plugin_dir` and list the packages found
    ///
    /// Unlike [`Self::load_all`] this is lenient: files that fail to start or
    /// answer the manifest request are logged and skipped. Only an unreadable
    /// `plugin_dir` is an error. The probed processes are stopped before
    /// returning.
    pub async fn discover(&self) -> Result<Vec<PackageInfo>> {
        let mut files = Vec::new();
        collect_files(&self.plugin_dir, &mut files).map_err(|e| {
            AgentError::plugin_load(
                self.plugin_dir.display().to_string(),
                format!("cannot read plugin directory: {e}"),
            )
        })?;

        let mut found = Vec::with_capacity(files.len());
        for path in files {
            let spec = path.display().to_string();
            match self.spawn(&spec, &path).await {
                Ok(package) => {
                    tracing::info!(
                        plugin = %spec,
                        package = %package.name,
                        version = %package.version,
                        tools = package.tools.len(),
                        "Plugin discovered"
                    );
                    found.push(package.info());
                }
                Err(e) => tracing::warn!(plugin = %spec, error = %e, "Skipping plugin"),
            }
        }
        Ok(found)
    }

    async fn spawn(&self, spec: &str, path: &Path) -> Result<ToolPackage> {
        let child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::plugin_load(spec, format!("failed to start: {e}")))?;

        let channel = PluginChannel::from_child(path.display().to_string(), child)
            .map_err(|e| AgentError::plugin_load(spec, e))?;
        tracing::debug!(plugin = %spec, pid = ?channel.pid(), "Plugin process started");
        let channel = Arc::new(channel);

        let fallback_name = path
            .file_stem()
            .map_or_else(|| spec.to_string(), |stem| stem.to_string_lossy().into_owned());

        match tokio::time::timeout(self.handshake_timeout, fetch_package(channel, &fallback_name)).await {
            Ok(Ok(package)) => Ok(package),
            Ok(Err(e)) => Err(AgentError::plugin_load(spec, e)),
            Err(_) => Err(AgentError::plugin_load(
                spec,
                format!("no manifest within {}s", self.handshake_timeout.as_secs_f64()),
            )),
        }
    }
}

/// Depth-first search for a file called `name` (or with that stem)
fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        if path.is_file() && matches_name(path, name) {
            return Some(path.clone());
        }
    }

    entries
        .iter()
        .filter(|path| path.is_dir())
        .find_map(|path| find_in_dir(path, name))
}

/// Every regular file below `dir`, sorted, depth-first
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            if let Err(e) = collect_files(&path, files) {
                tracing::warn!(dir = %path.display(), error = %e, "Skipping unreadable directory");
            }
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn matches_name(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|n| n == name) || path.file_stem().is_some_and(|s| s == name)
}
