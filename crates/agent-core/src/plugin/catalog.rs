//! In-process plugin catalog
//!
//! Packages linked into the host binary, addressed as `builtin:<name>`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::tool::ToolPackage;

type PackageFactory = Arc<dyn Fn() -> ToolPackage + Send + Sync>;

/// Named package constructors
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PackageFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package constructor (builder form)
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ToolPackage + Send + Sync + 'static,
    {
        self.insert(name, factory);
        self
    }

    /// Add or replace a package constructor
    pub fn insert<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> ToolPackage + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Build a fresh package instance
    pub fn get(&self, name: &str) -> Option<ToolPackage> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("names", &self.names())
            .finish()
    }
}
