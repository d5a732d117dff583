//! The build graph as seen by the plugin driver.
//!
//! The driver never walks the module graph itself. It only forwards a handful
//! of graph capabilities to plugin contexts unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::assets::AssetStore;
use crate::error::{ErrorCode, Log, PluginError, Result};

/// Capabilities the driver borrows from the bundler's module graph.
pub trait BuildGraph: Send + Sync {
    /// Whether `id` should be left out of the bundle.
    fn is_external(&self, id: &str, parent_id: Option<&str>, is_resolved: bool) -> bool;

    /// Parse `code` into an ESTree-shaped JSON program.
    fn parse(&self, code: &str, options: Option<&Value>) -> Result<Value>;

    /// Warning sink. Plugin warnings arrive here already tagged.
    fn warn(&self, warning: Log);

    /// Store behind `emit_asset` / `get_asset_file_name` / `set_asset_source`.
    fn assets(&self) -> &AssetStore;

    /// Record an additional file to watch.
    fn watch_file(&self, id: &str);

    /// True once the build phase is over and watch files are frozen.
    fn is_finished(&self) -> bool {
        false
    }

    /// Ids of every module currently in the graph.
    fn module_ids(&self) -> Vec<String> {
        Vec::new()
    }
}

type Parser = Box<dyn Fn(&str, Option<&Value>) -> Result<Value> + Send + Sync>;

/// A self-contained in-memory [`BuildGraph`].
///
/// Useful for embedders that drive plugins outside a full bundle, and for
/// tests: it records every warning and watch file it receives.
#[derive(Default)]
pub struct MemoryGraph {
    externals: FxHashSet<String>,
    modules: RwLock<Vec<String>>,
    warnings: Mutex<Vec<Log>>,
    watch_files: Mutex<Vec<String>>,
    finished: AtomicBool,
    assets: AssetStore,
    parser: Option<Parser>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat these ids as external.
    pub fn with_externals(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.externals.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Install the function backing `parse`.
    pub fn with_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.parser = Some(Box::new(parser));
        self
    }

    pub fn add_module(&self, id: impl Into<String>) {
        self.modules.write().push(id.into());
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn warnings(&self) -> Vec<Log> {
        self.warnings.lock().clone()
    }

    pub fn watch_files(&self) -> Vec<String> {
        self.watch_files.lock().clone()
    }
}

impl BuildGraph for MemoryGraph {
    fn is_external(&self, id: &str, _parent_id: Option<&str>, _is_resolved: bool) -> bool {
        self.externals.contains(id)
    }

    fn parse(&self, code: &str, options: Option<&Value>) -> Result<Value> {
        match &self.parser {
            Some(parser) => parser(code, options),
            None => Err(PluginError::coded(
                ErrorCode::ParseError,
                "No parser is configured for this build graph.",
            )),
        }
    }

    fn warn(&self, warning: Log) {
        self.warnings.lock().push(warning);
    }

    fn assets(&self) -> &AssetStore {
        &self.assets
    }

    fn watch_file(&self, id: &str) {
        let mut files = self.watch_files.lock();
        if !files.iter().any(|f| f == id) {
            files.push(id.to_string());
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn module_ids(&self) -> Vec<String> {
        self.modules.read().clone()
    }
}
