//! Per-plugin execution contexts.
//!
//! Every plugin gets exactly one [`PluginContext`], built when the driver is
//! constructed and handed to each of its hook calls. The context is the only
//! way a plugin reaches the rest of the build: its own cache namespace, the
//! warning sink, module resolution, parsing and asset emission.
//!
//! Contexts are cheap handles. Cloning shares the same context; use
//! [`PluginContext::derive`] to get a new one.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheRoot, PluginCache};
use crate::driver::DriverInner;
use crate::error::{ANONYMOUS_PLUGIN, ErrorCode, Log, PluginError, Result};
use crate::graph::BuildGraph;
use crate::plugins::hook_names;
use crate::plugins::registry::{Cacheability, PluginRegistry};

/// Static information about the running driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextMeta {
    pub version: &'static str,
}

/// The receiver of every hook call for one plugin.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

#[derive(Clone)]
struct ContextInner {
    /// Name stamped on warnings and errors
    plugin: String,
    cache: PluginCache,
    graph: Arc<dyn BuildGraph>,
    driver: Weak<DriverInner>,
    /// Module this context is scoped to, if any
    module_id: Option<String>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: Option<&str>,
        cache: PluginCache,
        graph: Arc<dyn BuildGraph>,
        driver: Weak<DriverInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                plugin: plugin.unwrap_or(ANONYMOUS_PLUGIN).to_string(),
                cache,
                graph,
                driver,
                module_id: None,
            }),
        }
    }

    /// A new context with the same capabilities as this one.
    pub fn derive(&self) -> PluginContext {
        Self {
            inner: Arc::new(ContextInner::clone(&self.inner)),
        }
    }

    /// Scope warnings and errors raised through this context to a module.
    ///
    /// Contexts shared with other handles are copied first, so the original
    /// is never modified.
    pub fn with_module_id(mut self, id: impl Into<String>) -> PluginContext {
        Arc::make_mut(&mut self.inner).module_id = Some(id.into());
        self
    }

    pub fn module_id(&self) -> Option<&str> {
        self.inner.module_id.as_deref()
    }

    /// Owning plugin's name, or the anonymous placeholder.
    pub fn plugin_name(&self) -> &str {
        &self.inner.plugin
    }

    pub fn cache(&self) -> &PluginCache {
        &self.inner.cache
    }

    pub fn meta(&self) -> ContextMeta {
        ContextMeta {
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Report a warning and carry on.
    pub fn warn(&self, warning: impl Into<Log>) {
        let warning = self.tag(warning.into(), ErrorCode::PluginWarning);
        warn!(plugin = %self.inner.plugin, id = ?warning.id, "{}", warning.message);
        self.inner.graph.warn(warning);
    }

    /// Build the fatal error for this plugin. Return it from the hook.
    ///
    /// ```ignore
    /// return Err(ctx.error("unsupported syntax").into());
    /// ```
    pub fn error(&self, error: impl Into<Log>) -> PluginError {
        PluginError::new(self.tag(error.into(), ErrorCode::PluginError))
    }

    fn tag(&self, log: Log, sentinel: ErrorCode) -> Log {
        let mut log = log.into_plugin_log(sentinel, &self.inner.plugin);
        if log.id.is_none() {
            log.id = self.inner.module_id.clone();
        }
        log
    }

    /// Resolve `id` through the `resolveId` hooks of every plugin.
    pub async fn resolve_id(&self, id: &str, importer: Option<&str>) -> Result<Option<Value>> {
        let driver = self.inner.driver.upgrade().ok_or_else(|| {
            PluginError::new(Log::new(format!(
                "Cannot resolve {id}: the plugin driver is no longer running."
            )))
        })?;
        let args = vec![
            Value::String(id.to_string()),
            importer.map_or(Value::Null, |importer| Value::String(importer.to_string())),
        ];
        driver.hook_first(hook_names::RESOLVE_ID, args, None).await
    }

    pub fn is_external(&self, id: &str, parent_id: Option<&str>, is_resolved: bool) -> bool {
        self.inner.graph.is_external(id, parent_id, is_resolved)
    }

    pub fn parse(&self, code: &str, options: Option<&Value>) -> Result<Value> {
        self.inner.graph.parse(code, options)
    }

    pub fn emit_asset(&self, name: &str, source: Option<Vec<u8>>) -> Result<String> {
        self.inner.graph.assets().emit_asset(name, source)
    }

    pub fn get_asset_file_name(&self, id: &str) -> Result<String> {
        self.inner.graph.assets().get_asset_file_name(id)
    }

    pub fn set_asset_source(&self, id: &str, source: Vec<u8>) -> Result<()> {
        self.inner.graph.assets().set_asset_source(id, source)
    }

    /// Ask the bundler to watch an extra file. Only valid during the build.
    pub fn add_watch_file(&self, id: &str) -> Result<()> {
        if self.inner.graph.is_finished() {
            return Err(PluginError::coded(
                ErrorCode::WatchFileAfterBuild,
                "add_watch_file can only be called during the build.",
            ));
        }
        self.inner.graph.watch_file(id);
        Ok(())
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.inner.graph.module_ids()
    }

    /// Whether `other` is this very context, not just a clone of its contents.
    pub(crate) fn is_same(&self, other: &PluginContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.inner.plugin)
            .field("cache", &self.inner.cache)
            .field("module_id", &self.inner.module_id)
            .finish_non_exhaustive()
    }
}

/// Build one context per plugin, in registry order.
///
/// Without a cache root every plugin gets the no-op cache. Otherwise cacheable
/// plugins get their namespace and the rest a disabled capability that fails
/// on first access.
pub(crate) fn create_contexts(
    registry: &PluginRegistry,
    graph: &Arc<dyn BuildGraph>,
    cache_root: Option<&CacheRoot>,
    driver: &Weak<DriverInner>,
) -> Vec<PluginContext> {
    registry
        .iter()
        .zip(registry.cacheability())
        .enumerate()
        .map(|(index, (plugin, cacheability))| {
            let cache = match (cache_root, cacheability) {
                (None, _) => PluginCache::Noop,
                (Some(root), Cacheability::Cacheable(key)) => {
                    PluginCache::Enabled(root.namespace(&key))
                }
                (Some(_), Cacheability::Uncacheable(reason)) => {
                    debug!(plugin = %plugin.label(index), ?reason, "plugin cache disabled");
                    PluginCache::Disabled {
                        reason,
                        plugin: plugin.label(index),
                    }
                }
            };
            PluginContext::new(plugin.name(), cache, Arc::clone(graph), driver.clone())
        })
        .collect()
}
