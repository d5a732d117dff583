//! Plugin records and their hook tables.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::context::PluginContext;

/// Well-known hook names.
pub mod hook_names {
    pub const RESOLVE_ID: &str = "resolveId";
    pub const LOAD: &str = "load";
    pub const TRANSFORM: &str = "transform";
    pub const TRANSFORM_CHUNK: &str = "transformChunk";

    /// Hooks that make a plugin take part in source transformation.
    pub const SOURCE_HOOKS: [&str; 3] = [LOAD, TRANSFORM, TRANSFORM_CHUNK];
}

/// What a hook handler resolves to: `Ok(None)` means "returned nothing".
pub type HookResult = anyhow::Result<Option<Value>>;

pub type HookFuture = BoxFuture<'static, HookResult>;

/// A callable hook. Receives the plugin's context and positional arguments.
pub type HookHandler = Arc<dyn Fn(PluginContext, Vec<Value>) -> HookFuture + Send + Sync>;

/// A declared hook: either a function or a static value.
#[derive(Clone)]
pub enum Hook {
    Handler(HookHandler),
    Value(Value),
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Handler(_) => f.write_str("Hook::Handler(..)"),
            Hook::Value(value) => f.debug_tuple("Hook::Value").field(value).finish(),
        }
    }
}

/// A plugin: an optional name, an optional cache key, and a table of hooks.
///
/// # Example
///
/// ```
/// use fob_plugin_driver::Plugin;
/// use serde_json::json;
///
/// let plugin = Plugin::new("banner")
///     .value("intro", json!("/* built with fob */"))
///     .hook("transform", |_ctx, args| async move {
///         let code = args[0].as_str().unwrap_or_default();
///         Ok(Some(json!(code.trim())))
///     });
///
/// assert!(plugin.has_hook("transform"));
/// ```
#[derive(Clone, Default)]
pub struct Plugin {
    name: Option<String>,
    cache_key: Option<String>,
    hooks: FxHashMap<String, Hook>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A plugin without a name. It can never use the cache.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Distinguish this plugin's cache namespace from others of the same name.
    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }

    /// Declare an async hook.
    pub fn hook<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(PluginContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let handler: HookHandler = Arc::new(move |ctx, args| handler(ctx, args).boxed());
        self.hooks.insert(name.into(), Hook::Handler(handler));
        self
    }

    /// Declare a synchronous hook. It is still dispatched asynchronously.
    pub fn sync_hook<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(PluginContext, Vec<Value>) -> HookResult + Send + Sync + 'static,
    {
        let handler: HookHandler =
            Arc::new(move |ctx, args| future::ready(handler(ctx, args)).boxed());
        self.hooks.insert(name.into(), Hook::Handler(handler));
        self
    }

    /// Declare a hook as a static value.
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.hooks.insert(name.into(), Hook::Value(value));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn get_hook(&self, name: &str) -> Option<&Hook> {
        self.hooks.get(name)
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    /// Name used to attribute hook failures: the plugin name, or its
    /// 1-based position when unnamed.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Plugin at position {}", index + 1),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks: Vec<_> = self.hook_names().collect();
        hooks.sort_unstable();
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("cache_key", &self.cache_key)
            .field("hooks", &hooks)
            .finish()
    }
}
