//! The plugin driver.
//!
//! [`PluginDriver`] owns the ordered plugin list and one context per plugin,
//! and runs hooks across them with one of five dispatch strategies:
//!
//! | Method | Order | Stops early | Result |
//! |---|---|---|---|
//! | [`hook_seq`](PluginDriver::hook_seq) | sequential | no | `()` |
//! | [`hook_first`](PluginDriver::hook_first) | sequential | first non-null result | that result |
//! | [`hook_parallel`](PluginDriver::hook_parallel) | all at once | first failure | `()` |
//! | [`hook_reduce_arg0`](PluginDriver::hook_reduce_arg0) | sequential | no | reduced first argument |
//! | [`hook_reduce_value`](PluginDriver::hook_reduce_value) | sequential | no | reduced accumulator |
//!
//! Sequential strategies never issue plugin `i`'s call before plugin `i - 1`'s
//! has settled. Any hook failure is fatal to the dispatch in progress.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::CacheRoot;
use crate::config::DriverConfig;
use crate::context::{PluginContext, create_contexts};
use crate::error::{ErrorCode, Log, PluginError, Result};
use crate::graph::BuildGraph;
use crate::plugins::registry::PluginRegistry;
use crate::plugins::{Hook, Plugin};

/// Builds a derived context for a single hook call.
///
/// Must return a new context (e.g. from [`PluginContext::derive`]), never the
/// one it was given.
pub type ContextTransform = dyn Fn(&PluginContext, &Plugin) -> PluginContext + Send + Sync;

/// Outcome of running one plugin's hook.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HookOutcome {
    /// The plugin does not declare the hook.
    Absent,
    /// The hook ran; `None` means it returned nothing.
    Returned(Option<Value>),
}

/// The entry point bundlers use to run plugin hooks.
///
/// Cloning is cheap; clones drive the same plugins and contexts.
#[derive(Clone)]
pub struct PluginDriver {
    inner: Arc<DriverInner>,
}

pub(crate) struct DriverInner {
    registry: PluginRegistry,
    contexts: Vec<PluginContext>,
    graph: Arc<dyn BuildGraph>,
    has_loaders_or_transforms: bool,
    cache_root: Option<CacheRoot>,
    cache_expiry: u32,
    asset_file_names: String,
}

/// A hook call that has been resolved and is ready to run.
struct Invocation {
    hook_name: String,
    hook: Hook,
    context: PluginContext,
    args: Vec<Value>,
    plugin: String,
    permit_values: bool,
}

impl Invocation {
    async fn run(self) -> Result<Option<Value>> {
        // Never run a hook on the caller's synchronous path.
        tokio::task::yield_now().await;

        let Invocation {
            hook_name,
            hook,
            context,
            args,
            plugin,
            permit_values,
        } = self;
        trace!(%plugin, hook = %hook_name, "running hook");

        let result = match hook {
            Hook::Value(value) if permit_values => Ok(Some(value)),
            Hook::Value(_) => Err(PluginError::coded(
                ErrorCode::InvalidPluginHook,
                format!(
                    "Error running plugin hook {hook_name} for {plugin}, expected a function hook."
                ),
            )
            .into()),
            Hook::Handler(handler) => handler(context, args).await,
        };

        result.map_err(|error| {
            let error = PluginError::from_hook_failure(error, &plugin, &hook_name);
            debug!(%plugin, hook = %hook_name, code = ?error.plugin_code(), "hook failed: {}", error.message());
            error
        })
    }
}

impl PluginDriver {
    /// Create a driver for `plugins`, followed by the default plugin.
    ///
    /// Contexts and cache namespaces are set up here, once. Caching is off when
    /// `cache_root` is `None` or `config.cache` is false.
    pub fn new(
        plugins: Vec<Plugin>,
        graph: Arc<dyn BuildGraph>,
        cache_root: Option<CacheRoot>,
        config: &DriverConfig,
    ) -> Self {
        let registry = PluginRegistry::new(plugins);
        let cache_root = cache_root.filter(|_| config.cache);

        let inner = Arc::new_cyclic(|driver| {
            let contexts = create_contexts(&registry, &graph, cache_root.as_ref(), driver);
            DriverInner {
                has_loaders_or_transforms: registry.has_loaders_or_transforms(),
                registry,
                contexts,
                graph,
                cache_root: cache_root.clone(),
                cache_expiry: config.cache_expiry,
                asset_file_names: config.asset_file_names.clone(),
            }
        });

        debug!(
            plugins = inner.registry.len(),
            has_loaders_or_transforms = inner.has_loaders_or_transforms,
            cache = inner.cache_root.is_some(),
            "plugin driver ready"
        );
        Self { inner }
    }

    /// Whether any user plugin takes part in loading or transforming sources.
    pub fn has_loaders_or_transforms(&self) -> bool {
        self.inner.has_loaders_or_transforms
    }

    /// Plugins in dispatch order, default plugin last.
    pub fn plugins(&self) -> impl Iterator<Item = &Plugin> {
        self.inner.registry.iter().map(|plugin| plugin.as_ref())
    }

    pub fn context(&self, index: usize) -> Option<&PluginContext> {
        self.inner.contexts.get(index)
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

    /// Age the cache by one build, evicting entries unused for longer than
    /// `cache_expiry` builds. Returns the number of evicted entries; always 0
    /// when caching is off.
    ///
    /// Call once per build, after the last hook has run.
    pub fn age_cache(&self) -> usize {
        let Some(root) = &self.inner.cache_root else {
            return 0;
        };
        let evicted = root.age(self.inner.cache_expiry);
        debug!(evicted, expiry = self.inner.cache_expiry, "plugin cache aged");
        evicted
    }

    /// Assign file names to emitted assets using the configured pattern.
    pub fn finalise_assets(&self) -> Result<()> {
        self.inner
            .graph
            .assets()
            .finalise(&self.inner.asset_file_names)
    }

    /// Run `hook` on every plugin in order, each after the previous settled.
    pub async fn hook_seq(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<()> {
        self.inner.hook_seq(hook, args, transform).await
    }

    /// Run `hook` in order until a plugin returns something other than null.
    pub async fn hook_first(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<Option<Value>> {
        self.inner.hook_first(hook, args, transform).await
    }

    /// Issue `hook` on every plugin at once and wait for all of them.
    ///
    /// The first failure observed fails the whole call. Hooks still in flight
    /// are not cancelled; they finish in the background and their outcomes
    /// are dropped.
    pub async fn hook_parallel(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<()> {
        self.inner.hook_parallel(hook, args, transform).await
    }

    /// Thread the first argument through every plugin's hook.
    ///
    /// Each plugin is called with `(current, rest...)`. When it returns a
    /// value, `reduce(current, result, plugin)` becomes the new current value.
    /// Plugins without the hook, or whose hook returned nothing, leave it
    /// unchanged.
    pub async fn hook_reduce_arg0<R>(
        &self,
        hook: &str,
        args: Vec<Value>,
        reduce: R,
        transform: Option<&ContextTransform>,
    ) -> Result<Value>
    where
        R: FnMut(Value, Value, &Plugin) -> Result<Value>,
    {
        self.inner
            .hook_reduce_arg0(hook, args, reduce, transform)
            .await
    }

    /// Fold every plugin's hook result into an accumulator.
    ///
    /// Hooks always receive the same `args`. Hooks may be declared as static
    /// values, which are fed to `reduce` directly.
    pub async fn hook_reduce_value<R>(
        &self,
        hook: &str,
        initial: Value,
        args: Vec<Value>,
        reduce: R,
        transform: Option<&ContextTransform>,
    ) -> Result<Value>
    where
        R: FnMut(Value, Value, &Plugin) -> Result<Value>,
    {
        self.inner
            .hook_reduce_value(hook, initial, args, reduce, transform)
            .await
    }
}

impl DriverInner {
    /// Resolve the hook and context for one plugin without running anything.
    ///
    /// Returns `None` when the plugin does not declare the hook. The context
    /// transform, if any, is applied here.
    fn prepare(
        &self,
        hook_name: &str,
        args: Vec<Value>,
        index: usize,
        permit_values: bool,
        transform: Option<&ContextTransform>,
    ) -> Result<Option<Invocation>> {
        let Some(plugin) = self.registry.get(index) else {
            return Ok(None);
        };
        let Some(hook) = plugin.get_hook(hook_name) else {
            return Ok(None);
        };

        let base = &self.contexts[index];
        let context = match transform {
            Some(transform) => {
                let derived = transform(base, plugin);
                if derived.is_same(base) {
                    let mut log = Log::new(format!(
                        "Context transform for hook {hook_name} must return a new context object."
                    ))
                    .with_code(ErrorCode::InvalidHookContext);
                    log.plugin = Some(plugin.label(index));
                    log.hook = Some(hook_name.to_string());
                    return Err(log.into());
                }
                derived
            }
            None => base.clone(),
        };

        Ok(Some(Invocation {
            hook_name: hook_name.to_string(),
            hook: hook.clone(),
            context,
            args,
            plugin: plugin.label(index),
            permit_values,
        }))
    }

    async fn run_hook(
        &self,
        hook_name: &str,
        args: Vec<Value>,
        index: usize,
        permit_values: bool,
        transform: Option<&ContextTransform>,
    ) -> Result<HookOutcome> {
        match self.prepare(hook_name, args, index, permit_values, transform)? {
            Some(invocation) => invocation.run().await.map(HookOutcome::Returned),
            None => Ok(HookOutcome::Absent),
        }
    }

    pub(crate) async fn hook_seq(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<()> {
        for index in 0..self.registry.len() {
            self.run_hook(hook, args.clone(), index, false, transform)
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn hook_first(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<Option<Value>> {
        for index in 0..self.registry.len() {
            let outcome = self
                .run_hook(hook, args.clone(), index, false, transform)
                .await?;
            if let HookOutcome::Returned(Some(value)) = outcome {
                if !value.is_null() {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    pub(crate) async fn hook_parallel(
        &self,
        hook: &str,
        args: Vec<Value>,
        transform: Option<&ContextTransform>,
    ) -> Result<()> {
        let mut pending = FuturesUnordered::new();
        for index in 0..self.registry.len() {
            let Some(invocation) = self.prepare(hook, args.clone(), index, false, transform)?
            else {
                continue;
            };
            let plugin = invocation.plugin.clone();
            let task = tokio::spawn(invocation.run());
            pending.push(async move { (plugin, task.await) });
        }

        // Dropping `pending` early detaches the remaining tasks; it does not
        // abort them.
        while let Some((plugin, joined)) = pending.next().await {
            match joined {
                Ok(result) => {
                    result?;
                }
                Err(join_error) => {
                    return Err(PluginError::from_hook_failure(
                        anyhow::anyhow!("hook panicked: {join_error}"),
                        &plugin,
                        hook,
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn hook_reduce_arg0<R>(
        &self,
        hook: &str,
        args: Vec<Value>,
        mut reduce: R,
        transform: Option<&ContextTransform>,
    ) -> Result<Value>
    where
        R: FnMut(Value, Value, &Plugin) -> Result<Value>,
    {
        let mut args = args.into_iter();
        let mut current = args.next().unwrap_or(Value::Null);
        let rest: Vec<Value> = args.collect();

        for (index, plugin) in self.registry.iter().enumerate() {
            let call_args = std::iter::once(current.clone())
                .chain(rest.iter().cloned())
                .collect();
            let outcome = self
                .run_hook(hook, call_args, index, false, transform)
                .await?;
            if let HookOutcome::Returned(Some(result)) = outcome {
                current = reduce(current, result, plugin.as_ref())?;
            }
        }
        Ok(current)
    }

    pub(crate) async fn hook_reduce_value<R>(
        &self,
        hook: &str,
        initial: Value,
        args: Vec<Value>,
        mut reduce: R,
        transform: Option<&ContextTransform>,
    ) -> Result<Value>
    where
        R: FnMut(Value, Value, &Plugin) -> Result<Value>,
    {
        let mut accumulator = initial;
        for (index, plugin) in self.registry.iter().enumerate() {
            let outcome = self
                .run_hook(hook, args.clone(), index, true, transform)
                .await?;
            if let HookOutcome::Returned(Some(result)) = outcome {
                accumulator = reduce(accumulator, result, plugin.as_ref())?;
            }
        }
        Ok(accumulator)
    }
}
