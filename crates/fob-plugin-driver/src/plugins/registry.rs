//! Ordered plugin registry.
//!
//! The registry fixes the plugin order for the whole build: user plugins in
//! the order given, then the default plugin. Nothing is ever reordered, so the
//! first registered plugin always wins ties.
//!
//! Cache identities are checked here, once, over the whole list.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::default::default_plugin;
use super::plugin::{Plugin, hook_names};
use crate::cache::{CompositeKey, UncacheableReason};

/// Whether a plugin may own a cache namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cacheability {
    Cacheable(CompositeKey),
    Uncacheable(UncacheableReason),
}

/// Plugin registry that keeps plugins in registration order
pub(crate) struct PluginRegistry {
    plugins: Vec<Arc<Plugin>>,

    /// Number of user plugins; the default plugin sits right after them
    user_plugins: usize,
}

impl PluginRegistry {
    /// Build the registry from user plugins, appending the default plugin.
    pub fn new(plugins: Vec<Plugin>) -> Self {
        let user_plugins = plugins.len();
        let plugins = plugins
            .into_iter()
            .chain(std::iter::once(default_plugin()))
            .map(Arc::new)
            .collect();
        Self {
            plugins,
            user_plugins,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Plugin>> {
        self.plugins.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Plugin>> {
        self.plugins.iter()
    }

    /// Get the number of plugins, default plugin included
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether any user plugin declares `load`, `transform` or `transformChunk`.
    ///
    /// The default plugin always loads from disk, so it does not count.
    pub fn has_loaders_or_transforms(&self) -> bool {
        self.plugins[..self.user_plugins].iter().any(|plugin| {
            hook_names::SOURCE_HOOKS
                .iter()
                .any(|hook| plugin.has_hook(hook))
        })
    }

    /// Cacheability of every plugin, in registry order.
    ///
    /// Unnamed plugins are never cacheable. Named plugins whose composite key
    /// (`name`, `cache_key`) is shared with any other plugin are all marked as
    /// duplicates, not just the later ones.
    pub fn cacheability(&self) -> Vec<Cacheability> {
        let keys: Vec<Option<CompositeKey>> = self
            .plugins
            .iter()
            .map(|plugin| {
                plugin
                    .name()
                    .map(|name| CompositeKey::new(name, plugin.cache_key()))
            })
            .collect();

        let mut occurrences: FxHashMap<CompositeKey, usize> = FxHashMap::default();
        for key in keys.iter().flatten() {
            *occurrences.entry(key.clone()).or_default() += 1;
        }

        keys.into_iter()
            .map(|key| match key {
                None => Cacheability::Uncacheable(UncacheableReason::AnonymousPlugin),
                Some(key) if occurrences.get(&key).is_some_and(|count| *count > 1) => {
                    Cacheability::Uncacheable(UncacheableReason::DuplicateName)
                }
                Some(key) => Cacheability::Cacheable(key),
            })
            .collect()
    }
}
