//! Per-plugin cache namespaces.
//!
//! The embedder owns a [`CacheRoot`] that outlives a single build. Each
//! cacheable plugin gets one namespace inside it, addressed by the plugin's
//! [`CompositeKey`]. Entries carry an access counter that is reset whenever a
//! plugin reads or writes them; [`CacheRoot::age`] bumps the counters between
//! builds and evicts whatever has gone unused for too long.
//!
//! Plugins never see the root. They see a [`PluginCache`], which is either a
//! live namespace, a no-op (caching switched off), or a disabled capability
//! whose every accessor fails with a coded error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ErrorCode, PluginError, Result};

/// A single cached value with its access counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    /// Builds since the entry was last read or written.
    pub last_access_count: u32,
}

impl CacheEntry {
    fn fresh(value: Value) -> Self {
        Self {
            value,
            last_access_count: 0,
        }
    }
}

type Entries = FxHashMap<String, CacheEntry>;

/// Identity of a plugin's cache namespace: the pair `(name, cache_key)`.
///
/// Both fields take part in equality, so `("ab", "")` and `("a", "b")` are
/// different namespaces even though they render the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    name: String,
    cache_key: String,
}

impl CompositeKey {
    pub fn new(name: impl Into<String>, cache_key: Option<&str>) -> Self {
        Self {
            name: name.into(),
            cache_key: cache_key.unwrap_or_default().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.cache_key)
    }
}

/// Snapshot form of a cache root, suitable for persistence.
///
/// Nested as plugin name → cache key (`""` when none) → entry key.
pub type CacheSnapshot = BTreeMap<String, BTreeMap<String, BTreeMap<String, CacheEntry>>>;

/// Externally owned store of every plugin namespace.
///
/// Cloning is cheap and shares the underlying storage, so the embedder can
/// hand a clone to the driver and serialize its own copy once the build ends.
#[derive(Debug, Clone, Default)]
pub struct CacheRoot {
    namespaces: Arc<Mutex<FxHashMap<CompositeKey, Arc<Mutex<Entries>>>>>,
}

impl CacheRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a root from a previously taken snapshot.
    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let mut namespaces = FxHashMap::default();
        for (name, by_cache_key) in snapshot {
            for (cache_key, entries) in by_cache_key {
                let key = CompositeKey::new(name.clone(), Some(&cache_key));
                let entries: Entries = entries.into_iter().collect();
                namespaces.insert(key, Arc::new(Mutex::new(entries)));
            }
        }
        Self {
            namespaces: Arc::new(Mutex::new(namespaces)),
        }
    }

    /// Copy the current contents into an ordered, serializable map.
    pub fn snapshot(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::new();
        for (key, entries) in self.namespaces.lock().iter() {
            let entries = entries
                .lock()
                .iter()
                .map(|(k, entry)| (k.clone(), entry.clone()))
                .collect();
            snapshot
                .entry(key.name.clone())
                .or_default()
                .insert(key.cache_key.clone(), entries);
        }
        snapshot
    }

    /// Look up a namespace, creating it on first use.
    pub(crate) fn namespace(&self, key: &CompositeKey) -> CacheNamespace {
        let mut namespaces = self.namespaces.lock();
        let entries = namespaces
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Entries::default())))
            .clone();
        CacheNamespace { entries }
    }

    pub fn contains_namespace(&self, key: &CompositeKey) -> bool {
        self.namespaces.lock().contains_key(key)
    }

    /// Number of namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance every entry by one build and evict stale ones.
    ///
    /// Entries whose counter exceeds `expiry` are removed, as are namespaces
    /// left empty. Returns the number of evicted entries.
    pub fn age(&self, expiry: u32) -> usize {
        let mut namespaces = self.namespaces.lock();
        let mut evicted = 0;
        namespaces.retain(|_, entries| {
            let mut entries = entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| {
                entry.last_access_count = entry.last_access_count.saturating_add(1);
                entry.last_access_count <= expiry
            });
            evicted += before - entries.len();
            !entries.is_empty()
        });
        evicted
    }
}

impl Serialize for CacheRoot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CacheRoot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        CacheSnapshot::deserialize(deserializer).map(CacheRoot::from_snapshot)
    }
}

/// One plugin's key/value store inside a [`CacheRoot`].
#[derive(Debug, Clone)]
pub struct CacheNamespace {
    entries: Arc<Mutex<Entries>>,
}

impl CacheNamespace {
    /// Whether `key` is present. A hit resets the entry's access counter.
    pub fn has(&self, key: &str) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                entry.last_access_count = 0;
                true
            }
            None => false,
        }
    }

    /// Read `key`. A hit resets the entry's access counter.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get_mut(key).map(|entry| {
            entry.last_access_count = 0;
            entry.value.clone()
        })
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries
            .lock()
            .insert(key.into(), CacheEntry::fresh(value));
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Raw entry including its access counter, without touching it.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a plugin cannot own a cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncacheableReason {
    AnonymousPlugin,
    DuplicateName,
}

/// The cache capability handed to a plugin context.
#[derive(Debug, Clone)]
pub enum PluginCache {
    /// A live namespace.
    Enabled(CacheNamespace),
    /// Caching is switched off for the whole build; reads miss, writes vanish.
    Noop,
    /// The plugin is misconfigured for caching. Every access fails.
    Disabled {
        reason: UncacheableReason,
        plugin: String,
    },
}

impl PluginCache {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PluginCache::Enabled(_))
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.namespace()?.is_some_and(|ns| ns.has(key)))
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.namespace()?.and_then(|ns| ns.get(key)))
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        if let Some(ns) = self.namespace()? {
            ns.set(key, value);
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.namespace()?.is_some_and(|ns| ns.delete(key)))
    }

    fn namespace(&self) -> Result<Option<&CacheNamespace>> {
        match self {
            PluginCache::Enabled(ns) => Ok(Some(ns)),
            PluginCache::Noop => Ok(None),
            PluginCache::Disabled {
                reason: UncacheableReason::AnonymousPlugin,
                plugin,
            } => Err(PluginError::coded(
                ErrorCode::AnonymousPluginCache,
                format!(
                    "{plugin} is trying to use the cache but does not declare a plugin name."
                ),
            )),
            PluginCache::Disabled {
                reason: UncacheableReason::DuplicateName,
                plugin,
            } => Err(PluginError::coded(
                ErrorCode::DuplicatePluginName,
                format!(
                    "The plugin name {plugin} is used more than once in the same build. \
                     Plugin names must be distinct or declare distinct cache keys."
                ),
            )),
        }
    }
}
