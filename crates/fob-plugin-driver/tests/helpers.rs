//! Shared test utilities for fob-plugin-driver tests

#![allow(dead_code)]

use fob_plugin_driver::{
    BuildGraph, CacheRoot, DriverConfig, MemoryGraph, Plugin, PluginContext, PluginDriver,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Ordered record of hook activity shared between plugins.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().clone()
}

/// A driver together with the graph and cache it was built on.
pub struct TestBuild {
    pub graph: Arc<MemoryGraph>,
    pub cache: CacheRoot,
    pub driver: PluginDriver,
}

/// Build a driver with caching on and an empty in-memory graph.
pub fn build(plugins: Vec<Plugin>) -> TestBuild {
    build_with(plugins, MemoryGraph::new(), CacheRoot::new(), &DriverConfig::default())
}

pub fn build_with(
    plugins: Vec<Plugin>,
    graph: MemoryGraph,
    cache: CacheRoot,
    config: &DriverConfig,
) -> TestBuild {
    let graph = Arc::new(graph);
    let driver = PluginDriver::new(
        plugins,
        Arc::clone(&graph) as Arc<dyn BuildGraph>,
        Some(cache.clone()),
        config,
    );
    TestBuild {
        graph,
        cache,
        driver,
    }
}

/// A plugin whose `hook` records "`name`" and returns `result`.
pub fn recording(name: &str, hook: &str, log: &CallLog, result: Option<Value>) -> Plugin {
    let log = Arc::clone(log);
    let entry = name.to_string();
    Plugin::new(name).sync_hook(hook, move |_ctx, _args| {
        log.lock().push(entry.clone());
        Ok(result.clone())
    })
}

/// Context transform that scopes every call to a fresh context.
pub fn derive_context(ctx: &PluginContext, _plugin: &Plugin) -> PluginContext {
    ctx.derive()
}

/// Context transform that hands back the context it was given.
pub fn same_context(ctx: &PluginContext, _plugin: &Plugin) -> PluginContext {
    ctx.clone()
}
