#![cfg_attr(docsrs, feature(doc_cfg))]

//! # fob-plugin-driver
//!
//! Runs bundler plugin hooks.
//!
//! The driver holds an ordered list of plugins, with a built-in default plugin
//! appended last, and gives each one a private [`PluginContext`]. Bundlers ask
//! the driver to run a named hook across all plugins with one of five
//! strategies, and every hook failure comes back as a [`PluginError`] tagged
//! with the plugin and hook that raised it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fob_plugin_driver::{CacheRoot, DriverConfig, MemoryGraph, Plugin, PluginDriver};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let virtual_entry = Plugin::new("virtual").sync_hook("resolveId", |_ctx, args| {
//!     Ok((args[0] == "virtual:entry").then(|| json!("\0virtual:entry")))
//! });
//!
//! let driver = PluginDriver::new(
//!     vec![virtual_entry],
//!     Arc::new(MemoryGraph::new()),
//!     Some(CacheRoot::new()),
//!     &DriverConfig::load(None)?,
//! );
//!
//! let resolved = driver
//!     .hook_first("resolveId", vec![json!("virtual:entry"), json!(null)], None)
//!     .await?;
//! assert_eq!(resolved, Some(json!("\0virtual:entry")));
//! # Ok(()) }
//! ```

pub mod assets;
pub mod cache;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod graph;
pub mod plugins;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use assets::{Asset, AssetStore};
pub use cache::{CacheEntry, CacheNamespace, CacheRoot, CompositeKey, PluginCache, UncacheableReason};
pub use config::{ConfigError, DriverConfig};
pub use context::{ContextMeta, PluginContext};
pub use driver::{ContextTransform, PluginDriver};
pub use error::{ErrorCode, Log, PluginError, Result};
pub use graph::{BuildGraph, MemoryGraph};
pub use plugins::{DEFAULT_PLUGIN_NAME, Hook, HookFuture, HookHandler, HookResult, Plugin, hook_names};
