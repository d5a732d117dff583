//! Plugin system for fob-plugin-driver.
//!
//! This module provides the plugin model, including:
//! - Plugin records with their hook tables
//! - The ordered registry and its cache identity checks
//! - The built-in default plugin

pub mod default;
pub mod plugin;
pub(crate) mod registry;

pub use default::DEFAULT_PLUGIN_NAME;
pub use plugin::{Hook, HookFuture, HookHandler, HookResult, Plugin, hook_names};
