//! The fallback plugin appended after every user plugin.
//!
//! It only answers when nobody else did: `resolveId` turns relative specifiers
//! into absolute paths and `load` reads modules from disk.

use std::path::{Path, PathBuf};

use anyhow::Context;
use path_clean::PathClean;
use serde_json::Value;

use super::plugin::{Plugin, hook_names};

pub const DEFAULT_PLUGIN_NAME: &str = "fob:default";

pub(crate) fn default_plugin() -> Plugin {
    Plugin::new(DEFAULT_PLUGIN_NAME)
        .sync_hook(hook_names::RESOLVE_ID, |_ctx, args| {
            let Some(id) = args.first().and_then(Value::as_str) else {
                return Ok(None);
            };
            let importer = args.get(1).and_then(Value::as_str);
            Ok(resolve_id(id, importer).map(Value::String))
        })
        .hook(hook_names::LOAD, |_ctx, args| async move {
            let Some(id) = args.first().and_then(Value::as_str) else {
                return Ok(None);
            };
            let code = tokio::fs::read_to_string(id)
                .await
                .with_context(|| format!("Could not load {id}"))?;
            Ok(Some(Value::String(code)))
        })
}

/// Default module resolution.
///
/// Bare specifiers imported from another module are left to other plugins
/// (`None`). Everything else is made absolute against the importer's
/// directory, or the working directory for entries, and gets a `.js`
/// extension if it has none.
pub(crate) fn resolve_id(id: &str, importer: Option<&str>) -> Option<String> {
    let path = Path::new(id);
    let is_relative = id.starts_with("./") || id.starts_with("../");

    let resolved: PathBuf = match importer {
        _ if path.is_absolute() => path.to_path_buf(),
        Some(importer) if is_relative => Path::new(importer)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(path),
        Some(_) => return None,
        None => std::env::current_dir().ok()?.join(path),
    };

    let mut resolved = resolved.clean();
    if resolved.extension().is_none() {
        resolved.set_extension("js");
    }
    Some(resolved.to_string_lossy().into_owned())
}
