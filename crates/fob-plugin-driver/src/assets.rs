//! Asset store backing the `emit_asset` family of context functions.
//!
//! Plugins emit assets by name and get an opaque id back. Sources can be
//! supplied up front or later through `set_asset_source`. File names only
//! exist once the bundler calls [`AssetStore::finalise`], which hashes each
//! source into the configured file name pattern.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ErrorCode, PluginError, Result};

/// Thread-safe asset store.
///
/// Cloning shares the same underlying assets.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    inner: Arc<RwLock<AssetStoreInner>>,
}

#[derive(Debug, Default)]
struct AssetStoreInner {
    /// Asset id → asset
    assets: FxHashMap<String, Asset>,

    /// Ids in emission order
    order: Vec<String>,

    /// Emission counter, mixed into ids so equal names get distinct ids
    emitted: u64,
}

/// An emitted asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Name the plugin gave the asset, e.g. "logo.svg"
    pub name: String,

    /// Content, once known
    pub source: Option<Vec<u8>>,

    /// Final output file name, assigned by `finalise`
    pub file_name: Option<String>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new asset and return its id.
    ///
    /// Names must be plain: not absolute and not starting with `./` or `../`.
    pub fn emit_asset(&self, name: &str, source: Option<Vec<u8>>) -> Result<String> {
        if !is_plain_name(name) {
            return Err(PluginError::coded(
                ErrorCode::InvalidAssetName,
                format!(
                    "Unable to emit asset \"{name}\": asset names must be plain names, not relative or absolute paths."
                ),
            ));
        }

        let mut inner = self.inner.write();
        let id = loop {
            inner.emitted += 1;
            let mut hasher = blake3::Hasher::new();
            hasher.update(name.as_bytes());
            hasher.update(&inner.emitted.to_le_bytes());
            let id = format!("{}_{}", asset_stem(name), &hasher.finalize().to_hex()[..8]);
            if !inner.assets.contains_key(&id) {
                break id;
            }
        };

        inner.assets.insert(
            id.clone(),
            Asset {
                name: name.to_string(),
                source,
                file_name: None,
            },
        );
        inner.order.push(id.clone());
        Ok(id)
    }

    /// Supply the source of an asset emitted without one.
    pub fn set_asset_source(&self, id: &str, source: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write();
        let asset = inner.assets.get_mut(id).ok_or_else(|| {
            PluginError::coded(
                ErrorCode::AssetNotFound,
                format!("Unable to set the source for unknown asset {id}."),
            )
        })?;
        if asset.source.is_some() {
            return Err(PluginError::coded(
                ErrorCode::AssetSourceAlreadySet,
                format!("Unable to set the source for asset {id}, source already set."),
            ));
        }
        asset.source = Some(source);
        Ok(())
    }

    /// Output file name of an asset, available after `finalise`.
    pub fn get_asset_file_name(&self, id: &str) -> Result<String> {
        let inner = self.inner.read();
        let asset = inner.assets.get(id).ok_or_else(|| {
            PluginError::coded(
                ErrorCode::AssetNotFound,
                format!("Unable to get the file name for unknown asset {id}."),
            )
        })?;
        asset.file_name.clone().ok_or_else(|| {
            PluginError::coded(
                ErrorCode::AssetNotFinalised,
                format!(
                    "Unable to get the file name for asset {id}. File names are only available once assets have been finalised."
                ),
            )
        })
    }

    /// Assign output file names to every asset that does not have one yet.
    ///
    /// `pattern` may use `[name]`, `[hash]`, `[extname]` (with the dot) and
    /// `[ext]` (without). Clashing names get a numeric suffix.
    pub fn finalise(&self, pattern: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let AssetStoreInner { assets, order, .. } = &mut *inner;

        let mut taken: FxHashSet<String> = assets
            .values()
            .filter_map(|asset| asset.file_name.clone())
            .collect();

        for id in order.iter() {
            let Some(asset) = assets.get_mut(id) else {
                continue;
            };
            if asset.file_name.is_some() {
                continue;
            }
            let source = asset.source.as_deref().ok_or_else(|| {
                PluginError::coded(
                    ErrorCode::AssetSourceMissing,
                    format!("Plugin did not set a source for asset {}.", asset.name),
                )
            })?;

            let file_name = unique_file_name(render_file_name(pattern, &asset.name, source), &taken);
            taken.insert(file_name.clone());
            asset.file_name = Some(file_name);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Asset> {
        self.inner.read().assets.get(id).cloned()
    }

    /// Asset ids in emission order.
    pub fn ids(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.starts_with("./")
        && !name.starts_with("../")
        && !Path::new(name).is_absolute()
}

fn asset_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("asset")
}

fn render_file_name(pattern: &str, name: &str, source: &[u8]) -> String {
    let path = Path::new(name);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let extname = if ext.is_empty() {
        String::new()
    } else {
        format!(".{ext}")
    };
    let stem = match name.strip_suffix(&extname) {
        Some(stem) if !extname.is_empty() => stem,
        _ => name,
    };
    let hash = blake3::hash(source).to_hex();

    pattern
        .replace("[name]", stem)
        .replace("[hash]", &hash[..8])
        .replace("[extname]", &extname)
        .replace("[ext]", ext)
}

fn unique_file_name(file_name: String, taken: &FxHashSet<String>) -> String {
    if !taken.contains(&file_name) {
        return file_name;
    }
    let path = Path::new(&file_name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let base = &file_name[..file_name.len() - ext.len()];

    let mut n = 2;
    loop {
        let candidate = format!("{base}{n}{ext}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
