//! Driver configuration.
//!
//! Priority: environment variables (`FOB_PLUGINS_*`) > config file > defaults.

use std::path::{Component, Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "fob-plugins.toml";

const ENV_PREFIX: &str = "FOB_PLUGINS_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load plugin driver configuration: {0}")]
    Load(String),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Options that shape how plugins are driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Give plugins real cache namespaces. When false every plugin gets the
    /// no-op cache.
    pub cache: bool,

    /// Number of builds an unused cache entry survives. Applied by
    /// [`PluginDriver::age_cache`](crate::PluginDriver::age_cache).
    pub cache_expiry: u32,

    /// Pattern for emitted asset file names.
    pub asset_file_names: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cache: true,
            cache_expiry: 10,
            asset_file_names: "assets/[name]-[hash][extname]".to_string(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Without an explicit path, `fob-plugins.toml` in the working directory
    /// is used when present. `.json` files are read as JSON, anything else as
    /// TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered figment behind [`DriverConfig::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = path.map(Path::to_path_buf).or_else(|| {
            let default_path = PathBuf::from(CONFIG_FILE);
            default_path.exists().then_some(default_path)
        });

        if let Some(path) = config_file {
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            figment = if is_json {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pattern = &self.asset_file_names;
        if pattern.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "asset_file_names",
                reason: "pattern must not be empty".to_string(),
            });
        }
        let path = Path::new(pattern);
        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(ConfigError::InvalidValue {
                field: "asset_file_names",
                reason: format!("\"{pattern}\" must be a relative path inside the output directory"),
            });
        }
        if !pattern.contains("[name]") && !pattern.contains("[hash]") {
            return Err(ConfigError::InvalidValue {
                field: "asset_file_names",
                reason: format!("\"{pattern}\" must contain [name] or [hash]"),
            });
        }
        Ok(())
    }
}
