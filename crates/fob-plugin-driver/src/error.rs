//! Structured logs and the plugin error type.
//!
//! Every warning and error that leaves the driver has the same shape: a
//! [`Log`] carrying a message, a code, and the identity of the plugin and
//! hook that produced it. Plugin-originated logs always carry one of the
//! sentinel codes ([`ErrorCode::PluginError`] / [`ErrorCode::PluginWarning`]);
//! whatever code the plugin chose itself is kept under `plugin_code`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Placeholder written into `plugin` when an unnamed plugin warns or errors.
pub const ANONYMOUS_PLUGIN: &str = "(anonymous plugin)";

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Error and warning codes.
///
/// Codes raised by the driver itself have dedicated variants; any other code a
/// plugin attaches to its own logs is carried as [`ErrorCode::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Sentinel for every fatal plugin failure.
    PluginError,
    /// Sentinel for every plugin warning.
    PluginWarning,
    /// A hook was declared as a value where a function is required.
    InvalidPluginHook,
    /// A context transform handed back the context it was given.
    InvalidHookContext,
    /// An unnamed plugin touched its cache.
    AnonymousPluginCache,
    /// Two plugins share a cache identity and one of them touched its cache.
    DuplicatePluginName,
    AssetNotFound,
    AssetNotFinalised,
    AssetSourceAlreadySet,
    AssetSourceMissing,
    InvalidAssetName,
    /// `add_watch_file` was called after the build finished.
    WatchFileAfterBuild,
    /// The build graph could not parse the given code.
    ParseError,
    /// A plugin-defined code.
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::PluginError => "PLUGIN_ERROR",
            ErrorCode::PluginWarning => "PLUGIN_WARNING",
            ErrorCode::InvalidPluginHook => "INVALID_PLUGIN_HOOK",
            ErrorCode::InvalidHookContext => "INVALID_HOOK_CONTEXT",
            ErrorCode::AnonymousPluginCache => "ANONYMOUS_PLUGIN_CACHE",
            ErrorCode::DuplicatePluginName => "DUPLICATE_PLUGIN_NAME",
            ErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            ErrorCode::AssetNotFinalised => "ASSET_NOT_FINALISED",
            ErrorCode::AssetSourceAlreadySet => "ASSET_SOURCE_ALREADY_SET",
            ErrorCode::AssetSourceMissing => "ASSET_SOURCE_MISSING",
            ErrorCode::InvalidAssetName => "INVALID_ASSET_NAME",
            ErrorCode::WatchFileAfterBuild => "WATCH_FILE_AFTER_BUILD",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::Custom(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "PLUGIN_ERROR" => ErrorCode::PluginError,
            "PLUGIN_WARNING" => ErrorCode::PluginWarning,
            "INVALID_PLUGIN_HOOK" => ErrorCode::InvalidPluginHook,
            "INVALID_HOOK_CONTEXT" => ErrorCode::InvalidHookContext,
            "ANONYMOUS_PLUGIN_CACHE" => ErrorCode::AnonymousPluginCache,
            "DUPLICATE_PLUGIN_NAME" => ErrorCode::DuplicatePluginName,
            "ASSET_NOT_FOUND" => ErrorCode::AssetNotFound,
            "ASSET_NOT_FINALISED" => ErrorCode::AssetNotFinalised,
            "ASSET_SOURCE_ALREADY_SET" => ErrorCode::AssetSourceAlreadySet,
            "ASSET_SOURCE_MISSING" => ErrorCode::AssetSourceMissing,
            "INVALID_ASSET_NAME" => ErrorCode::InvalidAssetName,
            "WATCH_FILE_AFTER_BUILD" => ErrorCode::WatchFileAfterBuild,
            "PARSE_ERROR" => ErrorCode::ParseError,
            other => ErrorCode::Custom(other.to_string()),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        ErrorCode::from(code.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(code))
    }
}

/// A structured warning or error.
///
/// Plugins may build one directly or pass a plain string to
/// [`PluginContext::warn`](crate::PluginContext::warn) /
/// [`PluginContext::error`](crate::PluginContext::error), which is promoted to
/// `Log { message, .. }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    /// The plugin's own code, preserved when the sentinel replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    /// Module the log refers to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-form plugin data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Log {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Stamp the log with a sentinel code and the owning plugin.
    ///
    /// Any code already present moves to `plugin_code`.
    pub(crate) fn into_plugin_log(mut self, sentinel: ErrorCode, plugin: &str) -> Self {
        if let Some(code) = self.code.take() {
            self.plugin_code = Some(code);
        }
        self.code = Some(sentinel);
        self.plugin = Some(plugin.to_string());
        self
    }
}

impl From<&str> for Log {
    fn from(message: &str) -> Self {
        Log::new(message)
    }
}

impl From<String> for Log {
    fn from(message: String) -> Self {
        Log::new(message)
    }
}

impl fmt::Display for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.plugin, &self.hook) {
            (Some(plugin), Some(hook)) => write!(f, "[{plugin}:{hook}] {}", self.message),
            (Some(plugin), None) => write!(f, "[{plugin}] {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// A fatal failure raised by a plugin or by the driver on a plugin's behalf.
///
/// Always fatal to the dispatch in progress. The underlying [`Log`] says which
/// plugin and hook caused it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct PluginError(Box<Log>);

impl PluginError {
    pub fn new(log: impl Into<Log>) -> Self {
        Self(Box::new(log.into()))
    }

    pub(crate) fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(Log::new(message).with_code(code))
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        self.0.code.as_ref()
    }

    pub fn plugin_code(&self) -> Option<&ErrorCode> {
        self.0.plugin_code.as_ref()
    }

    pub fn plugin(&self) -> Option<&str> {
        self.0.plugin.as_deref()
    }

    pub fn hook(&self) -> Option<&str> {
        self.0.hook.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn log(&self) -> &Log {
        &self.0
    }

    pub fn into_log(self) -> Log {
        *self.0
    }

    /// Normalize an arbitrary hook failure.
    ///
    /// Structured [`PluginError`]s keep their fields; anything else becomes a
    /// bare `{ message }`. The code is forced to `PLUGIN_ERROR` (the previous
    /// one moves to `plugin_code`) and the plugin and hook are attached.
    pub(crate) fn from_hook_failure(error: anyhow::Error, plugin: &str, hook: &str) -> Self {
        let mut log = match error.downcast::<PluginError>() {
            Ok(error) => error.into_log(),
            Err(error) => Log::new(format!("{error:#}")),
        };
        if log.code != Some(ErrorCode::PluginError) {
            if let Some(code) = log.code.take() {
                log.plugin_code = Some(code);
            }
            log.code = Some(ErrorCode::PluginError);
        }
        log.plugin = Some(plugin.to_string());
        log.hook = Some(hook.to_string());
        Self::new(log)
    }
}

impl From<Log> for PluginError {
    fn from(log: Log) -> Self {
        Self::new(log)
    }
}

impl miette::Diagnostic for PluginError {
    fn code(&self) -> Option<Box<dyn fmt::Display + '_>> {
        self.code()
            .map(|code| Box::new(code.as_str()) as Box<dyn fmt::Display + '_>)
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn fmt::Display + '_>> {
        let code = match self.code() {
            Some(ErrorCode::PluginError) => self.plugin_code()?,
            Some(code) => code,
            None => return None,
        };
        let help = match code {
            ErrorCode::InvalidPluginHook => {
                "This hook must be declared as a function. Only value-accepting hooks may be plain values."
            }
            ErrorCode::AnonymousPluginCache => {
                "Give the plugin a name so it can own a cache namespace."
            }
            ErrorCode::DuplicatePluginName => {
                "Plugin names must be unique, or each plugin must declare a distinct cache key."
            }
            ErrorCode::InvalidHookContext => {
                "Context transforms must derive a new context, e.g. with `context.derive()`."
            }
            ErrorCode::AssetNotFinalised => {
                "Asset file names are only available once the assets have been finalised."
            }
            _ => return None,
        };
        Some(Box::new(help))
    }
}
