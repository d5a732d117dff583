//! Logging setup for binaries embedding the plugin driver.
//!
//! This module is only available with the `logging` feature. Libraries should
//! not call it: the driver only emits `tracing` events and leaves the
//! subscriber to the application.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Verbosity of driver output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Silent,
    Error,
    /// Plugin warnings (default)
    #[default]
    Warn,
    Info,
    /// Driver setup and hook failures
    Debug,
    /// Every hook invocation
    Trace,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("Invalid log level: {}", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Install a global subscriber showing driver events at `level`.
///
/// `RUST_LOG` directives still apply on top. Only the first call in a process
/// has any effect.
///
/// ```rust,no_run
/// use fob_plugin_driver::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    INIT.call_once(|| {
        let directive = format!("fob_plugin_driver={}", level.as_filter());
        let filter = match directive.parse() {
            Ok(directive) => EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
            Err(_) => EnvFilter::from_default_env(),
        };
        install(filter);
    });
}

/// Install a global subscriber configured from `RUST_LOG`, falling back to
/// [`LogLevel::Warn`].
pub fn init_logging_from_env() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::default().as_filter()));
        install(filter);
    });
}

fn install(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true).without_time())
        .init();
}
