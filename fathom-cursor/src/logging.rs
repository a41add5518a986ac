//! Logging setup for fathom.
//!
//! The crates log through `tracing`: pulls and destroys at `debug`, single
//! documents at `trace`, swallowed close failures at `warn`. Nothing is
//! printed unless the host application installs a subscriber, or calls
//! [`init`] with the `tracing-subscriber` feature enabled.
//!
//! # Environment Variables
//!
//! - `FATHOM_DEBUG=true|1|yes` - Log at `debug`
//! - `FATHOM_LOG_LEVEL=trace|debug|info|warn|error` - Explicit level, wins over `FATHOM_DEBUG`
//! - `FATHOM_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use fathom_cursor::logging;
//!
//! logging::init();
//! ```

use std::sync::Once;

use tracing::Level;

static INIT: Once = Once::new();

/// Environment variable enabling debug logging.
pub const ENV_DEBUG: &str = "FATHOM_DEBUG";
/// Environment variable setting the log level.
pub const ENV_LOG_LEVEL: &str = "FATHOM_LOG_LEVEL";
/// Environment variable setting the output format.
pub const ENV_LOG_FORMAT: &str = "FATHOM_LOG_FORMAT";

/// Targets the filter directive covers.
const TARGETS: [&str; 3] = ["fathom", "fathom_cursor", "fathom_pipeline"];

/// Subscriber output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

impl LogFormat {
    /// Parse a format name, case-insensitively. Unknown names give `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Most verbose level that is recorded.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Whether either `FATHOM_DEBUG` or `FATHOM_LOG_LEVEL` asked for output.
    pub requested: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Json,
            requested: false,
        }
    }
}

impl LogSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// An unknown level or format falls back to the default rather than
    /// failing; logging must never stop a cursor from being used.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debug = lookup(ENV_DEBUG).is_some_and(|v| {
            matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        });
        let explicit = lookup(ENV_LOG_LEVEL);
        let level = explicit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<Level>().ok())
            .unwrap_or(if debug { Level::DEBUG } else { Level::WARN });
        let format = lookup(ENV_LOG_FORMAT)
            .as_deref()
            .and_then(LogFormat::parse)
            .unwrap_or_default();

        Self {
            level,
            format,
            requested: debug || explicit.is_some(),
        }
    }

    /// `EnvFilter` directive enabling `level` for every fathom crate.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Check if debug logging is enabled via `FATHOM_DEBUG`.
pub fn is_debug_enabled() -> bool {
    let settings = LogSettings::from_env();
    settings.requested && settings.level >= Level::DEBUG
}

/// Install a subscriber configured from the environment.
///
/// Does nothing unless `FATHOM_DEBUG` or `FATHOM_LOG_LEVEL` is set.
pub fn init() {
    let settings = LogSettings::from_env();
    if settings.requested {
        init_with(settings);
    }
}

/// Install a subscriber with explicit settings.
///
/// Only the first call in a process has any effect. Without the
/// `tracing-subscriber` feature this never installs anything; bring your
/// own subscriber instead.
pub fn init_with(settings: LogSettings) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(settings.filter_directive())
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            let registry = tracing_subscriber::registry().with(filter);
            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = %settings.level,
                    format = ?settings.format,
                    "Fathom logging initialized"
                );
            }
        }
        #[cfg(not(feature = "tracing-subscriber"))]
        let _ = settings;
    });
}
