//! Logging setup shared by the Skycast binaries
//!
//! Output always goes to stderr. The format is text, JSON or pretty, and the
//! filter comes from `RUST_LOG` when set, else from the configured level.
//!
//! ```no_run
//! use libskycast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//!
//! // Or read SKYCAST_LOG_FORMAT / SKYCAST_LOG_LEVEL
//! libskycast::logging::init_default();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "SKYCAST_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "SKYCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain lines, no colors
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line with colors, for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug` unless `RUST_LOG` says otherwise
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build from `SKYCAST_LOG_FORMAT` / `SKYCAST_LOG_LEVEL`
    ///
    /// An explicit `format` wins over the environment. Unknown format values
    /// in the environment fall back to text.
    pub fn from_env<I>(vars: I, format: Option<LogFormat>, verbose: bool) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env_format = None;
        let mut level = None;
        for (key, value) in vars {
            if key == LOG_FORMAT_ENV {
                env_format = value.parse().ok();
            } else if key == LOG_LEVEL_ENV && !value.trim().is_empty() {
                level = Some(value);
            }
        }

        Self::new(
            format.or(env_format).unwrap_or_default(),
            level.unwrap_or_else(|| "info".to_string()),
            verbose,
        )
    }

    /// The directive used when `RUST_LOG` is not set
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber
    ///
    /// Returns an error if a subscriber is already installed.
    pub fn try_init(&self) -> Result<(), String> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directive()))
            .map_err(|e| format!("Invalid log level '{}': {}", self.directive(), e))?;

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        result.map_err(|e| e.to_string())
    }

    /// Install the global subscriber, reporting failure on stderr
    pub fn init(&self) {
        if let Err(e) = self.try_init() {
            eprintln!("Failed to initialize logging: {}", e);
        }
    }
}

/// Initialize logging from the environment with no CLI overrides
pub fn init_default() {
    LoggingConfig::from_env(std::env::vars(), None, false).init();
}
