//! Logging setup using tracing.
//!
//! This module provides consistent logging configuration across repochat.

use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Whether to include the event target.
    pub with_target: bool,
    /// Whether to include file/line info in logs.
    pub include_location: bool,
    /// Log file path. Logs go to stdout when unset.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Build a config that enables `level` for all repochat crates.
    pub fn for_level(level: LogLevel) -> Self {
        Self {
            filter: repochat_filter(level),
            ..Default::default()
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: repochat_filter(LogLevel::Info),
            with_target: false,
            include_location: false,
            file: None,
        }
    }
}

/// Filter directive covering every workspace crate at `level`.
pub fn repochat_filter(level: LogLevel) -> String {
    let level = level.as_str();
    [
        "repochat",
        "repochat_core",
        "repochat_server",
        "repochat_tools",
        "repochat_sandbox",
        "repochat_provider",
        "repochat_client",
        "repochat_storage",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .chain(std::iter::once(format!("tower_http={level}")))
    .collect::<Vec<_>>()
    .join(",")
}

/// Initialize logging with the given configuration.
///
/// This should be called once at application startup. Returns the log file
/// path when logging to a file.
pub fn init(config: LogConfig) -> Option<PathBuf> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let subscriber = tracing_subscriber::registry().with(filter);

    if let Some(path) = config.file {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: Could not create log directory: {e}");
                return None;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file: {e}");
                return None;
            }
        };

        let fmt_layer = fmt::layer()
            .with_target(config.with_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_ansi(false)
            .with_writer(file);
        subscriber.with(fmt_layer).init();
        return Some(path);
    }

    let fmt_layer = fmt::layer()
        .with_target(config.with_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    subscriber.with(fmt_layer).init();
    None
}

/// Get the default log file path.
pub fn default_log_path() -> Option<PathBuf> {
    crate::path::logs_dir().map(|p| p.join("repochat.log"))
}
