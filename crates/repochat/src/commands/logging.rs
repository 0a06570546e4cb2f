//! Logging initialization.
//!
//! The server logs to stdout. The interactive chat client owns the terminal,
//! so its logs go to a file in the state directory.

use repochat_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;

/// Initialize logging. Returns the log file path when logging to a file.
pub fn init_logging(verbose: bool, headless: bool, configured: Option<LogLevel>) -> Option<PathBuf> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        configured.unwrap_or_default()
    };

    let mut config = LogConfig::for_level(level);
    if !headless {
        config.file = log::default_log_path();
        if config.file.is_none() {
            // No state directory; stay quiet rather than draw over the prompt.
            return None;
        }
    }
    log::init(config)
}
