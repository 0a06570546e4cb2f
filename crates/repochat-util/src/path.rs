//! Path utilities.

use std::path::PathBuf;

/// Get the repochat configuration directory.
///
/// On Unix this prefers `~/.config/repochat` when it exists, falling back to
/// the platform configuration directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        if let Some(home) = dirs::home_dir() {
            let xdg_config = home.join(".config").join("repochat");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }
    }

    dirs::config_dir().map(|p| p.join("repochat"))
}

/// Get the repochat data directory (`~/.local/share/repochat` on Linux).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("repochat"))
}

/// Get the repochat state directory.
///
/// This is where client session state is kept.
pub fn state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|p| p.join("repochat"))
}

/// Get the repochat logs directory.
pub fn logs_dir() -> Option<PathBuf> {
    state_dir().map(|p| p.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_end_with_app_name() {
        if let Some(dir) = data_dir() {
            assert!(dir.ends_with("repochat"));
        }
        if let Some(dir) = logs_dir() {
            assert!(dir.ends_with("repochat/logs"));
        }
    }
}
