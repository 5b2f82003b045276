//! Configuration and log paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/eufin-testenv/` and `~/.local/share/eufin-testenv/`
//! - macOS: `~/Library/Application Support/eufin-testenv/`

use std::io;
use std::path::{Path, PathBuf};

/// Application name used for directory lookup
const APP_NAME: &str = "eufin-testenv";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the default directory for service log files
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Deterministic log file for a service's combined output
pub fn service_log(dir: &Path, service: &str) -> PathBuf {
    dir.join(format!("{}.log", service))
}

/// Ensure a directory exists
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_service_log_is_deterministic() {
        let dir = Path::new("/tmp/logs");
        assert_eq!(service_log(dir, "nexus"), PathBuf::from("/tmp/logs/nexus.log"));
        assert_eq!(service_log(dir, "nexus"), service_log(dir, "nexus"));
    }

    #[test]
    fn test_resolve() {
        let base = Path::new("/work");
        assert_eq!(resolve(base, Path::new("db.sqlite3")), PathBuf::from("/work/db.sqlite3"));
        assert_eq!(resolve(base, Path::new("/abs/db")), PathBuf::from("/abs/db"));
    }
}
