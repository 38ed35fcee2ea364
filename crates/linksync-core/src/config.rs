use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default scan period in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 500;
/// Upper bound for parsable files, in bytes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Top-level configuration for linksync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory to watch. Relative values are resolved against the working
    /// directory by the caller.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Scan period in milliseconds. The watcher floors this to its minimum.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Parsable files larger than this are skipped entirely.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Log file path; `None` disables file logging.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Directory names excluded from watching, in addition to hidden ones.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_excluded_dirs() -> Vec<String> {
    vec!["node_modules".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            interval_ms: default_interval_ms(),
            max_file_size: default_max_file_size(),
            log_path: None,
            excluded_dirs: default_excluded_dirs(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval_ms, 500);
        assert_eq!(config.max_file_size, 1024 * 1024);
        assert_eq!(config.excluded_dirs, vec!["node_modules".to_string()]);
        assert!(config.log_path.is_none());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = SyncConfig::from_yaml("interval_ms: 100\n").unwrap();
        assert_eq!(config.interval_ms, 100);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.root, PathBuf::from("."));
    }

    #[test]
    fn yaml_round_trip() {
        let config = SyncConfig {
            interval_ms: 250,
            log_path: Some(PathBuf::from("sync.log")),
            ..SyncConfig::default()
        };
        let restored = SyncConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(restored.interval_ms, 250);
        assert_eq!(restored.log_path, Some(PathBuf::from("sync.log")));
    }
}
