use crate::infra::diff::DiffOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget for one line diff.
    pub diff_timeout_ms: u64,
    /// Unchanged lines kept around each change; negative shows everything.
    pub context_lines: i32,
    /// Number of emitted events retained for diagnostics.
    pub event_history_limit: usize,
    /// Locks older than this are force-released. Unset means never.
    pub lock_timeout_secs: Option<u64>,
    /// Combined input size above which a diff is not attempted.
    pub max_diff_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            diff_timeout_ms: 5_000,
            context_lines: 3,
            event_history_limit: 100,
            lock_timeout_secs: None,
            max_diff_bytes: None,
        }
    }
}

impl EngineConfig {
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            timeout: Duration::from_millis(self.diff_timeout_ms),
            max_bytes: self.max_diff_bytes,
        }
    }

    /// Out-of-range values are treated as unset.
    pub fn lock_timeout(&self) -> Option<chrono::TimeDelta> {
        self.lock_timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::TimeDelta::try_seconds)
    }
}

pub fn load_config() -> EngineConfig {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &std::path::Path) -> EngineConfig {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return EngineConfig::default();
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), err);
            EngineConfig::default()
        }
    }
}

pub fn save_config_to(path: &std::path::Path, config: &EngineConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(config).unwrap_or_default();
    std::fs::write(path, contents)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SNAPDIFF_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    app_data_dir().join("config.toml")
}

fn app_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SNAPDIFF_DATA_HOME") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("snapdiff");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("snapdiff");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("snapdiff");
        }
        if let Some(home) = home::home_dir() {
            return home.join(".config").join("snapdiff");
        }
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".snapdiff")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.toml"));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.diff_options().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = EngineConfig {
            context_lines: 5,
            lock_timeout_secs: Some(30),
            ..EngineConfig::default()
        };
        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path), config);

        std::fs::write(&path, "context_lines = -1\n").unwrap();
        let partial = load_config_from(&path);
        assert_eq!(partial.context_lines, -1);
        assert_eq!(partial.event_history_limit, 100);
    }

    #[test]
    fn test_lock_timeout_ignores_out_of_range_values() {
        let mut config = EngineConfig::default();
        assert_eq!(config.lock_timeout(), None);

        config.lock_timeout_secs = Some(30);
        assert_eq!(config.lock_timeout(), Some(chrono::TimeDelta::seconds(30)));

        config.lock_timeout_secs = Some(i64::MAX as u64);
        assert_eq!(config.lock_timeout(), None);
        config.lock_timeout_secs = Some(u64::MAX);
        assert_eq!(config.lock_timeout(), None);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "context_lines = \"lots\"").unwrap();
        assert_eq!(load_config_from(&path), EngineConfig::default());
    }
}
