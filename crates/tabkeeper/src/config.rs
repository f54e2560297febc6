use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::try_exists;

const DEFAULT_INTERVAL_MINUTES: u64 = 1;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_MAX_HIGHLIGHT_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub highlight: HighlightConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub keywords: Vec<String>,
    /// Documents larger than this are shown without highlighting.
    pub max_highlight_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reopen the files that were open when the last run ended.
    pub restore_workspace: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            max_highlight_bytes: DEFAULT_MAX_HIGHLIGHT_BYTES,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restore_workspace: true,
        }
    }
}

fn default_keywords() -> Vec<String> {
    lexcore::DEFAULT_KEYWORDS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl BackupConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Config {
    pub async fn load() -> Result<Self> {
        if let Some(config_path) = Self::config_path() {
            if try_exists(&config_path).await? {
                match tokio::fs::read_to_string(&config_path).await {
                    Ok(content) => {
                        if content.trim().is_empty() {
                            log::warn!("Config file is empty, creating new one");
                            let default_config = Self::default();
                            let _ = default_config.save().await;
                            return Ok(default_config);
                        }

                        match serde_json::from_str::<Self>(&content) {
                            Ok(mut config) => {
                                config.validate();
                                log::info!(
                                    "Successfully loaded config from: {}",
                                    config_path.display()
                                );
                                return Ok(config);
                            }
                            Err(json_err) => {
                                log::error!("Failed to parse config file: {}", json_err);

                                // Keep the broken file around for the user to inspect
                                let backup_path = config_path.with_extension("bak");
                                if let Err(e) = tokio::fs::copy(&config_path, &backup_path).await {
                                    log::warn!("Failed to backup broken config: {}", e);
                                } else {
                                    log::info!(
                                        "Backed up broken config to: {}",
                                        backup_path.display()
                                    );
                                }

                                let default_config = Self::default();
                                let _ = default_config.save().await;
                                return Ok(default_config);
                            }
                        }
                    }
                    Err(io_err) => {
                        log::error!("Failed to read config file: {}", io_err);
                    }
                }
            } else {
                log::info!("Config file does not exist, creating default");
            }
        }

        let default_config = Self::default();
        let _ = default_config.save().await;
        Ok(default_config)
    }

    pub async fn save(&self) -> Result<()> {
        let Some(config_path) = Self::config_path() else {
            return Ok(());
        };

        let mut config_to_save = self.clone();
        config_to_save.validate();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(&config_to_save).context("Failed to serialize config")?;
        tokio::fs::write(&config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        log::info!("Successfully saved config to: {}", config_path.display());
        Ok(())
    }

    /// Replace out-of-range values with defaults.
    pub fn validate(&mut self) {
        let mut has_issues = false;

        if self.backup.interval_minutes == 0 || self.backup.interval_minutes > 24 * 60 {
            log::warn!(
                "Invalid backup interval: {} minutes, using default",
                self.backup.interval_minutes
            );
            self.backup.interval_minutes = DEFAULT_INTERVAL_MINUTES;
            has_issues = true;
        }

        if self.backup.retention_days == 0 || self.backup.retention_days > 365 {
            log::warn!(
                "Invalid backup retention: {} days, using default",
                self.backup.retention_days
            );
            self.backup.retention_days = DEFAULT_RETENTION_DAYS;
            has_issues = true;
        }

        self.highlight.keywords.retain(|k| !k.trim().is_empty());
        if self.highlight.keywords.is_empty() {
            log::warn!("Empty keyword list, using default");
            self.highlight.keywords = default_keywords();
            has_issues = true;
        }

        if self.highlight.max_highlight_bytes == 0 {
            log::warn!("Invalid highlight limit, using default");
            self.highlight.max_highlight_bytes = DEFAULT_MAX_HIGHLIGHT_BYTES;
            has_issues = true;
        }

        if has_issues {
            log::info!("Configuration validation completed with corrections");
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TABKEEPER_CONFIG_PATH") {
            return Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("TABKEEPER_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join("config.json"));
        }

        ProjectDirs::from("com", "tabkeeper", "tabkeeper")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Where backups and the workspace file live.
    pub fn data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TABKEEPER_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let dirs = ProjectDirs::from("com", "tabkeeper", "tabkeeper")
            .context("Could not determine the project data directory")?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn config_test_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_config_path(path: &std::path::Path) -> (Option<String>, Option<String>) {
        let previous_dir = std::env::var("TABKEEPER_CONFIG_DIR").ok();
        let previous_path = std::env::var("TABKEEPER_CONFIG_PATH").ok();
        std::env::set_var("TABKEEPER_CONFIG_PATH", path);
        std::env::remove_var("TABKEEPER_CONFIG_DIR");
        (previous_dir, previous_path)
    }

    fn restore_config_env(previous: (Option<String>, Option<String>)) {
        match previous.0 {
            Some(value) => std::env::set_var("TABKEEPER_CONFIG_DIR", value),
            None => std::env::remove_var("TABKEEPER_CONFIG_DIR"),
        }

        match previous.1 {
            Some(value) => std::env::set_var("TABKEEPER_CONFIG_PATH", value),
            None => std::env::remove_var("TABKEEPER_CONFIG_PATH"),
        }
    }

    fn load_with_file(contents: Option<&str>) -> (Config, TempDir, PathBuf) {
        let _guard = config_test_lock().lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        if let Some(contents) = contents {
            std::fs::write(&path, contents).unwrap();
        }

        let previous = set_config_path(&path);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let config = runtime.block_on(Config::load()).unwrap();
        restore_config_env(previous);
        (config, temp_dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.backup.enabled);
        assert_eq!(config.backup.interval_minutes, 1);
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.backup.interval(), std::time::Duration::from_secs(60));
        assert!(config.highlight.keywords.iter().any(|k| k == "function"));
        assert_eq!(config.highlight.keywords.len(), 17);
        assert!(config.session.restore_workspace);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"backup\""));
        assert!(json.contains("\"highlight\""));
        assert!(json.contains("\"session\""));

        let config_from_json: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(
            config.backup.interval_minutes,
            config_from_json.backup.interval_minutes
        );
        assert_eq!(config.highlight.keywords, config_from_json.highlight.keywords);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let json = r#"{"backup": {"enabled": false, "interval_minutes": 5, "retention_days": 3}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.backup.enabled);
        assert_eq!(config.backup.interval_minutes, 5);
        assert_eq!(config.highlight.max_highlight_bytes, 512 * 1024);
    }

    #[test]
    fn test_partial_sections_keep_given_fields() {
        let config: Config =
            serde_json::from_str(r#"{"backup": {"interval_minutes": 5}, "highlight": {}}"#)
                .unwrap();
        assert!(config.backup.enabled);
        assert_eq!(config.backup.interval_minutes, 5);
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.highlight.keywords.len(), 17);
    }

    #[test]
    fn test_config_load_keeps_partial_file() {
        let (config, _dir, path) = load_with_file(Some(r#"{"backup": {"retention_days": 3}}"#));
        assert_eq!(config.backup.retention_days, 3);
        assert_eq!(config.backup.interval_minutes, 1);
        assert!(!path.with_extension("bak").exists());
    }

    #[test]
    fn test_validate_corrects_values() {
        let mut config = Config::default();
        config.backup.interval_minutes = 0;
        config.backup.retention_days = 1000;
        config.highlight.keywords = vec!["  ".to_string()];
        config.highlight.max_highlight_bytes = 0;

        config.validate();
        assert_eq!(config.backup.interval_minutes, 1);
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.highlight.keywords.len(), 17);
        assert_eq!(config.highlight.max_highlight_bytes, 512 * 1024);
    }

    #[test]
    fn test_config_load_creates_default() {
        let (config, _dir, path) = load_with_file(None);
        assert_eq!(config.backup.interval_minutes, 1);
        assert!(path.exists());
    }

    #[test]
    fn test_config_load_broken_file_falls_back() {
        let (config, _dir, path) = load_with_file(Some("{ not json"));
        assert!(config.backup.enabled);
        assert!(path.with_extension("bak").exists());
    }

    #[test]
    fn test_config_load_reads_values() {
        let json = r#"{
            "backup": {"enabled": true, "interval_minutes": 10, "retention_days": 2},
            "highlight": {"keywords": ["fn", "let"], "max_highlight_bytes": 100},
            "session": {"restore_workspace": false}
        }"#;
        let (config, _dir, _path) = load_with_file(Some(json));
        assert_eq!(config.backup.interval_minutes, 10);
        assert_eq!(config.highlight.keywords, vec!["fn", "let"]);
        assert!(!config.session.restore_workspace);
    }
}
