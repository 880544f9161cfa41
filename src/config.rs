//! Application configuration
//!
//! Defaults, then `config.yaml`, then the `.env` file, then the process
//! environment. Later sources win.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATABASE_FILE_ENV: &str = "DATABASE_FILE";
pub const DEFAULT_DATABASE_FILE: &str = "library.db";
const CONFIG_FILE_NAME: &str = "config.yaml";
const CONFIG_DIR_NAME: &str = "media-library";

/// How each connection is opened and tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub create_if_missing: bool,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub foreign_keys: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_file: PathBuf,
    pub connection: ConnectionOptions,
    pub backup_dir: Option<PathBuf>,
    pub log_retention_days: i64,
    pub notification_retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from(DEFAULT_DATABASE_FILE),
            connection: ConnectionOptions::default(),
            backup_dir: None,
            log_retention_days: 30,
            notification_retention_days: 7,
        }
    }
}

impl AppConfig {
    /// Load configuration for a project rooted at `project_dir`.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = match find_config_file(project_dir) {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Self::default(),
        };

        if let Some(file) = load_env_value(project_dir, DATABASE_FILE_ENV) {
            config.database_file = PathBuf::from(file);
        }
        if let Ok(file) = std::env::var(DATABASE_FILE_ENV) {
            if !file.trim().is_empty() {
                config.database_file = PathBuf::from(file.trim());
            }
        }

        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Directory backups are written to: the configured one, or the
    /// database file's own directory.
    pub fn backup_dir(&self) -> PathBuf {
        if let Some(dir) = &self.backup_dir {
            return dir.clone();
        }
        match self.database_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn find_config_file(project_dir: &Path) -> Option<PathBuf> {
    let local = project_dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

/// Load a value from the .env file by key name
pub fn load_env_value(project_dir: &Path, key: &str) -> Option<String> {
    let env_path = project_dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(&env_path).ok()?;
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(&prefix))
        .map(|value| value.trim().trim_matches('"').trim_matches('\''))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_env_value_strips_quotes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# comment\nOTHER=1\nDATABASE_FILE=\"media.db\"\n",
        )
        .unwrap();
        assert_eq!(
            load_env_value(dir.path(), "DATABASE_FILE"),
            Some("media.db".to_string())
        );
        assert_eq!(load_env_value(dir.path(), "MISSING"), None);
    }

    #[test]
    fn test_load_env_value_skips_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "DATABASE_FILE=''\n").unwrap();
        assert_eq!(load_env_value(dir.path(), "DATABASE_FILE"), None);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "database_file: /srv/media/library.db\nconnection:\n  busy_timeout_ms: 250\n",
        )
        .unwrap();

        let config = AppConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.database_file, PathBuf::from("/srv/media/library.db"));
        assert_eq!(config.connection.busy_timeout_ms, 250);
        assert_eq!(config.connection.journal_mode, "WAL");
        assert_eq!(config.log_retention_days, 30);
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/media"));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "connection: [not, a, map]\n").unwrap();
        assert!(AppConfig::from_yaml_file(&path).is_err());
    }

    #[test]
    fn test_backup_dir_for_bare_file_name() {
        let config = AppConfig::default();
        assert_eq!(config.backup_dir(), PathBuf::from("."));
    }
}
