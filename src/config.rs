use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_MS};

const CONFIG_DIR: &str = ".gradebook";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where the service lives
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Durable session file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub dir: Option<String>,
}

/// JSONL activity log; on unless `enabled = false`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActivityConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.gradebook/config.local.toml) > project (.gradebook/config.toml) > user (~/.gradebook/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority where set)
    pub fn merge(&mut self, other: Config) {
        if other.api.base_url.is_some() {
            self.api.base_url = other.api.base_url;
        }
        if other.api.timeout_ms.is_some() {
            self.api.timeout_ms = other.api.timeout_ms;
        }
        if other.storage.path.is_some() {
            self.storage.path = other.storage.path;
        }
        if other.export.dir.is_some() {
            self.export.dir = other.export.dir;
        }
        if other.activity.enabled.is_some() {
            self.activity.enabled = other.activity.enabled;
        }
        if other.activity.path.is_some() {
            self.activity.path = other.activity.path;
        }
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// None when no home directory can be found and nothing is configured
    pub fn storage_path(&self) -> Option<PathBuf> {
        match &self.storage.path {
            Some(p) => Some(expand_home(p)),
            None => dirs::home_dir().map(|h| h.join(CONFIG_DIR).join("session.json")),
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export
            .dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn activity_path(&self) -> Option<PathBuf> {
        if !self.activity.enabled.unwrap_or(true) {
            return None;
        }
        match &self.activity.path {
            Some(p) => Some(expand_home(p)),
            None => dirs::home_dir().map(|h| h.join(CONFIG_DIR).join("activity.jsonl")),
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(url) = &self.api.base_url {
            let lower = url.to_lowercase();
            let scheme_ok = lower.starts_with("http://") || lower.starts_with("https://");
            let host_present = url
                .split_once("://")
                .map(|(_, rest)| !rest.is_empty() && !rest.starts_with('/'))
                .unwrap_or(false);
            if !scheme_ok || !host_present {
                errors.push(ValidationError {
                    field: "api.base_url".to_string(),
                    message: format!("Expected an http(s) URL, got '{}'", url),
                });
            }
        }

        if self.api.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.storage.path.as_deref() == Some("") {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// `~/x` resolves against the home directory
fn expand_home(p: &str) -> PathBuf {
    if let Some(rest) = p.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_url(), "http://localhost:8080/api");
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.export_dir(), PathBuf::from("."));
        assert!(config.activity_path().is_some() || dirs::home_dir().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://grades.example.edu/api"
timeout_ms = 5000

[export]
dir = "/tmp/reports"

[activity]
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_url(), "https://grades.example.edu/api");
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.export_dir(), PathBuf::from("/tmp/reports"));
        assert!(config.activity_path().is_none());
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_load_from_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbase_url = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let mut base = Config::default();
        base.api.base_url = Some("http://a/api".to_string());
        base.api.timeout_ms = Some(1000);
        base.export.dir = Some("out".to_string());

        let mut other = Config::default();
        other.api.timeout_ms = Some(2000);
        other.storage.path = Some("/tmp/s.json".to_string());

        base.merge(other);
        assert_eq!(base.base_url(), "http://a/api");
        assert_eq!(base.api.timeout_ms, Some(2000));
        assert_eq!(base.export.dir.as_deref(), Some("out"));
        assert_eq!(base.storage_path(), Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn test_validate_invalid_base_url() {
        let mut config = Config::default();
        config.api.base_url = Some("ftp://grades".to_string());
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.contains("base_url"));

        config.api.base_url = Some("http://".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = Config::default();
        config.api.base_url = Some("localhost:8080".to_string());
        config.api.timeout_ms = Some(0);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].to_string(), "[api.timeout_ms]: Must be greater than 0");
    }
}
