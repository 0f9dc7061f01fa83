//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Agent address used when neither flag, environment nor config file sets one
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from `~/.config/dpa/config.json`, if present
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("dpa").join("config.json"))
    }

    /// Pick the API URL: explicit flag or env first, then the file, then the default
    pub fn resolve_api_url(&self, explicit: Option<String>) -> String {
        explicit
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();

        assert!(config.api_url.is_none());
        assert_eq!(config.resolve_api_url(None), DEFAULT_API_URL);
    }

    #[test]
    fn test_file_url_used_unless_overridden() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_url": "http://worker-1:8080"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.resolve_api_url(None), "http://worker-1:8080");
        assert_eq!(
            config.resolve_api_url(Some("http://worker-2:8080".to_string())),
            "http://worker-2:8080"
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
