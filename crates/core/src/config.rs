//! # Engine Configuration
//!
//! Persisted at `.leadflow/config.json`. Missing keys take their defaults, so
//! an empty object is a valid file. `LEADFLOW_API_URL` and
//! `LEADFLOW_API_TOKEN` override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::db::DB_FILE;
use crate::state::io::get_runtime_path;
use crate::transition::TransitionSettings;

/// Config file name inside the runtime directory
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the backend that owns leads and stage entities
    pub api_base_url: String,
    /// Bearer token. Never written to disk.
    #[serde(skip)]
    pub api_token: Option<String>,
    pub gateway_timeout_secs: u64,
    /// Extra attempts for transient `update` failures
    pub update_retries: u32,
    pub retry_backoff_ms: u64,
    pub event_capacity: usize,
    /// Defaults to `<runtime>/leadflow.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            gateway_timeout_secs: 15,
            update_retries: 0,
            retry_backoff_ms: 250,
            event_capacity: 100,
            db_path: None,
        }
    }
}

impl EngineConfig {
    pub fn default_path() -> PathBuf {
        get_runtime_path().join(CONFIG_FILE)
    }

    /// Load from the runtime directory, then apply env overrides
    pub async fn load() -> Result<Self> {
        let config = Self::load_from(Self::default_path()).await?;
        Ok(config.apply_env())
    }

    /// Load from `path`; a missing file yields the defaults
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::metadata(path).await.is_err() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config: {:?}", path))
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(Self::default_path()).await
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config: {:?}", path))
    }

    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LEADFLOW_*` overrides from `lookup`. Blank values are ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = get("LEADFLOW_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = get("LEADFLOW_API_TOKEN") {
            self.api_token = Some(token);
        }
        self
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs.max(1))
    }

    pub fn transition_settings(&self) -> TransitionSettings {
        TransitionSettings {
            gateway_timeout: self.gateway_timeout(),
            update_retries: self.update_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            event_capacity: self.event_capacity,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| get_runtime_path().join(DB_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_from(dir.path().join("config.json"))
            .await
            .unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.transition_settings().gateway_timeout, Duration::from_secs(15));
        assert_eq!(config.transition_settings().update_retries, 0);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "update_retries": 2, "api_base_url": "https://crm.example.com/api" }"#)
            .await
            .unwrap();

        let config = EngineConfig::load_from(&path).await.unwrap();
        assert_eq!(config.update_retries, 2);
        assert_eq!(config.api_base_url, "https://crm.example.com/api");
        assert_eq!(config.gateway_timeout_secs, 15);
        assert_eq!(config.event_capacity, 100);
    }

    #[tokio::test]
    async fn test_save_never_writes_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = EngineConfig {
            api_token: Some("secret".to_string()),
            db_path: Some(dir.path().join("cache.db")),
            ..EngineConfig::default()
        };
        config.save_to(&path).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("secret"));

        let loaded = EngineConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.api_token, None);
        assert_eq!(loaded.db_path(), dir.path().join("cache.db"));
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(EngineConfig::load_from(&path).await.is_err());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default().apply_overrides(|key| match key {
            "LEADFLOW_API_URL" => Some("https://staging.example.com".to_string()),
            "LEADFLOW_API_TOKEN" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://staging.example.com");
        assert_eq!(config.api_token, None);
    }
}
