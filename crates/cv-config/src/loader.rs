//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "conveyor.toml",
    "config.toml",
    "./config/conveyor.toml",
    "/etc/conveyor/conveyor.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides, then validate
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file()? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        } else {
            warn!("No configuration file found, using defaults");
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use.
    ///
    /// An explicitly requested file that does not exist is an error; the
    /// standard search paths are optional.
    fn find_config_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| env::var("CONVEYOR_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        Ok(CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `CONVEYOR_*` overrides read through `lookup`
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Dispatcher
    if let Some(size) = lookup("CONVEYOR_QUEUE_SIZE").and_then(|v| v.parse().ok()) {
        config.dispatcher.queue_size = Some(size);
    }
    if let Some(workers) = lookup("CONVEYOR_WORKERS").and_then(|v| v.parse().ok()) {
        config.dispatcher.workers = Some(workers);
    }
    if let Some(delay) = lookup("CONVEYOR_EMPTY_FETCH_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.dispatcher.empty_fetch_delay_ms = delay;
    }

    // SQS
    if let Some(region) = lookup("CONVEYOR_SQS_REGION") {
        config.sqs.region = region;
    }
    if let Some(endpoint) = lookup("CONVEYOR_SQS_ENDPOINT_URL") {
        config.sqs.endpoint_url = Some(endpoint).filter(|e| !e.is_empty());
    }

    // Shutdown
    if let Some(timeout) = lookup("CONVEYOR_SHUTDOWN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.shutdown.timeout_secs = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONVEYOR_QUEUE_SIZE", "64"),
            ("CONVEYOR_WORKERS", "8"),
            ("CONVEYOR_EMPTY_FETCH_DELAY_MS", "250"),
            ("CONVEYOR_SQS_REGION", "eu-west-1"),
            ("CONVEYOR_SQS_ENDPOINT_URL", "http://localhost:4566"),
            ("CONVEYOR_SHUTDOWN_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.dispatcher.queue_size, Some(64));
        assert_eq!(config.dispatcher.workers, Some(8));
        assert_eq!(config.dispatcher.empty_fetch_delay_ms, 250);
        assert_eq!(config.sqs.region, "eu-west-1");
        assert_eq!(config.sqs.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.shutdown.timeout_secs, 5);
    }

    #[test]
    fn test_unparseable_overrides_are_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, |key| match key {
            "CONVEYOR_WORKERS" => Some("many".to_string()),
            "CONVEYOR_SQS_ENDPOINT_URL" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.dispatcher.workers, None);
        assert_eq!(config.sqs.endpoint_url, None);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor.toml");
        std::fs::write(&path, AppConfig::example_toml()).unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::with_path(dir.path().join("nope.toml")).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("not found")));
    }
}
