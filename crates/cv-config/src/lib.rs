//! Conveyor Configuration
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherSettings,
    pub sqs: SqsSettings,
    pub shutdown: ShutdownSettings,
    pub routes: Vec<RouteSettings>,
}

/// Dispatcher sizing; unset values fall back to the dispatcher's route-based defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub queue_size: Option<usize>,
    pub workers: Option<usize>,
    pub empty_fetch_delay_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_size: None,
            workers: None,
            empty_fetch_delay_ms: 100,
        }
    }
}

impl DispatcherSettings {
    pub fn empty_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.empty_fetch_delay_ms)
    }
}

/// SQS client configuration shared by all routes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsSettings {
    pub region: String,
    /// Custom endpoint, e.g. LocalStack
    pub endpoint_url: Option<String>,
}

impl Default for SqsSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long a signalled shutdown may spend draining in-flight messages
    pub timeout_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ShutdownSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How a route turns raw message bodies into handler content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorKind {
    /// Body passed through as a string
    #[default]
    Raw,
    /// Body parsed as JSON
    Json,
    /// Body is an SNS notification envelope
    Sns,
}

/// One SQS-backed route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub name: String,
    pub queue_url: String,
    pub max_messages: u32,
    pub wait_time_seconds: u32,
    pub visibility_timeout: Option<u32>,
    pub backoff_multiplier: u32,
    pub backoff_limit: u32,
    /// Return an error when acknowledging a message SQS no longer knows about
    pub strict_acknowledgment: bool,
    pub translator: TranslatorKind,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            queue_url: String::new(),
            max_messages: 10,
            wait_time_seconds: 5,
            visibility_timeout: None,
            backoff_multiplier: 0,
            backoff_limit: 900,
            strict_acknowledgment: false,
            translator: TranslatorKind::Raw,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check the constraints the dispatcher relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::ValidationError("at least one route is required".to_string()));
        }

        if self.dispatcher.queue_size == Some(0) {
            return Err(ConfigError::ValidationError("dispatcher.queue_size must be positive".to_string()));
        }
        if self.dispatcher.workers == Some(0) {
            return Err(ConfigError::ValidationError("dispatcher.workers must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for (index, route) in self.routes.iter().enumerate() {
            if route.queue_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("routes[{index}].queue_url is empty")));
            }
            if !route.name.is_empty() && !names.insert(route.name.as_str()) {
                return Err(ConfigError::ValidationError(format!("duplicate route name: {}", route.name)));
            }
            if route.max_messages == 0 || route.max_messages > 10 {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{index}].max_messages must be between 1 and 10"
                )));
            }
            if route.wait_time_seconds > 20 {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{index}].wait_time_seconds must be at most 20"
                )));
            }
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Conveyor Configuration
# Environment variables (CONVEYOR_*) override these settings

[dispatcher]
# queue_size = 20       # default: routes x 10
# workers = 3           # default: max(routes, 3)
empty_fetch_delay_ms = 100

[sqs]
region = "us-east-1"
# endpoint_url = "http://localhost:4566"

[shutdown]
timeout_secs = 30

[[routes]]
name = "orders"
queue_url = "https://sqs.us-east-1.amazonaws.com/123456789012/orders"
max_messages = 10
wait_time_seconds = 5
backoff_multiplier = 30
backoff_limit = 900
translator = "json"   # raw, json, or sns
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_toml_parses_and_validates() {
        let config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.routes.len(), 1);
        let route = &config.routes[0];
        assert_eq!(route.name, "orders");
        assert_eq!(route.translator, TranslatorKind::Json);
        assert_eq!(route.backoff_multiplier, 30);
        assert_eq!(config.dispatcher.queue_size, None);
        assert_eq!(config.dispatcher.empty_fetch_delay(), Duration::from_millis(100));
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_route_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [[routes]]
            queue_url = "http://localhost:4566/000000000000/events"
            "#,
        )
        .unwrap();

        let route = &config.routes[0];
        assert!(route.name.is_empty());
        assert_eq!(route.max_messages, 10);
        assert_eq!(route.wait_time_seconds, 5);
        assert_eq!(route.translator, TranslatorKind::Raw);
        assert!(!route.strict_acknowledgment);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        assert!(AppConfig::default().validate().is_err());

        let mut config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        config.routes.push(config.routes[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(msg)) if msg.contains("duplicate")));

        let mut config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        config.dispatcher.workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        config.routes[0].queue_url = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        config.routes[0].max_messages = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conveyor.toml");
        std::fs::write(&path, AppConfig::example_toml()).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.routes[0].name, "orders");

        assert!(matches!(
            AppConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::ReadError(_))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            AppConfig::from_toml("[dispatcher\nworkers = 3"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
