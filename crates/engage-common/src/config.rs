//! Configuration for Engage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default organization for commands that do not name one
    pub organization_id: Option<Uuid>,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Companion REST API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Realtime change feed configuration
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Campaign monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Companion REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, without the trailing `/api`
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Session token sent as `Authorization: Bearer`
    pub bearer_token: Option<String>,

    /// Organization API key sent as `x-api-key`
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            bearer_token: None,
            api_key: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

/// Realtime change feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// NOTIFY channel the row triggers publish on. The triggers read it from
    /// the `engage.realtime_channel` database setting, so change both together.
    #[serde(default = "default_realtime_channel")]
    pub channel: String,

    /// Per-subscription event buffer
    #[serde(default = "default_realtime_buffer")]
    pub buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel: default_realtime_channel(),
            buffer: default_realtime_buffer(),
        }
    }
}

fn default_realtime_channel() -> String {
    "bulk_message_changes".to_string()
}

fn default_realtime_buffer() -> usize {
    256
}

/// Campaign monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Queue rows per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    50
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the first default file found, overlaid with
    /// `ENGAGE__SECTION__KEY` environment variables
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        let defaults = [
            PathBuf::from("./engage.toml"),
            PathBuf::from("/etc/engage/engage.toml"),
        ];

        let file = match explicit {
            Some(path) if !path.exists() => {
                return Err(crate::Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )))
            }
            Some(path) => Some(path.to_path_buf()),
            None => defaults.into_iter().find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            tracing::debug!(path = %path.display(), "Loading config file");
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ENGAGE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }

    /// Organization to act on: the explicit one, else the configured default
    pub fn organization(&self, explicit: Option<Uuid>) -> crate::Result<Uuid> {
        explicit.or(self.organization_id).ok_or_else(|| {
            crate::Error::Config(
                "No organization given and no organization_id configured".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.realtime.channel, "bulk_message_changes");
        assert_eq!(config.monitor.page_size, 50);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
organization_id = "6f1c1f7e-8a51-4d4a-9a8e-3c1f2b7d9e10"

[database]
url = "postgres://localhost/engage"

[api]
base_url = "https://api.example.com"
bearer_token = "token"

[monitor]
page_size = 25
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/engage")
        );
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.api.base_url, "https://api.example.com");
        assert_eq!(config.api.bearer_token.as_deref(), Some("token"));
        assert_eq!(config.monitor.page_size, 25);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_organization_resolution() {
        let mut config = Config::default();
        assert!(config.organization(None).is_err());

        let configured = Uuid::new_v4();
        config.organization_id = Some(configured);
        assert_eq!(config.organization(None).unwrap(), configured);

        let explicit = Uuid::new_v4();
        assert_eq!(config.organization(Some(explicit)).unwrap(), explicit);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/engage.toml"))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
