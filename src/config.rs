//! Pipeline configuration from environment-style key/value pairs.
//!
//! Configuration is resolved once, into explicit values handed to the
//! extractor, loader and viewer constructors. Nothing below the binary reads
//! the process environment.

use crate::dag::RetryPolicy;
use crate::extract::ExtractorConfig;
use crate::load::{is_valid_identifier, DEFAULT_TABLE_NAME};
use crate::server::ServerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database connection settings for the loader and viewer.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database host (default: "localhost")
    pub host: String,
    /// Database port (default: 5432)
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Database name. The SQLite backend treats it as the database file path.
    pub database: String,
    /// Target table (default: "user_campaign_summary")
    pub table_name: String,
}

impl DatabaseConfig {
    /// Path of the SQLite database file.
    pub fn database_path(&self) -> &Path {
        Path::new(&self.database)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            database: "marketing.db".to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

// Never print the password.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl std::fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(
            f,
            "{}:{}/{} (table {})",
            self.host, self.port, self.database, self.table_name
        )
    }
}

/// Locations of the two extractor inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Game-event file path or URL (default: "data/game_events.csv")
    pub game_events: String,
    /// Campaign-click file path or URL (default: "data/campaigns.csv")
    pub campaigns: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            game_events: "data/game_events.csv".to_string(),
            campaigns: "data/campaigns.csv".to_string(),
        }
    }
}

/// Settings of the remote fetch side path.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Endpoint fetched by the `fetch` command
    pub endpoint: Option<String>,
    /// Directory receiving fetched snapshots (default: "data/raw")
    pub landing_dir: PathBuf,
    /// Region of the remote trigger (default: "us-west-2")
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            endpoint: None,
            landing_dir: PathBuf::from("data/raw"),
            region: "us-west-2".to_string(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("landing_dir", &self.landing_dir)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub sources: SourcesConfig,
    pub extractor: ExtractorConfig,
    pub remote: RemoteConfig,
    /// Per-task retry policy of the task graph
    pub retry: RetryPolicy,
    /// Bind address of the viewer
    pub viewer_host: String,
    pub viewer_port: u16,
}

impl PipelineConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a key lookup.
    ///
    /// Unset and empty keys take their defaults.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for unparseable numbers and booleans
    /// or a table name that is not a plain SQL identifier.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = PipelineConfig::default();

        let table_name = get("TABLE_NAME").unwrap_or(defaults.database.table_name);
        if !is_valid_identifier(&table_name) {
            return Err(ConfigError::InvalidValue {
                key: "TABLE_NAME",
                value: table_name,
                reason: "must be a plain SQL identifier".to_string(),
            });
        }

        let database = DatabaseConfig {
            host: get("DB_HOST").unwrap_or(defaults.database.host),
            port: parse_or(get("DB_PORT"), "DB_PORT", defaults.database.port)?,
            user: get("DB_USER"),
            password: get("DB_PASSWORD"),
            database: get("DB_NAME").unwrap_or(defaults.database.database),
            table_name,
        };

        let sources = SourcesConfig {
            game_events: get("GAME_EVENTS_SOURCE").unwrap_or(defaults.sources.game_events),
            campaigns: get("CAMPAIGNS_SOURCE").unwrap_or(defaults.sources.campaigns),
        };

        let extractor = ExtractorConfig {
            strict: parse_bool_or(get("EXTRACT_STRICT"), "EXTRACT_STRICT", defaults.extractor.strict)?,
            timeout_seconds: parse_or(
                get("EXTRACT_TIMEOUT_SECONDS"),
                "EXTRACT_TIMEOUT_SECONDS",
                defaults.extractor.timeout_seconds,
            )?,
        };

        let remote = RemoteConfig {
            endpoint: get("FETCH_ENDPOINT"),
            landing_dir: get("LANDING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.remote.landing_dir),
            region: get("AWS_DEFAULT_REGION").unwrap_or(defaults.remote.region),
            access_key_id: get("AWS_ACCESS_KEY_ID"),
            secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
        };

        let retry = RetryPolicy {
            retries: parse_or(get("TASK_RETRIES"), "TASK_RETRIES", defaults.retry.retries)?,
            delay: Duration::from_secs(parse_or(
                get("TASK_RETRY_DELAY_SECONDS"),
                "TASK_RETRY_DELAY_SECONDS",
                defaults.retry.delay.as_secs(),
            )?),
        };

        Ok(PipelineConfig {
            database,
            sources,
            extractor,
            remote,
            retry,
            viewer_host: get("VIEWER_HOST").unwrap_or(defaults.viewer_host),
            viewer_port: parse_or(get("VIEWER_PORT"), "VIEWER_PORT", defaults.viewer_port)?,
        })
    }

    /// Viewer server settings derived from this configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.viewer_host.clone(),
            port: self.viewer_port,
            database_path: self.database.database.clone(),
            table_name: self.database.table_name.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        PipelineConfig {
            database: DatabaseConfig::default(),
            sources: SourcesConfig::default(),
            extractor: ExtractorConfig::default(),
            remote: RemoteConfig::default(),
            retry: RetryPolicy::default(),
            viewer_host: server.host,
            viewer_port: server.port,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn parse_bool_or(value: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let lowered = value.as_ref().map(|v| v.to_ascii_lowercase());
    match lowered.as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            key,
            value: value.unwrap_or_default(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A key holds a value that cannot be used
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "Invalid value {:?} for {}: {}", value, key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.table_name, "user_campaign_summary");
        assert_eq!(config.database.database_path(), Path::new("marketing.db"));
        assert_eq!(config.remote.region, "us-west-2");
        assert_eq!(config.retry.retries, 1);
        assert_eq!(config.retry.delay, Duration::from_secs(300));
        assert!(!config.extractor.strict);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_recognized_options() {
        let config = config_from(&[
            ("DB_HOST", "pgdb"),
            ("DB_PORT", "6543"),
            ("DB_USER", "etl"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "/tmp/marketing.db"),
            ("TABLE_NAME", "summary_v2"),
            ("GAME_EVENTS_SOURCE", "data/game_events.json"),
            ("EXTRACT_STRICT", "true"),
            ("AWS_DEFAULT_REGION", "eu-central-1"),
            ("TASK_RETRY_DELAY_SECONDS", "5"),
        ])
        .unwrap();

        assert_eq!(config.database.host, "pgdb");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.user.as_deref(), Some("etl"));
        assert_eq!(config.database.table_name, "summary_v2");
        assert_eq!(config.sources.game_events, "data/game_events.json");
        assert_eq!(config.sources.campaigns, "data/campaigns.csv");
        assert!(config.extractor.strict);
        assert_eq!(config.remote.region, "eu-central-1");
        assert_eq!(config.retry.delay, Duration::from_secs(5));
        assert_eq!(config.server_config().table_name, "summary_v2");
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("DB_PORT", "  "), ("TABLE_NAME", "")]).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.table_name, "user_campaign_summary");
    }

    #[test]
    fn test_invalid_port() {
        let err = config_from(&[("DB_PORT", "http")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "DB_PORT"),
        }
    }

    #[test]
    fn test_invalid_table_name() {
        assert!(config_from(&[("TABLE_NAME", "summary; DROP TABLE users")]).is_err());
    }

    #[test]
    fn test_invalid_boolean() {
        assert!(config_from(&[("EXTRACT_STRICT", "maybe")]).is_err());
    }

    #[test]
    fn test_secrets_redacted() {
        let config = config_from(&[("DB_PASSWORD", "hunter2"), ("AWS_SECRET_ACCESS_KEY", "abc123")]).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("abc123"));
        assert!(!config.database.to_string().contains("hunter2"));
    }
}
