//! Server configuration management
//!
//! Handles loading configuration from TOML files, environment variables and
//! CLI arguments, in that increasing order of precedence.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use trial_store::EngineSettings;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number: {0}. Must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: pretty, json")]
    InvalidLogFormat(String),

    #[error("Invalid environment: {0}. Must be one of: development, staging, production")]
    InvalidEnvironment(String),

    #[error("Invalid storage backend: {0}. Must be one of: memory, postgres")]
    InvalidBackend(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("The postgres backend requires storage.database_url")]
    MissingDatabaseUrl,

    #[error("The memory backend is not permitted in production")]
    MemoryInProduction,

    #[error("Configuration file error: {0}")]
    FileError(String),
}

/// Log levels supported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

impl LogLevel {
    /// Convert log level to tracing filter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Environment types for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl Environment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// Process-local store, lost on restart
    #[default]
    Memory,
    /// PostgreSQL via a connection pool
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            _ => Err(ConfigError::InvalidBackend(s.to_string())),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Postgres => write!(f, "postgres"),
        }
    }
}

macro_rules! deserialize_via_from_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: serde::Deserializer<'de>,
                {
                    let s = String::deserialize(deserializer)?;
                    <$ty>::from_str(&s).map_err(serde::de::Error::custom)
                }
            }
        )*
    };
}

deserialize_via_from_str!(LogLevel, LogFormat, Environment, StorageBackend);

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to run against
    pub backend: StorageBackend,
    /// PostgreSQL connection string
    pub database_url: Option<String>,
    /// Pool size
    pub max_connections: u32,
    /// Apply bundled migrations at start-up
    pub run_migrations: bool,
    /// Trial metadata to load into the memory backend
    pub fixtures: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
            run_migrations: true,
            fixtures: None,
        }
    }
}

/// Server configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Log level
    pub log_level: LogLevel,
    /// Log output format
    pub log_format: LogFormat,
    /// Environment (development, staging, production)
    pub environment: Environment,
    /// Storage backend settings
    pub storage: StorageConfig,
    /// Engine limits
    pub randomisation: EngineSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: LogLevel::Info,
            log_format: LogFormat::Pretty,
            environment: Environment::Development,
            storage: StorageConfig::default(),
            randomisation: EngineSettings::default(),
        }
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

impl ServerConfig {
    /// Create a new ServerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))
    }

    /// Override fields from `TRIAL_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TRIAL_SERVER_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("TRIAL_SERVER_PORT") {
            self.port = parse_number("TRIAL_SERVER_PORT", &port)?;
        }
        if let Some(level) = lookup("TRIAL_LOG_LEVEL") {
            self.log_level = LogLevel::from_str(&level)?;
        }
        if let Some(format) = lookup("TRIAL_LOG_FORMAT") {
            self.log_format = LogFormat::from_str(&format)?;
        }
        if let Some(env) = lookup("TRIAL_ENV") {
            self.environment = Environment::from_str(&env)?;
        }
        if let Some(backend) = lookup("TRIAL_STORAGE_BACKEND") {
            self.storage.backend = StorageBackend::from_str(&backend)?;
        }
        if let Some(url) = lookup("TRIAL_DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Some(max) = lookup("TRIAL_DB_MAX_CONNECTIONS") {
            self.storage.max_connections = parse_number("TRIAL_DB_MAX_CONNECTIONS", &max)?;
        }
        if let Some(run) = lookup("TRIAL_RUN_MIGRATIONS") {
            self.storage.run_migrations = parse_bool("TRIAL_RUN_MIGRATIONS", &run)?;
        }
        if let Some(path) = lookup("TRIAL_FIXTURES") {
            self.storage.fixtures = Some(PathBuf::from(path));
        }
        if let Some(max) = lookup("TRIAL_MAX_TOTAL_SLOTS") {
            self.randomisation.max_total_slots = parse_number("TRIAL_MAX_TOTAL_SLOTS", &max)?;
        }
        if let Some(max) = lookup("TRIAL_PREVIEW_MAX_SLOTS") {
            self.randomisation.preview_max_slots = parse_number("TRIAL_PREVIEW_MAX_SLOTS", &max)?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        match self.storage.backend {
            StorageBackend::Memory if self.environment.is_production() => {
                return Err(ConfigError::MemoryInProduction);
            }
            StorageBackend::Postgres => {
                if self.storage.database_url.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::MissingDatabaseUrl);
                }
            }
            StorageBackend::Memory => {}
        }

        if self.storage.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "storage.max_connections",
                value: "0".to_string(),
            });
        }
        if self.randomisation.max_total_slots == 0 {
            return Err(ConfigError::InvalidValue {
                key: "randomisation.max_total_slots",
                value: "0".to_string(),
            });
        }
        if self.randomisation.preview_max_slots == 0 {
            return Err(ConfigError::InvalidValue {
                key: "randomisation.preview_max_slots",
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Merge with CLI arguments (CLI takes precedence)
    pub fn merge_with_cli(&mut self, cli: &CliArgs) -> Result<(), ConfigError> {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(log_level) = &cli.log_level {
            self.log_level = LogLevel::from_str(log_level)?;
        }
        if let Some(log_format) = &cli.log_format {
            self.log_format = LogFormat::from_str(log_format)?;
        }
        if let Some(backend) = &cli.backend {
            self.storage.backend = StorageBackend::from_str(backend)?;
        }
        if let Some(url) = &cli.database_url {
            self.storage.database_url = Some(url.clone());
        }
        Ok(())
    }
}

/// CLI arguments structure
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Config file path
    pub config_file: Option<PathBuf>,
    /// Host address override
    pub host: Option<String>,
    /// Port override
    pub port: Option<u16>,
    /// Log level override
    pub log_level: Option<String>,
    /// Log format override
    pub log_format: Option<String>,
    /// Storage backend override
    pub backend: Option<String>,
    /// Database URL override
    pub database_url: Option<String>,
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &CliArgs) -> Result<ServerConfig, ConfigError> {
    let mut config = match &cli.config_file {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    config.apply_env()?;
    config.merge_with_cli(cli)?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.randomisation.max_total_slots, 10_000);
        assert_eq!(config.randomisation.preview_max_slots, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("Warn").unwrap(), LogLevel::Warn);
        assert!(LogLevel::from_str("invalid").is_err());
    }

    #[test]
    fn test_environment_and_backend_parsing() {
        assert_eq!(Environment::from_str("prod").unwrap(), Environment::Production);
        assert_eq!(Environment::from_str("stage").unwrap(), Environment::Staging);
        assert!(Environment::from_str("invalid").is_err());

        assert_eq!(
            StorageBackend::from_str("PostgreSQL").unwrap(),
            StorageBackend::Postgres
        );
        assert!(StorageBackend::from_str("sqlite").is_err());
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_validate_port() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        config.port = 65535;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_refuses_memory_backend() {
        let config = ServerConfig {
            environment: Environment::Production,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MemoryInProduction)
        ));
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = ServerConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDatabaseUrl)
        ));

        config.storage.database_url = Some("postgres://localhost/trials".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env_with(env(&[
                ("TRIAL_SERVER_PORT", "9090"),
                ("TRIAL_LOG_FORMAT", "json"),
                ("TRIAL_STORAGE_BACKEND", "postgres"),
                ("TRIAL_DATABASE_URL", "postgres://db/trials"),
                ("TRIAL_RUN_MIGRATIONS", "false"),
                ("TRIAL_PREVIEW_MAX_SLOTS", "50"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.database_url.as_deref(), Some("postgres://db/trials"));
        assert!(!config.storage.run_migrations);
        assert_eq!(config.randomisation.preview_max_slots, 50);
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env_with(env(&[("TRIAL_MAX_TOTAL_SLOTS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRIAL_MAX_TOTAL_SLOTS"));
    }

    #[test]
    fn test_cli_args_merge() {
        let mut config = ServerConfig::default();
        let cli = CliArgs {
            host: Some("192.168.1.1".to_string()),
            port: Some(9000),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        config.merge_with_cli(&cli).unwrap();

        assert_eq!(config.host, "192.168.1.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 3000
            log_level = "debug"
            log_format = "json"
            environment = "production"

            [storage]
            backend = "postgres"
            database_url = "postgres://localhost/trials"
            max_connections = 20

            [randomisation]
            max_total_slots = 5000
        "#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.storage.max_connections, 20);
        assert!(config.storage.run_migrations);
        assert_eq!(config.randomisation.max_total_slots, 5000);
        assert_eq!(config.randomisation.preview_max_slots, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_deserialization() {
        let config: ServerConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidPort(0);
        assert!(err.to_string().contains("Invalid port"));

        let err = ConfigError::InvalidBackend("bad".to_string());
        assert!(err.to_string().contains("memory, postgres"));
    }
}
