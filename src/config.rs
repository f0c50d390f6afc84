//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Dialect name, e.g. `postgresql`. A `+driver` suffix is stripped on load.
    pub dialect: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    /// Echo every statement issued through the sync bridge
    pub echo: bool,
    pub use_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: "postgresql".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            echo: false,
            use_tls: false,
        }
    }
}

/// Migration tool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    /// Location of the migration tool's configuration file
    pub config_path: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("migrations.toml"),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_source<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DatabaseConfig::default();

        let max_pool_size =
            parse_var(&var, "DB_MAX_CONNECTIONS")?.unwrap_or(defaults.max_pool_size);
        let echo = parse_bool(&var, "DB_ECHO")?.unwrap_or(false);
        let sslmode_require = var("DB_SSLMODE").is_some_and(|mode| mode == "require");

        // Try to load DATABASE_URL first (modern format), fall back to individual vars
        let mut database = if let Some(database_url) = var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            DatabaseConfig {
                dialect: var("DB_DIALECT")
                    .map(|d| normalize_dialect(&d))
                    .unwrap_or_else(|| defaults.dialect.clone()),
                host: var("DB_HOST").unwrap_or_else(|| defaults.host.clone()),
                port: parse_var(&var, "DB_PORT")?.unwrap_or(defaults.port),
                user: var("DB_USER").unwrap_or_else(|| defaults.user.clone()),
                password: var("DB_PASSWORD").unwrap_or_default(),
                database: var("DB_NAME")
                    .ok_or_else(|| ConfigError::MissingVar("DB_NAME".to_string()))?,
                ..DatabaseConfig::default()
            }
        };
        database.max_pool_size = max_pool_size;
        database.echo = echo;
        database.use_tls |= sslmode_require;

        let migrations = MigrationsConfig {
            config_path: var("MIGRATIONS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| MigrationsConfig::default().config_path),
        };

        Ok(Self { database, migrations })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let user = if parsed.username().is_empty() {
            "postgres".to_string()
        } else {
            parsed.username().to_string()
        };

        let use_tls = parsed
            .query_pairs()
            .any(|(key, value)| key == "sslmode" && value == "require");

        Ok(DatabaseConfig {
            dialect: normalize_dialect(parsed.scheme()),
            host,
            port: parsed.port().unwrap_or(5432),
            user,
            password: parsed.password().unwrap_or_default().to_string(),
            database,
            use_tls,
            ..DatabaseConfig::default()
        })
    }
}

/// `postgresql+asyncpg` -> `postgresql`, `postgres` -> `postgresql`
fn normalize_dialect(raw: &str) -> String {
    let name = raw.split('+').next().unwrap_or(raw).trim().to_ascii_lowercase();
    match name.as_str() {
        "postgres" => "postgresql".to_string(),
        _ => name,
    }
}

fn parse_var<F, T>(var: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}")))
        })
        .transpose()
}

fn parse_bool<F>(var: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!("{key}={raw}"))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_source(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dialect, "postgresql");
    }

    #[test]
    fn test_parse_database_url_with_driver_suffix() {
        let url = "postgresql+asyncpg://app:secret@db:5433/orders";
        let settings = settings_from(&[("DATABASE_URL", url)]).unwrap();

        assert_eq!(settings.database.dialect, "postgresql");
        assert_eq!(settings.database.host, "db");
        assert_eq!(settings.database.port, 5433);
        assert_eq!(settings.database.user, "app");
        assert_eq!(settings.database.password, "secret");
        assert_eq!(settings.database.database, "orders");
        assert!(!settings.database.use_tls);
    }

    #[test]
    fn test_parse_database_url_sslmode() {
        let url = "postgres://app@db/orders?sslmode=require";
        let settings = settings_from(&[("DATABASE_URL", url)]).unwrap();
        assert!(settings.database.use_tls);
        assert_eq!(settings.database.port, 5432);
    }

    #[test]
    fn test_missing_database_name_in_url() {
        let result = settings_from(&[("DATABASE_URL", "postgres://app:secret@db/")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_individual_vars_fallback() {
        let settings = settings_from(&[
            ("DB_DIALECT", "MySQL+aiomysql"),
            ("DB_HOST", "mysql.local"),
            ("DB_PORT", "3306"),
            ("DB_USER", "root"),
            ("DB_NAME", "shop"),
            ("DB_ECHO", "true"),
            ("MIGRATIONS_CONFIG", "/etc/app/migrations.toml"),
        ])
        .unwrap();

        assert_eq!(settings.database.dialect, "mysql");
        assert_eq!(settings.database.port, 3306);
        assert!(settings.database.echo);
        assert_eq!(settings.migrations.config_path, PathBuf::from("/etc/app/migrations.toml"));
    }

    #[test]
    fn test_missing_db_name() {
        let result = settings_from(&[("DB_HOST", "localhost")]);
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "DB_NAME"));
    }

    #[test]
    fn test_invalid_port() {
        let result = settings_from(&[("DB_NAME", "shop"), ("DB_PORT", "not-a-port")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
