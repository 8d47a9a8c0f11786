//! Service configuration, read from the environment (and `.env` in dev).

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8084;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_SUBJECT_PREFIX: &str = "catalog";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Without it the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub subject_prefix: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive number, got `{value}`")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Ok(Self {
            port: parse(&get, "PORT", DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            nats_url: get("NATS_URL"),
            subject_prefix: get("CATALOG_SUBJECT_PREFIX").unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string()),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse<T: std::str::FromStr + PartialEq + Default>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => match value.parse::<T>() {
            Ok(parsed) if parsed != T::default() => Ok(parsed),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.subject_prefix, "catalog");
        assert_eq!(config.listen_addr(), "0.0.0.0:8084");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "postgres://pos@localhost/pos"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("NATS_URL", "nats://localhost:4222"),
            ("CATALOG_SUBJECT_PREFIX", "shop1"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://pos@localhost/pos"));
        assert_eq!(config.database_max_connections, 4);
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
        assert_eq!(config.subject_prefix, "shop1");
    }

    #[test]
    fn test_blank_values_are_unset() {
        assert_eq!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn test_bad_numbers() {
        assert_eq!(
            config(&[("PORT", "http")]),
            Err(ConfigError::Invalid { key: "PORT", value: "http".into() })
        );
        assert!(config(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
    }
}
