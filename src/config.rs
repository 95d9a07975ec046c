use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::event_log::EventLogConfig;
use crate::tasks::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Process settings read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; in-memory storage when unset
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub environment: String,
    pub schema_version: String,
    pub poll_interval: Duration,
    pub history_limit: usize,
    pub auto_recover: bool,
    /// Agent ids the driver registers at startup
    pub agents: Vec<String>,
}

impl Config {
    /// Reads the configuration from process environment variables
    ///
    /// Call `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; missing keys use defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let defaults = EventLogConfig::default();

        let database_url = lookup("DATABASE_URL");
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set, using in-memory event storage");
        }

        let agents = lookup("LEDGER_AGENTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            database_max_connections: parse_non_zero(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            environment: parse(&lookup, "LEDGER_ENVIRONMENT", defaults.environment)?,
            schema_version: parse(&lookup, "LEDGER_SCHEMA_VERSION", defaults.schema_version)?,
            poll_interval: Duration::from_millis(parse_non_zero(&lookup, "LEDGER_POLL_INTERVAL_MS", 1000)?),
            history_limit: parse(&lookup, "LEDGER_HISTORY_LIMIT", defaults.history_limit)?,
            auto_recover: parse(&lookup, "LEDGER_AUTO_RECOVER", true)?,
            agents,
        })
    }

    pub fn event_log_config(&self) -> EventLogConfig {
        EventLogConfig {
            environment: self.environment.clone(),
            schema_version: self.schema_version.clone(),
            history_limit: self.history_limit,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            auto_recover: self.auto_recover,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> ConfigResult<T> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        None => {
            tracing::debug!("{} not set, using default", key);
            Ok(default)
        }
    }
}

/// Like `parse`, but zero is rejected
fn parse_non_zero<T: FromStr + Default + PartialEq>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> ConfigResult<T> {
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            value: "0".to_string(),
        });
    }
    Ok(value)
}
