//! Process settings for the scheduler binary.
//!
//! Loads configuration from environment variables with deployment defaults.
//! A `.env` file is honoured when present.

use crate::scheduler::SchedulerConfig;
use calendar_postgres::PostgresSettings;
use calendar_redpanda::DEFAULT_TOPIC;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default `tracing` filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "calendar_scheduler=info,calendar_postgres=info";

/// Invalid process settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be used.
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Everything the scheduler binary needs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database connection
    pub postgres: PostgresSettings,
    /// Comma-separated Kafka-compatible brokers
    pub redpanda_brokers: String,
    /// Destination topic for reminders
    pub alert_topic: String,
    /// Loop tuning
    pub scheduler: SchedulerConfig,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Settings {
    /// Load from the process environment (after `.env`, if any).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable numbers or booleans,
    /// or a `SCHEDULE_PERIOD_MINUTES` of zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let defaults = PostgresSettings::default();
        let postgres = PostgresSettings {
            host: text("POSTGRES_HOST", &defaults.host),
            port: parse(&lookup, "POSTGRES_PORT", defaults.port)?,
            user: text("POSTGRES_USER", &defaults.user),
            password: text("POSTGRES_PASSWORD", &defaults.password),
            database: text("POSTGRES_DB", &defaults.database),
            max_connections: parse(&lookup, "POSTGRES_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: parse(&lookup, "POSTGRES_MIN_CONNECTIONS", defaults.min_connections)?,
            ..defaults
        };

        let minutes: u64 = parse(&lookup, "SCHEDULE_PERIOD_MINUTES", 1)?;
        if minutes == 0 {
            return Err(ConfigError::Invalid {
                name: "SCHEDULE_PERIOD_MINUTES",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let scheduler = SchedulerConfig {
            resolve_owner_email: parse_flag(&lookup, "RESOLVE_OWNER_EMAIL", true)?,
            ..SchedulerConfig::from_minutes(minutes)
        };

        Ok(Self {
            postgres,
            redpanda_brokers: text("REDPANDA_BROKERS", "localhost:9092"),
            alert_topic: text("ALERT_TOPIC", DEFAULT_TOPIC),
            scheduler,
            log_filter: text("RUST_LOG", DEFAULT_LOG_FILTER),
        })
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.postgres.host, "localhost");
        assert_eq!(settings.postgres.port, 5432);
        assert_eq!(settings.postgres.max_connections, 25);
        assert_eq!(settings.redpanda_brokers, "localhost:9092");
        assert_eq!(settings.alert_topic, DEFAULT_TOPIC);
        assert_eq!(settings.scheduler.period, Duration::from_secs(60));
        assert!(settings.scheduler.resolve_owner_email);
        assert_eq!(settings.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn variables_override_defaults() {
        let settings = settings(&[
            ("POSTGRES_HOST", "db"),
            ("POSTGRES_PORT", "6432"),
            ("POSTGRES_DB", "cal"),
            ("POSTGRES_MAX_CONNECTIONS", "8"),
            ("SCHEDULE_PERIOD_MINUTES", "15"),
            ("RESOLVE_OWNER_EMAIL", "off"),
            ("ALERT_TOPIC", "reminders"),
        ])
        .unwrap();

        assert_eq!(settings.postgres.host, "db");
        assert_eq!(settings.postgres.port, 6432);
        assert_eq!(settings.postgres.database, "cal");
        assert_eq!(settings.postgres.max_connections, 8);
        assert_eq!(settings.postgres.min_connections, 5);
        assert_eq!(settings.scheduler.period, Duration::from_secs(900));
        assert!(!settings.scheduler.resolve_owner_email);
        assert_eq!(settings.alert_topic, "reminders");
    }

    #[test]
    fn zero_period_is_rejected() {
        let err = settings(&[("SCHEDULE_PERIOD_MINUTES", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "SCHEDULE_PERIOD_MINUTES", .. }
        ));
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let err = settings(&[("POSTGRES_PORT", "five")]).unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PORT"));

        let err = settings(&[("RESOLVE_OWNER_EMAIL", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));
    }
}
