//! Connection settings for the `PostgreSQL` backend.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::fmt;
use std::time::Duration;

/// Where the database lives and how the pool behaves.
///
/// # Default Values
///
/// - `max_connections`: 25
/// - `min_connections`: 5
/// - `idle_timeout`: 30 minutes
/// - `max_lifetime`: 60 minutes
/// - `acquire_timeout`: 30 seconds
/// - `connect_retries`: 5, `retry_pause`: 1 second
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login role
    pub user: String,
    /// Login password. Never logged.
    pub password: String,
    /// Database name
    pub database: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// Close connections idle for longer than this
    pub idle_timeout: Duration,
    /// Recycle connections older than this
    pub max_lifetime: Duration,
    /// Give up waiting for a free connection after this
    pub acquire_timeout: Duration,
    /// Startup ping retries after the first attempt
    pub connect_retries: usize,
    /// Pause between startup pings
    pub retry_pause: Duration,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "calendar".to_string(),
            max_connections: 25,
            min_connections: 5,
            idle_timeout: Duration::from_secs(30 * 60),
            max_lifetime: Duration::from_secs(60 * 60),
            acquire_timeout: Duration::from_secs(30),
            connect_retries: 5,
            retry_pause: Duration::from_secs(1),
        }
    }
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("connect_retries", &self.connect_retries)
            .field("retry_pause", &self.retry_pause)
            .finish()
    }
}

impl PostgresSettings {
    /// Connection options for a single connection.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// Pool options with the configured limits.
    #[must_use]
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .idle_timeout(Some(self.idle_timeout))
            .max_lifetime(Some(self.max_lifetime))
            .acquire_timeout(self.acquire_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_limits() {
        let settings = PostgresSettings::default();
        assert_eq!(settings.max_connections, 25);
        assert_eq!(settings.min_connections, 5);
        assert_eq!(settings.idle_timeout, Duration::from_secs(1800));
        assert_eq!(settings.max_lifetime, Duration::from_secs(3600));
        assert_eq!(settings.connect_retries, 5);
    }

    #[test]
    fn debug_hides_password() {
        let settings = PostgresSettings {
            password: "hunter2".to_string(),
            ..PostgresSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("localhost"));
    }

    #[test]
    fn connect_options_carry_target() {
        let settings = PostgresSettings {
            host: "db.internal".to_string(),
            port: 6543,
            database: "cal".to_string(),
            ..PostgresSettings::default()
        };
        let options = settings.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("cal"));
    }
}
