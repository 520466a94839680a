//! PostgreSQL connection configuration

use std::time::Duration;

use tally_core::{Backend, PoolSize};
use tokio_postgres::Config;
use tokio_postgres::config::Host;

use crate::error::DbError;

/// PostgreSQL connection configuration
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    pub pool_size: PoolSize,
    /// Reported to the server as `application_name`
    pub application_name: String,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_size", &self.pool_size)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "tally".to_string(),
            user: "tally".to_string(),
            password: None,
            connect_timeout: 30,
            pool_size: PoolSize::default_size(),
            application_name: "tally".to_string(),
        }
    }
}

fn invalid(message: impl Into<String>) -> DbError {
    DbError::Config {
        backend: Backend::Postgres,
        message: message.into(),
    }
}

impl PostgresConfig {
    /// Parse a `postgres://` URL or key/value connection string
    pub fn from_url(url: &str) -> Result<Self, DbError> {
        let config: Config = url
            .parse()
            .map_err(|e| invalid(format!("invalid database URL: {e}")))?;
        let defaults = Self::default();

        let host = match config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            Some(Host::Unix(path)) => {
                let lossy = path.to_string_lossy();
                if matches!(lossy, std::borrow::Cow::Owned(_)) {
                    tracing::warn!(path_debug = ?path, "Unix socket path contains invalid UTF-8");
                }
                lossy.into_owned()
            }
            None => defaults.host,
        };

        Ok(Self {
            host,
            port: config.get_ports().first().copied().unwrap_or(defaults.port),
            database: config
                .get_dbname()
                .map(str::to_string)
                .unwrap_or(defaults.database),
            user: config
                .get_user()
                .map(str::to_string)
                .unwrap_or(defaults.user),
            password: config
                .get_password()
                .map(|s| String::from_utf8_lossy(s).into_owned()),
            connect_timeout: config
                .get_connect_timeout()
                .map(|t| t.as_secs().max(1))
                .unwrap_or(defaults.connect_timeout),
            pool_size: defaults.pool_size,
            application_name: config
                .get_application_name()
                .map(str::to_string)
                .unwrap_or(defaults.application_name),
        })
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.host.is_empty() {
            return Err(invalid("host cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(invalid("database name cannot be empty"));
        }
        if self.user.is_empty() {
            return Err(invalid("username cannot be empty"));
        }
        if self.host.contains("..") {
            return Err(invalid("invalid host: potential path traversal detected"));
        }
        if !self
            .database
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("database name contains invalid characters"));
        }
        Ok(())
    }

    /// Build tokio_postgres Config
    pub fn build_pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .application_name(&self.application_name)
            .connect_timeout(Duration::from_secs(self.connect_timeout));

        if let Some(ref password) = self.password {
            config.password(password);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let config =
            PostgresConfig::from_url("postgres://alice:pw@db.example.com:6543/tally_test").unwrap();
        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user, "alice");
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.database, "tally_test");
        assert_eq!(config.pool_size, PoolSize::default_size());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_url_defaults() {
        let config = PostgresConfig::from_url("postgres://localhost").unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "tally");
        assert!(config.password.is_none());
    }

    #[test]
    fn test_rejects_garbage_url() {
        assert!(matches!(
            PostgresConfig::from_url("postgres://host:notaport/db"),
            Err(DbError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_database_name() {
        let config = PostgresConfig {
            database: "tally; DROP".to_string(),
            ..PostgresConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_masks_password() {
        let config = PostgresConfig {
            password: Some("hunter2".to_string()),
            ..PostgresConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
