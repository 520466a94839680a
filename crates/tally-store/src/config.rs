//! # Environment-Based Configuration
//!
//! The backend is chosen once at process start: when `DATABASE_URL` is set
//! the store connects to PostgreSQL, otherwise it opens the embedded SQLite
//! file.
//!
//! ## Environment Variables
//!
//! - `DATABASE_URL` - PostgreSQL connection string; selects the client-server backend
//! - `TALLY_SQLITE_PATH` - SQLite database file (default: `data/tally.db`)
//! - `TALLY_DB_POOL_SIZE` - Connection pool size, 1-100 (default: 4 for SQLite, 10 for PostgreSQL)
//! - `TALLY_ADMIN_EMAIL` - Reserved email of the seeded admin (default: `admin@tally.local`)
//! - `TALLY_ADMIN_STAFF_ID` - Staff identifier of the seeded admin (default: `ADMIN`)
//! - `TALLY_ADMIN_NAME` - Display name of the seeded admin (default: `Administrator`)
//! - `TALLY_ADMIN_PASSWORD` - Initial admin password (default: `change-me`)

use std::env;
use std::path::PathBuf;

use tally_core::PoolSize;

use crate::postgres::PostgresConfig;

pub const DEFAULT_SQLITE_PATH: &str = "data/tally.db";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@tally.local";
const DEFAULT_ADMIN_STAFF_ID: &str = "ADMIN";
const DEFAULT_ADMIN_NAME: &str = "Administrator";
const DEFAULT_ADMIN_PASSWORD: &str = "change-me";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Which backend to connect to, and how
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Sqlite { path: PathBuf, pool_size: PoolSize },
    Postgres(PostgresConfig),
}

/// The baseline administrative account created on first start
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub staff_id: String,
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("staff_id", &self.staff_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            staff_id: DEFAULT_ADMIN_STAFF_ID.to_string(),
            name: DEFAULT_ADMIN_NAME.to_string(),
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl AdminSeed {
    /// Check if the seeded credential still uses the built-in password
    pub fn is_using_default_password(&self) -> bool {
        self.password == DEFAULT_ADMIN_PASSWORD
    }
}

/// Store configuration resolved at startup
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    pub admin: AdminSeed,
}

impl StoreConfig {
    /// SQLite configuration for the given file with default admin seed.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Sqlite {
                path: path.into(),
                pool_size: PoolSize::small(),
            },
            admin: AdminSeed::default(),
        }
    }

    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pool_size = get_pool_size(&lookup, "TALLY_DB_POOL_SIZE")?;

        let backend = match lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let mut pg = PostgresConfig::from_url(&url).map_err(|e| {
                    ConfigError::InvalidEnvVar {
                        key: "DATABASE_URL".to_string(),
                        message: e.to_string(),
                    }
                })?;
                if let Some(size) = pool_size {
                    pg.pool_size = size;
                }
                BackendConfig::Postgres(pg)
            }
            None => BackendConfig::Sqlite {
                path: lookup("TALLY_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH)),
                pool_size: pool_size.unwrap_or_else(PoolSize::small),
            },
        };

        let defaults = AdminSeed::default();
        let admin = AdminSeed {
            email: lookup("TALLY_ADMIN_EMAIL").unwrap_or(defaults.email),
            staff_id: lookup("TALLY_ADMIN_STAFF_ID").unwrap_or(defaults.staff_id),
            name: lookup("TALLY_ADMIN_NAME").unwrap_or(defaults.name),
            password: lookup("TALLY_ADMIN_PASSWORD").unwrap_or(defaults.password),
        };

        let config = Self { backend, admin };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.admin.email.contains('@') {
            return Err(ConfigError::ValidationError(format!(
                "admin email '{}' is not an email address",
                self.admin.email
            )));
        }
        if self.admin.staff_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "admin staff id cannot be empty".to_string(),
            ));
        }
        if self.admin.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "admin password cannot be empty".to_string(),
            ));
        }
        if let BackendConfig::Sqlite { path, .. } = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "sqlite path cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn get_pool_size(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<PoolSize>, ConfigError> {
    match lookup(key) {
        Some(val) => {
            let size = val
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("invalid usize value '{val}': {e}"),
                })?;
            PoolSize::try_from(size)
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        None => Ok(None),
    }
}
