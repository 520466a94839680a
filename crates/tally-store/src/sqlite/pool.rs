//! Connection pool for SQLite with thread-safe resource management

use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tally_core::{Backend, PoolSize};

use crate::error::DbError;

/// Connection pool for SQLite with configurable size and thread safety
pub struct SqlitePool {
    available_connections: Arc<Mutex<Vec<Connection>>>,
    path: PathBuf,
    pool_size: usize,
    config: ConnectionConfig,
    active_connections: Arc<Mutex<usize>>,
}

/// Configuration for SQLite connections
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) wal_mode: bool,
    pub(crate) cache_size_kb: i32,
    pub(crate) busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            cache_size_kb: 16 * 1024,
            busy_timeout_ms: 5000,
        }
    }
}

impl SqlitePool {
    /// Validate database path (prevent traversal, require a database extension)
    fn validate_database_path(path: &Path) -> Result<PathBuf, DbError> {
        let invalid = |message: &str| DbError::Config {
            backend: Backend::Sqlite,
            message: format!("invalid database path '{}': {message}", path.display()),
        };

        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(invalid("path traversal detected"));
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("db" | "sqlite" | "sqlite3") => {}
            Some(_) => return Err(invalid("only .db, .sqlite and .sqlite3 files allowed")),
            None => return Err(invalid("file extension required")),
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::connection(
                    Backend::Sqlite,
                    format!("cannot create directory {}: {e}", parent.display()),
                )
            })?;
        }

        Ok(path.to_path_buf())
    }

    /// Create a new connection pool with the specified size
    pub fn new(path: impl AsRef<Path>, pool_size: PoolSize) -> Result<Self, DbError> {
        let path = Self::validate_database_path(path.as_ref())?;
        let config = ConnectionConfig::default();

        // Open one connection eagerly so a bad path fails at startup
        let first = Self::create_connection(&path, &config)?;

        Ok(Self {
            available_connections: Arc::new(Mutex::new(vec![first])),
            path,
            pool_size: pool_size.get(),
            config,
            active_connections: Arc::new(Mutex::new(0)),
        })
    }

    /// Create a new SQLite connection with WAL mode and foreign keys enforced
    fn create_connection(path: &Path, config: &ConnectionConfig) -> Result<Connection, DbError> {
        let conn = Connection::open(path).map_err(|e| {
            DbError::connection(
                Backend::Sqlite,
                format!("cannot open {}: {e}", path.display()),
            )
        })?;

        let cache_pragma = format!("PRAGMA cache_size = -{};", config.cache_size_kb);
        let timeout_pragma = format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms);

        let mut pragmas = Vec::new();
        if config.wal_mode {
            pragmas.push("PRAGMA journal_mode = WAL;");
        }
        pragmas.push("PRAGMA synchronous = NORMAL;");
        pragmas.push(&cache_pragma);
        pragmas.push(&timeout_pragma);
        pragmas.push("PRAGMA foreign_keys = ON;");

        conn.execute_batch(&pragmas.join("\n")).map_err(|e| {
            DbError::connection(Backend::Sqlite, format!("failed to configure SQLite: {e}"))
        })?;

        Ok(conn)
    }

    fn lock_error(what: &str) -> DbError {
        DbError::connection(Backend::Sqlite, format!("failed to lock {what}"))
    }

    /// Get a connection from the pool, opening a new one while under the limit
    pub fn acquire(&self) -> Result<PooledConnection, DbError> {
        let mut active = self
            .active_connections
            .lock()
            .map_err(|_| Self::lock_error("active connection counter"))?;

        let reused = self
            .available_connections
            .lock()
            .map_err(|_| Self::lock_error("connection pool"))?
            .pop();

        let conn = match reused {
            Some(conn) => conn,
            None => {
                if *active >= self.pool_size {
                    return Err(DbError::PoolExhausted {
                        backend: Backend::Sqlite,
                        limit: self.pool_size,
                    });
                }
                Self::create_connection(&self.path, &self.config)?
            }
        };
        *active += 1;

        Ok(PooledConnection {
            connection: Some(conn),
            pool: Arc::clone(&self.available_connections),
            pool_size: self.pool_size,
            active_connections: Arc::clone(&self.active_connections),
        })
    }

    /// Number of idle connections and the configured limit
    #[cfg(test)]
    pub(crate) fn status(&self) -> (usize, usize) {
        let idle = self
            .available_connections
            .lock()
            .map(|available| available.len())
            .unwrap_or(0);
        (idle, self.pool_size)
    }
}

/// RAII wrapper for pooled connections that returns connection to pool on drop
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<Mutex<Vec<Connection>>>,
    pool_size: usize,
    active_connections: Arc<Mutex<usize>>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl DerefMut for PooledConnection {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };

        if let Ok(mut active) = self.active_connections.lock() {
            *active = active.saturating_sub(1);
        }

        // A failed COMMIT or ROLLBACK can leave the transaction open
        if !conn.is_autocommit() {
            tracing::warn!("Closing connection left inside a transaction");
            return;
        }

        match self.pool.lock() {
            Ok(mut available) if available.len() < self.pool_size => available.push(conn),
            Ok(available) => {
                tracing::warn!(
                    available = available.len(),
                    pool_size = self.pool_size,
                    "Pool is full when returning connection"
                );
            }
            Err(_) => {
                tracing::error!("Failed to lock pool for connection return - connection closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rejects_bad_paths() {
        let dir = tempdir().unwrap();
        let size = PoolSize::small();
        assert!(SqlitePool::new(dir.path().join("data.txt"), size).is_err());
        assert!(SqlitePool::new(dir.path().join("noext"), size).is_err());
        assert!(SqlitePool::new(dir.path().join("../escape.db"), size).is_err());
    }

    #[test]
    fn test_creates_parent_directory_and_enables_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tally.db");
        let pool = SqlitePool::new(&path, PoolSize::small()).unwrap();
        assert!(path.exists());

        let conn = pool.acquire().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_pool_limit_and_return() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::new(dir.path().join("pool.db"), PoolSize::new(2).unwrap()).unwrap();

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire(),
            Err(DbError::PoolExhausted { limit: 2, .. })
        ));

        drop(first);
        let third = pool.acquire().unwrap();
        drop(second);
        drop(third);
        assert_eq!(pool.status(), (2, 2));
    }

    #[test]
    fn test_connection_inside_transaction_is_not_reused() {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::new(dir.path().join("open-tx.db"), PoolSize::new(2).unwrap()).unwrap();
        let (idle_before, _) = pool.status();

        let conn = pool.acquire().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        drop(conn);
        assert_eq!(pool.status().0, idle_before - 1);

        // The write lock went with the closed connection
        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;").unwrap();
        drop(conn);
        assert_eq!(pool.status().0, 1);
    }
}
