//! PostgreSQL connection pool with RAII checkout

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tally_core::Backend;
use tokio_postgres::{Client, NoTls};

use super::config::PostgresConfig;
use crate::error::DbError;

/// A checked-out client, returned to the pool on drop
pub struct PooledClient {
    client: Option<Client>,
    idle: Arc<Mutex<Vec<Client>>>,
    active: Arc<AtomicUsize>,
    pool_size: usize,
}

impl PooledClient {
    pub fn client(&self) -> Result<&Client, DbError> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::connection(Backend::Postgres, "client already released"))
    }

    /// Close the connection instead of returning it to the pool.
    ///
    /// Used when the session state is unknown, e.g. a transaction that was
    /// abandoned or whose COMMIT or ROLLBACK failed.
    pub fn discard(mut self) {
        if self.client.take().is_some() {
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("Discarded PostgreSQL connection");
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        self.active.fetch_sub(1, Ordering::AcqRel);

        if client.is_closed() {
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.pool_size => idle.push(client),
            Ok(_) => tracing::warn!(pool_size = self.pool_size, "Pool is full when returning connection"),
            Err(_) => tracing::error!("Failed to lock pool for connection return - connection closed"),
        }
    }
}

/// Bounded PostgreSQL connection pool
pub struct PostgresPool {
    config: PostgresConfig,
    idle: Arc<Mutex<Vec<Client>>>,
    active: Arc<AtomicUsize>,
}

impl PostgresPool {
    /// Create the pool, opening one connection eagerly so a bad URL or
    /// unreachable server fails at startup.
    pub async fn new(config: PostgresConfig) -> Result<Self, DbError> {
        config.validate()?;
        let first = Self::open(&config).await?;
        Ok(Self {
            config,
            idle: Arc::new(Mutex::new(vec![first])),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    async fn open(config: &PostgresConfig) -> Result<Client, DbError> {
        let (client, connection) = config
            .build_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| DbError::connection(Backend::Postgres, e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection error");
            }
        });

        Self::validate_connection(&client).await?;
        Ok(client)
    }

    async fn validate_connection(client: &Client) -> Result<(), DbError> {
        client.simple_query("SELECT 1").await.map_err(DbError::from)?;
        Ok(())
    }

    fn pop_idle(&self) -> Result<Option<Client>, DbError> {
        let mut idle = self
            .idle
            .lock()
            .map_err(|_| DbError::connection(Backend::Postgres, "failed to lock connection pool"))?;
        Ok(idle.pop())
    }

    /// Check out a client, opening a new connection while under the limit.
    pub async fn acquire(&self) -> Result<PooledClient, DbError> {
        let limit = self.config.pool_size.get();
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map_err(|_| DbError::PoolExhausted {
                backend: Backend::Postgres,
                limit,
            })?;

        let client = match self.checkout().await {
            Ok(client) => client,
            Err(e) => {
                self.active.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        };

        Ok(PooledClient {
            client: Some(client),
            idle: Arc::clone(&self.idle),
            active: Arc::clone(&self.active),
            pool_size: limit,
        })
    }

    async fn checkout(&self) -> Result<Client, DbError> {
        while let Some(client) = self.pop_idle()? {
            if !client.is_closed() {
                return Ok(client);
            }
            tracing::debug!("Dropping closed PostgreSQL connection from pool");
        }
        Self::open(&self.config).await
    }
}
