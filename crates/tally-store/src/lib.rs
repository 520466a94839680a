//! # Tally Store
//!
//! Persistence for the Tally contribution tracker. The same application code
//! runs against an embedded SQLite file or a PostgreSQL server:
//!
//! - [`Database`] / [`Transaction`]: the narrow statement interface both
//!   backends implement, written once with `?` placeholders
//! - [`Bootstrapper`]: idempotent table creation, additive column migrations,
//!   derived-field backfill and the baseline admin account
//! - [`snapshot`]: full-system export to a versioned JSON [`Envelope`] and
//!   transactional wipe-and-reload import
//!
//! ## Example
//!
//! ```rust,no_run
//! use tally_store::{Bootstrapper, StoreConfig, connect, snapshot};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::from_env()?;
//! let db = connect(&config.backend).await?;
//! Bootstrapper::new(db.clone(), config.admin).run().await?;
//!
//! let envelope = snapshot::export(db.as_ref()).await?;
//! snapshot::import(db.as_ref(), &envelope).await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod database;
pub mod dialect;
pub mod error;
pub mod postgres;
pub mod schema;
pub mod snapshot;
pub mod sqlite;

pub use bootstrap::{BootstrapError, BootstrapReport, Bootstrapper};
pub use config::{AdminSeed, BackendConfig, ConfigError, StoreConfig};
pub use database::{Database, ExecResult, Row, Transaction, connect};
pub use error::{DbError, StatementErrorKind};
pub use postgres::{PostgresConfig, PostgresDatabase};
pub use schema::ManagedTable;
pub use snapshot::{Envelope, RestorePhase, RestoreReport, SnapshotError};
pub use sqlite::SqliteDatabase;
