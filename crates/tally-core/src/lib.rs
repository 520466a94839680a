//! # Tally Core
//!
//! Shared types for the Tally contribution tracker: the backend identifiers
//! and validated pool configuration used by the storage layer, and the
//! domain enumerations whose wire strings are persisted in the database.

pub mod database;
pub mod model;

pub use database::{Backend, PoolSize, PoolSizeError};
pub use model::{
    ContributionStatus, ProjectStatus, Role, UnknownVariant, UserStatus, year_from_period,
};
