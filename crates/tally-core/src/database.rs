//! Shared database configuration types with validation
//!
//! These types are reused by both storage backends so that pool limits and
//! backend names are validated in one place.
//!
//! # Example
//!
//! ```rust
//! use tally_core::database::PoolSize;
//!
//! let pool = PoolSize::new(20).expect("20 is valid");
//! assert_eq!(pool.get(), 20);
//!
//! assert!(PoolSize::new(0).is_none());
//! assert!(PoolSize::new(101).is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two relational backends the store can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded single-file engine
    Sqlite,
    /// Client-server engine
    Postgres,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection pool size constrained to valid range (1-100)
///
/// ```rust
/// use tally_core::database::PoolSize;
///
/// assert!(PoolSize::new(1).is_some());
/// assert!(PoolSize::new(100).is_some());
/// assert!(PoolSize::new(0).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct PoolSize(u8);

impl PoolSize {
    /// Minimum allowed pool size
    pub const MIN: u8 = 1;
    /// Maximum allowed pool size
    pub const MAX: u8 = 100;

    /// Create a pool size (1-100)
    pub const fn new(size: u8) -> Option<Self> {
        if size < Self::MIN || size > Self::MAX {
            None
        } else {
            Some(Self(size))
        }
    }

    /// Create a pool size from usize
    pub fn from_usize(size: usize) -> Option<Self> {
        if size > Self::MAX as usize || size < Self::MIN as usize {
            None
        } else {
            Some(Self(size as u8))
        }
    }

    /// Get the pool size as a usize
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Default pool size for the client-server backend (10 connections)
    pub const fn default_size() -> Self {
        Self(10)
    }

    /// Small pool size for the embedded backend (4 connections)
    pub const fn small() -> Self {
        Self(4)
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::default_size()
    }
}

impl TryFrom<usize> for PoolSize {
    type Error = PoolSizeError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::from_usize(size).ok_or(PoolSizeError::OutOfRange { size })
    }
}

impl From<PoolSize> for usize {
    fn from(pool: PoolSize) -> Self {
        pool.get()
    }
}

impl fmt::Display for PoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating a PoolSize
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolSizeError {
    /// Pool size is out of the valid range (1-100)
    #[error("Pool size {size} is out of range (must be {}-{})", PoolSize::MIN, PoolSize::MAX)]
    OutOfRange { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_bounds() {
        assert_eq!(PoolSize::new(1).map(PoolSize::get), Some(1));
        assert_eq!(PoolSize::from_usize(100).map(PoolSize::get), Some(100));
        assert!(PoolSize::from_usize(1000).is_none());
        assert_eq!(
            PoolSize::try_from(0),
            Err(PoolSizeError::OutOfRange { size: 0 })
        );
    }

    #[test]
    fn test_pool_size_serde() {
        let size: PoolSize = serde_json::from_str("8").unwrap();
        assert_eq!(size.get(), 8);
        assert!(serde_json::from_str::<PoolSize>("0").is_err());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Sqlite.to_string(), "sqlite");
        assert_eq!(
            serde_json::to_string(&Backend::Postgres).unwrap(),
            "\"postgres\""
        );
    }
}
