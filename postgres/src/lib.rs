//! `PostgreSQL` backends for Seatlock.
//!
//! This crate provides durable implementations of two seams from
//! `seatlock-core`:
//!
//! - [`PostgresResourceStore`]: resource state with compare-and-swap as a
//!   single conditional `UPDATE` on `(state, revision)`
//! - [`PostgresReservationLedger`]: the acquisition ledger, with a partial
//!   unique index enforcing at most one `CONFIRMED` entry per resource
//!
//! Queries are checked at runtime (`sqlx::query`), so building the crate
//! needs no live database.
//!
//! # Example
//!
//! ```ignore
//! use seatlock_postgres::{PoolConfig, PostgresReservationLedger, PostgresResourceStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = seatlock_postgres::connect("postgres://localhost/seatlock", &PoolConfig::default()).await?;
//!     seatlock_postgres::migrate(&pool).await?;
//!
//!     let store = PostgresResourceStore::from_pool(pool.clone());
//!     let ledger = PostgresReservationLedger::from_pool(pool);
//!     Ok(())
//! }
//! ```

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use thiserror::Error;

/// Conditional-update resource store.
pub mod resource_store;

/// Acquisition ledger.
pub mod ledger;

pub use ledger::PostgresReservationLedger;
pub use resource_store::PostgresResourceStore;

/// Connection pool sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a connection before failing.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Errors from connecting to or migrating the database.
#[derive(Error, Debug)]
pub enum SetupError {
    /// The pool could not connect.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(#[from] sqlx::Error),

    /// A migration failed.
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`SetupError::Connect`] if no connection can be established
/// within the configured timeout.
pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<PgPool, SetupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(database_url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "PostgreSQL pool connected"
    );
    Ok(pool)
}

/// Create or upgrade the `resources` and `acquisitions` tables.
///
/// # Errors
///
/// Returns [`SetupError::Migrate`] if a migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), SetupError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations complete");
    Ok(())
}

pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64, String> {
    i64::try_from(value).map_err(|_| format!("{what} {value} does not fit in BIGINT"))
}

pub(crate) fn to_u64(value: i64, what: &str) -> Result<u64, String> {
    u64::try_from(value).map_err(|_| format!("negative {what} {value} in database"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn revision_conversions_reject_out_of_range() {
        assert_eq!(to_i64(7, "revision"), Ok(7));
        assert!(to_i64(u64::MAX, "revision").is_err());
        assert_eq!(to_u64(7, "revision"), Ok(7));
        assert!(to_u64(-1, "revision").is_err());
    }
}
