//! `PostgreSQL` resource store.
//!
//! A transition is one statement:
//!
//! ```sql
//! UPDATE resources
//! SET state = $1, holder_id = $2, hold_expires_at = $3, revision = revision + 1
//! WHERE resource_id = $4 AND state = $5 AND revision = $6
//! ```
//!
//! The row lock taken by the `UPDATE` makes the check and the write atomic,
//! so of any number of concurrent transitions from the same revision exactly
//! one affects a row.

use crate::{to_i64, to_u64};
use chrono::{DateTime, Utc};
use seatlock_core::ids::{HolderId, ResourceId, Revision};
use seatlock_core::resource::{Resource, ResourceState, Transition};
use seatlock_core::store::{ResourceStore, StoreError, StoreFuture};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const RESOURCE_COLUMNS: &str = "resource_id, state, holder_id, hold_expires_at, revision";

/// `PostgreSQL`-backed [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct PostgresResourceStore {
    pool: PgPool,
}

impl PostgresResourceStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, resource_id: &ResourceId) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM resources WHERE resource_id = $1)")
            .bind(resource_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(exists)
    }
}

impl ResourceStore for PostgresResourceStore {
    fn try_transition(&self, resource_id: ResourceId, transition: Transition) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let expected = to_i64(transition.expected_revision.value(), "revision").map_err(StoreError::Database)?;

            let result = sqlx::query(
                r"
                UPDATE resources
                SET state = $1,
                    holder_id = $2,
                    hold_expires_at = $3,
                    revision = revision + 1,
                    updated_at = now()
                WHERE resource_id = $4 AND state = $5 AND revision = $6
                ",
            )
            .bind(transition.to.as_str())
            .bind(transition.holder.as_ref().map(HolderId::as_str))
            .bind(transition.hold_expires_at)
            .bind(resource_id.as_str())
            .bind(transition.from.as_str())
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 1 {
                tracing::trace!(
                    resource_id = %resource_id,
                    from = %transition.from,
                    to = %transition.to,
                    revision = %transition.expected_revision.next(),
                    "Transition applied"
                );
                return Ok(true);
            }

            if !self.exists(&resource_id).await? {
                return Err(StoreError::NotFound(resource_id));
            }
            metrics::counter!("seatlock_store_cas_misses_total").increment(1);
            Ok(false)
        })
    }

    fn read(&self, resource_id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE resource_id = $1");
            let row = sqlx::query(&query)
                .bind(resource_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .ok_or(StoreError::NotFound(resource_id))?;
            resource_from_row(&row)
        })
    }

    fn provision(&self, resource_id: ResourceId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO resources (resource_id, state, revision) VALUES ($1, 'AVAILABLE', 0) ON CONFLICT (resource_id) DO NOTHING",
            )
            .bind(resource_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            let query = format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY resource_id");
            let rows = sqlx::query(&query).fetch_all(&self.pool).await.map_err(db_error)?;
            rows.iter().map(resource_from_row).collect()
        })
    }

    fn expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources
                 WHERE state = 'HELD' AND (hold_expires_at IS NULL OR hold_expires_at <= $1)
                 ORDER BY resource_id"
            );
            let rows = sqlx::query(&query)
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
            rows.iter().map(resource_from_row).collect()
        })
    }
}

fn resource_from_row(row: &PgRow) -> Result<Resource, StoreError> {
    let id: String = row.try_get("resource_id").map_err(db_error)?;
    let state: String = row.try_get("state").map_err(db_error)?;
    let holder: Option<String> = row.try_get("holder_id").map_err(db_error)?;
    let hold_expires_at: Option<DateTime<Utc>> = row.try_get("hold_expires_at").map_err(db_error)?;
    let revision: i64 = row.try_get("revision").map_err(db_error)?;

    let state: ResourceState = state
        .parse()
        .map_err(|e| StoreError::Database(format!("resource {id}: {e}")))?;
    let revision = to_u64(revision, "revision").map_err(StoreError::Database)?;

    Ok(Resource {
        id: ResourceId::new(id),
        state,
        holder: holder.map(HolderId::new),
        hold_expires_at,
        revision: Revision::new(revision),
    })
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
