//! `PostgreSQL` reservation ledger.
//!
//! `record` inserts with `ON CONFLICT ... DO NOTHING` against the partial
//! unique index on confirmed entries, then reads back whichever entry won.
//! Two concurrent records for the same resource therefore never both
//! succeed, even if the resource store were somehow bypassed.

use chrono::{DateTime, Utc};
use seatlock_core::ids::{AcquisitionId, HolderId, ResourceId};
use seatlock_core::ledger::{Acquisition, AcquisitionStatus, LedgerError, LedgerFuture, ReservationLedger};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ACQUISITION_COLUMNS: &str = "acquisition_id, resource_id, holder_id, status, created_at, cancelled_at";

/// `PostgreSQL`-backed [`ReservationLedger`].
#[derive(Clone, Debug)]
pub struct PostgresReservationLedger {
    pool: PgPool,
}

impl PostgresReservationLedger {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, LedgerError> {
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

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Acquisition>, LedgerError> {
        let query = format!("SELECT {ACQUISITION_COLUMNS} FROM acquisitions WHERE {clause}");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(acquisition_from_row).transpose()
    }

    async fn fetch_all_where(&self, clause: &str, value: &str) -> Result<Vec<Acquisition>, LedgerError> {
        let query = format!("SELECT {ACQUISITION_COLUMNS} FROM acquisitions WHERE {clause} ORDER BY created_at, seq");
        let rows = sqlx::query(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(acquisition_from_row).collect()
    }
}

impl ReservationLedger for PostgresReservationLedger {
    fn record(&self, resource_id: ResourceId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, AcquisitionId> {
        Box::pin(async move {
            let candidate = AcquisitionId::new();
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r"
                INSERT INTO acquisitions (acquisition_id, resource_id, holder_id, status, created_at)
                VALUES ($1, $2, $3, 'CONFIRMED', $4)
                ON CONFLICT (resource_id) WHERE status = 'CONFIRMED' DO NOTHING
                RETURNING acquisition_id
                ",
            )
            .bind(*candidate.as_uuid())
            .bind(resource_id.as_str())
            .bind(holder.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if let Some((id,)) = inserted {
                return Ok(AcquisitionId::from_uuid(id));
            }

            // Lost to an existing confirmed entry.
            match self
                .fetch_one_where("resource_id = $1 AND status = 'CONFIRMED'", resource_id.as_str())
                .await?
            {
                Some(existing) if existing.holder == holder => Ok(existing.id),
                Some(existing) => Err(LedgerError::Conflict {
                    resource_id,
                    existing_holder: existing.holder,
                }),
                // Cancelled between the insert and the read; the caller retries.
                None => Err(LedgerError::Database(format!(
                    "confirmed entry for {resource_id} disappeared during record"
                ))),
            }
        })
    }

    fn cancel(&self, acquisition_id: AcquisitionId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE acquisitions
                SET status = 'CANCELLED', cancelled_at = $3
                WHERE acquisition_id = $1 AND holder_id = $2 AND status = 'CONFIRMED'
                ",
            )
            .bind(*acquisition_id.as_uuid())
            .bind(holder.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 1 {
                return Ok(());
            }

            let query = format!("SELECT {ACQUISITION_COLUMNS} FROM acquisitions WHERE acquisition_id = $1");
            let entry = sqlx::query(&query)
                .bind(*acquisition_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(acquisition_from_row)
                .transpose()?
                .ok_or(LedgerError::NotFound(acquisition_id))?;

            if entry.holder != holder {
                return Err(LedgerError::Unauthorized { acquisition_id, holder });
            }
            // Already cancelled.
            Ok(())
        })
    }

    fn find_active(&self, resource_id: ResourceId) -> LedgerFuture<'_, Option<Acquisition>> {
        Box::pin(async move {
            self.fetch_one_where("resource_id = $1 AND status = 'CONFIRMED'", resource_id.as_str())
                .await
        })
    }

    fn get(&self, acquisition_id: AcquisitionId) -> LedgerFuture<'_, Option<Acquisition>> {
        Box::pin(async move {
            let query = format!("SELECT {ACQUISITION_COLUMNS} FROM acquisitions WHERE acquisition_id = $1");
            let row = sqlx::query(&query)
                .bind(*acquisition_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            row.as_ref().map(acquisition_from_row).transpose()
        })
    }

    fn history(&self, resource_id: ResourceId) -> LedgerFuture<'_, Vec<Acquisition>> {
        Box::pin(async move { self.fetch_all_where("resource_id = $1", resource_id.as_str()).await })
    }

    fn holder_acquisitions(&self, holder: HolderId) -> LedgerFuture<'_, Vec<Acquisition>> {
        Box::pin(async move { self.fetch_all_where("holder_id = $1", holder.as_str()).await })
    }
}

fn acquisition_from_row(row: &PgRow) -> Result<Acquisition, LedgerError> {
    let id: Uuid = row.try_get("acquisition_id").map_err(db_error)?;
    let resource_id: String = row.try_get("resource_id").map_err(db_error)?;
    let holder: String = row.try_get("holder_id").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_error)?;
    let cancelled_at: Option<DateTime<Utc>> = row.try_get("cancelled_at").map_err(db_error)?;

    Ok(Acquisition {
        id: AcquisitionId::from_uuid(id),
        resource_id: ResourceId::new(resource_id),
        holder: HolderId::new(holder),
        status: status.parse::<AcquisitionStatus>()?,
        created_at,
        cancelled_at,
    })
}

fn db_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}
