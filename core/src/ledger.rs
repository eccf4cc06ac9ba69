//! Durable record of confirmed acquisitions and their cancellation.
//!
//! The ledger is the source of truth for who owns what. Entries are created
//! `CONFIRMED`, may be flipped once to `CANCELLED`, and are never deleted. A
//! resource has at most one `CONFIRMED` entry at any instant.

use crate::ids::{AcquisitionId, HolderId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionStatus {
    /// The holder owns the resource.
    Confirmed,
    /// The holder gave the resource back.
    Cancelled,
}

impl AcquisitionStatus {
    /// The canonical upper-case name, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(LedgerError::Database(format!("unknown acquisition status: {other}"))),
        }
    }
}

/// One ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Entry identity.
    pub id: AcquisitionId,
    /// The acquired resource.
    pub resource_id: ResourceId,
    /// The acquirer.
    pub holder: HolderId,
    /// Current status.
    pub status: AcquisitionStatus,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
    /// When the entry was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Acquisition {
    /// A new `CONFIRMED` entry.
    #[must_use]
    pub fn confirmed(resource_id: ResourceId, holder: HolderId, at: DateTime<Utc>) -> Self {
        Self {
            id: AcquisitionId::new(),
            resource_id,
            holder,
            status: AcquisitionStatus::Confirmed,
            created_at: at,
            cancelled_at: None,
        }
    }

    /// Whether this entry currently confers ownership.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == AcquisitionStatus::Confirmed
    }
}

/// Errors that can occur during ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No entry with this id.
    #[error("Acquisition not found: {0}")]
    NotFound(AcquisitionId),

    /// The caller is not the holder of the entry.
    #[error("Holder {holder} does not own acquisition {acquisition_id}")]
    Unauthorized {
        /// The entry.
        acquisition_id: AcquisitionId,
        /// The rejected caller.
        holder: HolderId,
    },

    /// A different holder already has the confirmed entry for this resource.
    #[error("Resource {resource_id} already confirmed for {existing_holder}")]
    Conflict {
        /// The contested resource.
        resource_id: ResourceId,
        /// Holder of the existing confirmed entry.
        existing_holder: HolderId,
    },

    /// The backing database failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A deliberately injected failure.
    #[error("Injected fault: {0}")]
    Injected(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Injected(_))
    }
}

/// Boxed future returned by [`ReservationLedger`] methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Append-oriented record of acquisitions.
///
/// `record` must only be called after the resource has been durably flipped
/// to `ACQUIRED`.
pub trait ReservationLedger: Send + Sync {
    /// Append a `CONFIRMED` entry for `holder` on `resource_id`.
    ///
    /// Idempotent for the holder that already owns the resource's confirmed
    /// entry: the existing id is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Conflict`] if another holder owns the confirmed entry
    /// - [`LedgerError::Database`] on backend failure
    fn record(&self, resource_id: ResourceId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, AcquisitionId>;

    /// Flip an entry to `CANCELLED`.
    ///
    /// Cancelling an already-cancelled entry by its holder is a no-op.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] if the entry does not exist
    /// - [`LedgerError::Unauthorized`] if `holder` does not own it
    /// - [`LedgerError::Database`] on backend failure
    fn cancel(&self, acquisition_id: AcquisitionId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, ()>;

    /// The `CONFIRMED` entry for a resource, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on backend failure.
    fn find_active(&self, resource_id: ResourceId) -> LedgerFuture<'_, Option<Acquisition>>;

    /// Look up an entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on backend failure.
    fn get(&self, acquisition_id: AcquisitionId) -> LedgerFuture<'_, Option<Acquisition>>;

    /// Every entry for a resource, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on backend failure.
    fn history(&self, resource_id: ResourceId) -> LedgerFuture<'_, Vec<Acquisition>>;

    /// Every entry recorded for a holder, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on backend failure.
    fn holder_acquisitions(&self, holder: HolderId) -> LedgerFuture<'_, Vec<Acquisition>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_persisted_names() {
        assert_eq!("CONFIRMED".parse::<AcquisitionStatus>(), Ok(AcquisitionStatus::Confirmed));
        assert_eq!("CANCELLED".parse::<AcquisitionStatus>(), Ok(AcquisitionStatus::Cancelled));
        assert!(matches!(
            "VOID".parse::<AcquisitionStatus>(),
            Err(LedgerError::Database(_))
        ));
    }

    #[test]
    fn only_backend_failures_are_transient() {
        assert!(LedgerError::Database("timeout".into()).is_transient());
        assert!(LedgerError::Injected("ledger.record".into()).is_transient());
        assert!(!LedgerError::NotFound(AcquisitionId::new()).is_transient());
        assert!(
            !LedgerError::Conflict {
                resource_id: ResourceId::new("seat-1"),
                existing_holder: HolderId::new("bob"),
            }
            .is_transient()
        );
    }
}
