//! Caller-facing error taxonomy for arbitration operations.

use crate::gate::GateError;
use crate::ids::{AcquisitionId, HolderId, ResourceId};
use crate::ledger::LedgerError;
use crate::store::StoreError;
use thiserror::Error;

/// Broad classification of an [`ArbitrationError`].
///
/// Callers branch on the kind rather than on individual variants: contention
/// is expected under load and may be retried at the caller's discretion,
/// authorization failures are never retried, and fatal errors need an
/// operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Lost a race to another caller.
    Contention,
    /// The caller is not the rightful holder.
    Authorization,
    /// The referenced id does not exist.
    NotFound,
    /// A downstream write failed; re-read state before retrying.
    Transient,
    /// Ledger and resource state disagree.
    Fatal,
    /// The request itself is malformed.
    Invalid,
}

/// Errors returned by the arbitration service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    /// The resource id is unknown.
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// The acquisition id is unknown.
    #[error("Acquisition not found: {0}")]
    AcquisitionNotFound(AcquisitionId),

    /// Another holder has an active hold or owns the resource.
    #[error("Resource {0} is held by another holder")]
    RejectedHeldByOther(ResourceId),

    /// Another holder's unexpired hold has first claim.
    #[error("Resource {0} is on hold for another holder")]
    PriorityViolation(ResourceId),

    /// A concurrent confirm for the same resource is in flight or won.
    #[error("Lost contention for resource {0}")]
    ContentionLost(ResourceId),

    /// The resource was already acquired by someone else.
    #[error("Resource {0} is already acquired")]
    AlreadyAcquired(ResourceId),

    /// The caller does not own the hold or acquisition it named.
    #[error("Holder {holder} is not authorized for {target}")]
    Unauthorized {
        /// The rejected caller.
        holder: HolderId,
        /// The resource or acquisition the caller named.
        target: String,
    },

    /// The authoritative state changed but a follow-up write failed.
    ///
    /// For confirm this means the acquisition most likely succeeded; the
    /// caller should re-read state rather than retry blindly.
    #[error("Partial failure on resource {resource_id}: {reason}")]
    PartialFailure {
        /// The affected resource.
        resource_id: ResourceId,
        /// What failed.
        reason: String,
    },

    /// Ledger and resource state disagree.
    #[error("Inconsistent state: {0}")]
    Fatal(String),

    /// Hold TTLs must be non-zero.
    #[error("TTL must be greater than zero")]
    InvalidTtl,

    /// A backend could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl ArbitrationError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ContentionLost(_) | Self::AlreadyAcquired(_) | Self::RejectedHeldByOther(_) => {
                ErrorKind::Contention
            }
            Self::Unauthorized { .. } | Self::PriorityViolation(_) => ErrorKind::Authorization,
            Self::ResourceNotFound(_) | Self::AcquisitionNotFound(_) => ErrorKind::NotFound,
            Self::PartialFailure { .. } | Self::Unavailable(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::InvalidTtl => ErrorKind::Invalid,
        }
    }

    /// Short label used as a metrics dimension.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ResourceNotFound(_) | Self::AcquisitionNotFound(_) => "not_found",
            Self::RejectedHeldByOther(_) => "rejected_held_by_other",
            Self::PriorityViolation(_) => "priority_violation",
            Self::ContentionLost(_) => "contention_lost",
            Self::AlreadyAcquired(_) => "already_acquired",
            Self::Unauthorized { .. } => "unauthorized",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Fatal(_) => "fatal",
            Self::InvalidTtl => "invalid_ttl",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for ArbitrationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::ResourceNotFound(id),
            StoreError::Database(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<GateError> for ArbitrationError {
    fn from(error: GateError) -> Self {
        match error {
            GateError::ZeroTtl => Self::InvalidTtl,
            GateError::Backend(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<LedgerError> for ArbitrationError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::NotFound(id) => Self::AcquisitionNotFound(id),
            LedgerError::Unauthorized { acquisition_id, holder } => Self::Unauthorized {
                holder,
                target: format!("acquisition {acquisition_id}"),
            },
            LedgerError::Conflict { resource_id, existing_holder } => Self::Fatal(format!(
                "resource {resource_id} already has a confirmed entry for {existing_holder}"
            )),
            LedgerError::Database(msg) | LedgerError::Injected(msg) => Self::Unavailable(msg),
        }
    }
}
