//! # Seatlock Runtime
//!
//! Orchestration for exclusive resource arbitration.
//!
//! ## Core Components
//!
//! - **[`ArbitrationService`]**: hold → confirm → cancel, with ledger
//!   compensation and fault injection
//! - **[`HoldManager`]**: time-boxed holds and the priority rule
//! - **Admission strategies**: [`GateAdmission`] (gate + single CAS) and
//!   [`OptimisticAdmission`] (CAS with jittered retry)
//! - **[`ExpiryReclaimer`]**: periodic sweep returning expired holds to
//!   `AVAILABLE`
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_runtime::{ArbitrationService, GateAdmission};
//!
//! let service = ArbitrationService::builder(store, ledger)
//!     .admission(Arc::new(GateAdmission::new(gate, Duration::from_secs(30))))
//!     .build();
//!
//! service.acquire_hold(&seat, &alice, Duration::from_secs(300)).await?;
//! let acquisition = service.confirm_acquisition(&seat, &alice).await?;
//! service.cancel_acquisition(acquisition, &alice).await?;
//! ```

/// Admission strategies for the confirm critical section
pub mod admission;

/// The arbitration service
pub mod arbitration;

/// Fault-injection seam at the ledger writes
pub mod fault;

/// Holds and the priority rule
pub mod hold;

/// Prometheus metrics for observability
pub mod metrics;

/// Background reclamation of expired holds
pub mod reclaimer;

/// Retry logic with jittered exponential backoff
pub mod retry;

pub use admission::{Admission, AdmissionStrategy, GateAdmission, OptimisticAdmission};
pub use arbitration::{ArbitrationService, ArbitrationServiceBuilder};
pub use fault::{FaultInjector, FaultPoint, NoFaults, RandomFaults};
pub use hold::{Hold, HoldManager, HoldResult};
pub use reclaimer::{ExpiryReclaimer, SweepReport};
pub use retry::RetryPolicy;
