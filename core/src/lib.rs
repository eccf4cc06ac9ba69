//! # Seatlock Core
//!
//! Types and traits for arbitrating exclusive access to a pool of discrete,
//! non-shareable resources ("seats").
//!
//! Many clients compete for the same resource; each resource ends up held by
//! at most one winner, and losers get a fast, well-defined rejection. This
//! crate holds the pieces every backend and the orchestration runtime agree
//! on:
//!
//! - [`resource`]: the `AVAILABLE → HELD → ACQUIRED` state machine and the
//!   conditional [`resource::Transition`] that mutates it
//! - [`store::ResourceStore`]: durable state with an atomic compare-and-swap
//! - [`gate::CoordinationGate`]: TTL-backed set-if-absent admission gate
//! - [`ledger::ReservationLedger`]: who owns what, and since when
//! - [`error::ArbitrationError`]: the caller-facing error taxonomy
//!
//! Orchestration lives in `seatlock-runtime`; durable backends live in
//! `seatlock-postgres` and `seatlock-redis`; in-memory backends for tests live
//! in `seatlock-testing`.

pub use chrono::{DateTime, Utc};

pub mod error;
pub mod gate;
pub mod ids;
pub mod ledger;
pub mod resource;
pub mod store;

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// Hold expiry, reclamation and ledger timestamps all read time through
    /// this trait, so tests can move time forward without sleeping.
    ///
    /// # Examples
    ///
    /// ```
    /// use seatlock_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use error::{ArbitrationError, ErrorKind};
pub use ids::{AcquisitionId, HolderId, ResourceId, Revision};
pub use resource::{Resource, ResourceState, Transition};
