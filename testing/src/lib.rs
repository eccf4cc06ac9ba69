//! # Seatlock Testing
//!
//! Testing utilities for exclusive resource arbitration.
//!
//! This crate provides:
//! - In-memory `ResourceStore`, `CoordinationGate` and `ReservationLedger`
//! - Deterministic clocks (`FixedClock`, advanceable `ManualClock`)
//! - `ScriptedFaults` for driving the ledger compensation paths
//! - `TestArbiter`, a fully wired service with handles on every backend
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_testing::TestArbiter;
//!
//! #[tokio::test]
//! async fn hold_then_confirm() {
//!     let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
//!     let seat = ResourceId::new("seat-1");
//!     let alice = HolderId::new("alice");
//!
//!     arbiter.service.acquire_hold(&seat, &alice, Duration::from_secs(60)).await?;
//!     arbiter.service.confirm_acquisition(&seat, &alice).await?;
//!     arbiter.assert_single_winner(&seat);
//! }
//! ```

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;

/// In-memory storage backends
pub mod memory;

/// Deterministic fault injection
pub mod faults;

/// Fully wired service harness
pub mod harness;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatlock_testing::mocks::FixedClock;
    /// use seatlock_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// service and advance another.
    ///
    /// ```
    /// use seatlock_testing::mocks::ManualClock;
    /// use seatlock_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::new(chrono::Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::from_secs(90));
    /// assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = seatlock_core::resource::expiry_after(*time, by);
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use faults::ScriptedFaults;
pub use harness::{AdmissionKind, TestArbiter, TestArbiterBuilder};
pub use memory::{InMemoryCoordinationGate, InMemoryReservationLedger, InMemoryResourceStore};
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fixed_clock_does_not_move() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::seconds(5));
    }
}
