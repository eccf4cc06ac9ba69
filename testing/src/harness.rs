//! A fully wired arbitration service on in-memory backends.
//!
//! ```
//! use seatlock_core::ids::{HolderId, ResourceId};
//! use seatlock_testing::TestArbiter;
//!
//! # async fn example() {
//! let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
//! let seat = ResourceId::new("seat-1");
//!
//! let won = arbiter.service.confirm_acquisition(&seat, &HolderId::new("a")).await;
//! assert!(won.is_ok());
//! arbiter.assert_single_winner(&seat);
//! # }
//! ```

#![allow(clippy::missing_panics_doc)] // Assertion helpers panic on failure

use crate::faults::ScriptedFaults;
use crate::memory::{InMemoryCoordinationGate, InMemoryReservationLedger, InMemoryResourceStore};
use crate::mocks::{ManualClock, test_clock};
use seatlock_core::environment::Clock;
use seatlock_core::ids::ResourceId;
use seatlock_core::resource::{Resource, ResourceState};
use seatlock_runtime::{
    AdmissionStrategy, ArbitrationService, ExpiryReclaimer, GateAdmission, OptimisticAdmission, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

/// Which admission strategy the harness wires in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionKind {
    /// Gate + single compare-and-swap.
    #[default]
    Gate,
    /// Compare-and-swap with retry.
    Optimistic,
}

/// Arbitration service plus direct handles on its backends.
pub struct TestArbiter {
    /// The service under test.
    pub service: Arc<ArbitrationService>,
    /// Resource store backing the service.
    pub store: InMemoryResourceStore,
    /// Ledger backing the service.
    pub ledger: InMemoryReservationLedger,
    /// Gate (used only with [`AdmissionKind::Gate`]).
    pub gate: InMemoryCoordinationGate,
    /// Clock shared by the service and the gate.
    pub clock: ManualClock,
    /// Fault script consulted before ledger writes.
    pub faults: ScriptedFaults,
}

impl TestArbiter {
    /// Start configuring a harness.
    #[must_use]
    pub fn builder() -> TestArbiterBuilder {
        TestArbiterBuilder::default()
    }

    /// Move the shared clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// A reclaimer over this harness's store and holds.
    #[must_use]
    pub fn reclaimer(&self, interval: Duration) -> ExpiryReclaimer {
        ExpiryReclaimer::new(self.service.store(), self.service.holds(), interval)
    }

    /// Raw stored state of a resource, without expiry applied.
    #[must_use]
    #[allow(clippy::panic)] // Test helper: a missing fixture is a broken test
    pub fn stored(&self, resource_id: &ResourceId) -> Resource {
        match self.store.get(resource_id) {
            Some(resource) => resource,
            None => panic!("resource {resource_id} was never provisioned"),
        }
    }

    /// Assert the resource is `ACQUIRED` with exactly one confirmed entry,
    /// held by the same holder.
    pub fn assert_single_winner(&self, resource_id: &ResourceId) {
        let resource = self.stored(resource_id);
        assert_eq!(resource.state, ResourceState::Acquired, "resource should be ACQUIRED");
        assert_eq!(self.ledger.confirmed_count(resource_id), 1, "exactly one CONFIRMED entry");

        let entry = self
            .ledger
            .entries()
            .into_iter()
            .find(|e| &e.resource_id == resource_id && e.is_confirmed());
        assert_eq!(entry.map(|e| e.holder), resource.holder, "ledger and resource agree on holder");
    }

    /// Assert the resource is `AVAILABLE` with no confirmed entry.
    pub fn assert_available(&self, resource_id: &ResourceId) {
        let resource = self.stored(resource_id);
        assert_eq!(resource.state, ResourceState::Available, "resource should be AVAILABLE");
        assert_eq!(resource.holder, None);
        assert_eq!(self.ledger.confirmed_count(resource_id), 0, "no CONFIRMED entry");
    }
}

/// Builder for [`TestArbiter`].
#[derive(Debug, Default)]
pub struct TestArbiterBuilder {
    admission: AdmissionKind,
    resources: Vec<String>,
    faults: Option<ScriptedFaults>,
    ledger_retry: Option<RetryPolicy>,
    cas_retry: Option<RetryPolicy>,
    gate_ttl: Option<Duration>,
}

impl TestArbiterBuilder {
    /// Admission strategy (gate by default).
    #[must_use]
    pub const fn admission(mut self, admission: AdmissionKind) -> Self {
        self.admission = admission;
        self
    }

    /// Resources provisioned as `AVAILABLE`.
    #[must_use]
    pub fn resources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Fault script for ledger writes.
    #[must_use]
    pub fn faults(mut self, faults: ScriptedFaults) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Ledger retry policy (default: 3 retries, no delay).
    #[must_use]
    pub fn ledger_retry(mut self, policy: RetryPolicy) -> Self {
        self.ledger_retry = Some(policy);
        self
    }

    /// Optimistic CAS retry policy (default: 50 retries, 1ms base delay).
    #[must_use]
    pub fn cas_retry(mut self, policy: RetryPolicy) -> Self {
        self.cas_retry = Some(policy);
        self
    }

    /// Gate TTL (default: 30 seconds).
    #[must_use]
    pub const fn gate_ttl(mut self, ttl: Duration) -> Self {
        self.gate_ttl = Some(ttl);
        self
    }

    /// Wire everything together.
    #[must_use]
    pub fn build(self) -> TestArbiter {
        let clock = ManualClock::new(test_clock().now());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = InMemoryResourceStore::with_resources(self.resources);
        let ledger = InMemoryReservationLedger::new();
        let gate = InMemoryCoordinationGate::with_clock(Arc::clone(&shared_clock));
        let faults = self.faults.unwrap_or_default();

        let admission: Arc<dyn AdmissionStrategy> = match self.admission {
            AdmissionKind::Gate => Arc::new(GateAdmission::new(
                Arc::new(gate.clone()),
                self.gate_ttl.unwrap_or(Duration::from_secs(30)),
            )),
            AdmissionKind::Optimistic => Arc::new(OptimisticAdmission::new(self.cas_retry.unwrap_or_else(|| {
                RetryPolicy::builder()
                    .max_retries(50)
                    .initial_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(5))
                    .build()
            }))),
        };

        let service = ArbitrationService::builder(Arc::new(store.clone()), Arc::new(ledger.clone()))
            .admission(admission)
            .clock(shared_clock)
            .faults(Arc::new(faults.clone()))
            .ledger_retry(self.ledger_retry.unwrap_or_else(|| {
                RetryPolicy::builder().max_retries(3).initial_delay(Duration::ZERO).build()
            }))
            .build();

        TestArbiter {
            service: Arc::new(service),
            store,
            ledger,
            gate,
            clock,
            faults,
        }
    }
}
