//! Fault-injection seam for chaos testing the compensation paths.
//!
//! The arbitration service consults a [`FaultInjector`] immediately before
//! each ledger write. Production uses [`NoFaults`]; load tests can switch on
//! [`RandomFaults`] to exercise ledger retries and partial-failure handling.

use rand::Rng;
use std::fmt;

/// Where a fault may be injected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Before appending a confirmed entry.
    LedgerRecord,
    /// Before marking an entry cancelled.
    LedgerCancel,
}

impl FaultPoint {
    /// Stable name used in logs and injected error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LedgerRecord => "ledger.record",
            Self::LedgerCancel => "ledger.cancel",
        }
    }
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether the next write at a given point fails.
pub trait FaultInjector: Send + Sync {
    /// Return `true` to make the upcoming write fail.
    fn should_fail(&self, point: FaultPoint) -> bool;
}

/// Never injects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn should_fail(&self, _point: FaultPoint) -> bool {
        false
    }
}

/// Fails each write independently with probability `rate`.
#[derive(Clone, Copy, Debug)]
pub struct RandomFaults {
    rate: f64,
}

impl RandomFaults {
    /// Create an injector. `rate` is clamped to `[0.0, 1.0]`.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    /// The effective failure probability.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail(&self, point: FaultPoint) -> bool {
        let fail = rand::thread_rng().gen_bool(self.rate);
        if fail {
            tracing::debug!(point = %point, "Injecting fault");
        }
        fail
    }
}
