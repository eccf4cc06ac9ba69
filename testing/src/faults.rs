//! Deterministic fault injection for compensation tests.

use seatlock_runtime::fault::{FaultInjector, FaultPoint};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Script {
    remaining: HashMap<FaultPoint, usize>,
    calls: HashMap<FaultPoint, usize>,
}

/// Fails the first `n` writes at each scripted point, then lets writes
/// through. Counts every consultation.
///
/// # Example
///
/// ```
/// use seatlock_runtime::fault::{FaultInjector, FaultPoint};
/// use seatlock_testing::ScriptedFaults;
///
/// let faults = ScriptedFaults::new().fail_first(FaultPoint::LedgerRecord, 2);
/// assert!(faults.should_fail(FaultPoint::LedgerRecord));
/// assert!(faults.should_fail(FaultPoint::LedgerRecord));
/// assert!(!faults.should_fail(FaultPoint::LedgerRecord));
/// assert_eq!(faults.calls(FaultPoint::LedgerRecord), 3);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ScriptedFaults {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFaults {
    /// An injector with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes at `point`.
    #[must_use]
    pub fn fail_first(self, point: FaultPoint, n: usize) -> Self {
        self.fail_next(point, n);
        self
    }

    /// Fail every write at `point` from now on.
    #[must_use]
    pub fn fail_always(self, point: FaultPoint) -> Self {
        self.fail_first(point, usize::MAX)
    }

    /// Script `n` failures at `point` on an injector already in use.
    ///
    /// Clones share one script, so this reaches a service that was built
    /// with a clone of `self`.
    pub fn fail_next(&self, point: FaultPoint, n: usize) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
            .insert(point, n);
    }

    /// Fail every write at `point` on an injector already in use.
    pub fn fail_from_now(&self, point: FaultPoint) {
        self.fail_next(point, usize::MAX);
    }

    /// How many times `point` was consulted.
    #[must_use]
    pub fn calls(&self, point: FaultPoint) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .get(&point)
            .copied()
            .unwrap_or(0)
    }

    /// Stop failing at every point.
    pub fn heal(&self) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).remaining.clear();
    }
}

impl FaultInjector for ScriptedFaults {
    fn should_fail(&self, point: FaultPoint) -> bool {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        *script.calls.entry(point).or_insert(0) += 1;
        match script.remaining.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripting_a_clone_reaches_the_original() {
        let faults = ScriptedFaults::new();
        let injector: Arc<dyn FaultInjector> = Arc::new(faults.clone());

        assert!(!injector.should_fail(FaultPoint::LedgerCancel));
        faults.fail_next(FaultPoint::LedgerCancel, 1);
        assert!(injector.should_fail(FaultPoint::LedgerCancel));
        assert!(!injector.should_fail(FaultPoint::LedgerCancel));

        faults.fail_from_now(FaultPoint::LedgerRecord);
        assert!(injector.should_fail(FaultPoint::LedgerRecord));
        faults.heal();
        assert!(!injector.should_fail(FaultPoint::LedgerRecord));
        assert_eq!(faults.calls(FaultPoint::LedgerCancel), 3);
    }
}
