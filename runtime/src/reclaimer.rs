//! Periodic reclamation of expired holds.
//!
//! The reclaimer runs on its own interval, independent of request handling.
//! Each sweep asks the store for `HELD` resources whose expiry has passed and
//! releases each one with a compare-and-swap at the revision it just read, so
//! a hold refreshed or confirmed a moment earlier is left alone.

use crate::hold::HoldManager;
use crate::metrics::ReclaimerMetrics;
use seatlock_core::store::ResourceStore;
use seatlock_core::ArbitrationError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default sweep interval: one minute.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// What one sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired holds found.
    pub examined: usize,
    /// Holds returned to `AVAILABLE`.
    pub reclaimed: usize,
    /// Holds that changed before they could be reclaimed.
    pub skipped: usize,
    /// Holds whose release failed with a backend error.
    pub failed: usize,
}

/// Background sweeper for expired holds.
pub struct ExpiryReclaimer {
    store: Arc<dyn ResourceStore>,
    holds: Arc<HoldManager>,
    interval: Duration,
}

impl ExpiryReclaimer {
    /// Create a reclaimer sweeping every `interval`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, holds: Arc<HoldManager>, interval: Duration) -> Self {
        Self { store, holds, interval }
    }

    /// The sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now.
    ///
    /// Failures on individual resources are logged and counted; the sweep
    /// carries on with the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the expired holds cannot be listed.
    pub async fn sweep(&self) -> Result<SweepReport, ArbitrationError> {
        let now = self.holds.clock().now();
        let expired = self.store.expired_holds(now).await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for resource in &expired {
            match self.holds.reclaim(resource, now).await {
                Ok(true) => {
                    report.reclaimed += 1;
                    tracing::debug!(
                        resource_id = %resource.id,
                        holder_id = ?resource.holder,
                        revision = %resource.revision,
                        "Expired hold reclaimed"
                    );
                }
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(resource_id = %resource.id, error = %err, "Failed to reclaim expired hold");
                }
            }
        }

        if report.reclaimed > 0 {
            ReclaimerMetrics::record_reclaimed(report.reclaimed as u64);
            tracing::info!(
                reclaimed = report.reclaimed,
                skipped = report.skipped,
                failed = report.failed,
                "Reclaim sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every interval until `shutdown` turns `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = self.interval.as_millis(), "Expiry reclaimer started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        tracing::error!(error = %err, "Reclaim sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry reclaimer stopped");
    }

    /// Spawn [`ExpiryReclaimer::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
