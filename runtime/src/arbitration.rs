//! The arbitration service: hold → confirm → cancel.
//!
//! # Confirm
//!
//! 1. Reject with `PriorityViolation` if another holder has an active hold.
//! 2. Run the configured [`AdmissionStrategy`] to flip the resource to
//!    `ACQUIRED` (gate + compare-and-swap, or compare-and-swap with retry).
//!    The same transition clears the caller's hold.
//! 3. Append to the ledger. A failed write is retried with backoff; if it
//!    still fails the caller gets `PartialFailure`. The resource is *not*
//!    rolled back: it is already `ACQUIRED` for this caller, and a retried
//!    confirm completes the ledger entry.
//! 4. Release the admission gate on every path.
//!
//! # Cancel
//!
//! Ownership is checked against the ledger, the resource is flipped back to
//! `AVAILABLE`, then the ledger entry is marked `CANCELLED`. A cancel that
//! previously failed between those two writes is completed on retry.

use crate::admission::{Admission, AdmissionStrategy, OptimisticAdmission};
use crate::fault::{FaultInjector, FaultPoint, NoFaults};
use crate::hold::{HoldManager, HoldResult};
use crate::metrics::ArbitrationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use seatlock_core::environment::{Clock, SystemClock};
use seatlock_core::ids::{AcquisitionId, HolderId, ResourceId};
use seatlock_core::ledger::{Acquisition, AcquisitionStatus, LedgerError, ReservationLedger};
use seatlock_core::resource::{Resource, ResourceState, StateFingerprint, Transition};
use seatlock_core::store::ResourceStore;
use seatlock_core::{ArbitrationError, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default hold TTL: five minutes.
pub const DEFAULT_HOLD_TTL: Duration = Duration::from_secs(300);

/// Release attempts before a cancel gives up on a resource that keeps moving.
const MAX_CANCEL_ATTEMPTS: usize = 3;

/// Orchestrates holds, admission, and the ledger.
pub struct ArbitrationService {
    store: Arc<dyn ResourceStore>,
    ledger: Arc<dyn ReservationLedger>,
    admission: Arc<dyn AdmissionStrategy>,
    holds: Arc<HoldManager>,
    clock: Arc<dyn Clock>,
    faults: Arc<dyn FaultInjector>,
    ledger_retry: RetryPolicy,
    default_hold_ttl: Duration,
}

impl ArbitrationService {
    /// Start building a service over `store` and `ledger`.
    #[must_use]
    pub fn builder(store: Arc<dyn ResourceStore>, ledger: Arc<dyn ReservationLedger>) -> ArbitrationServiceBuilder {
        ArbitrationServiceBuilder {
            store,
            ledger,
            admission: None,
            clock: None,
            faults: None,
            ledger_retry: None,
            default_hold_ttl: DEFAULT_HOLD_TTL,
        }
    }

    /// Place or refresh a hold.
    ///
    /// Returns [`HoldResult::Granted`] or [`HoldResult::AlreadyHeldBySelf`].
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::RejectedHeldByOther`] if another holder has an
    ///   active claim
    /// - [`ArbitrationError::InvalidTtl`] if `ttl` is zero
    /// - [`ArbitrationError::ResourceNotFound`] if the resource is unknown
    pub async fn acquire_hold(
        &self,
        resource_id: &ResourceId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<HoldResult, ArbitrationError> {
        let result = match self.holds.acquire_hold(resource_id, holder, ttl).await {
            Ok(HoldResult::RejectedHeldByOther) => Err(ArbitrationError::RejectedHeldByOther(resource_id.clone())),
            other => other,
        };
        ArbitrationMetrics::record_hold(&result);
        log_outcome("acquire_hold", resource_id, holder, &result);
        result
    }

    /// Place or refresh a hold with the configured default TTL.
    ///
    /// # Errors
    ///
    /// As [`ArbitrationService::acquire_hold`].
    pub async fn acquire_default_hold(
        &self,
        resource_id: &ResourceId,
        holder: &HolderId,
    ) -> Result<HoldResult, ArbitrationError> {
        self.acquire_hold(resource_id, holder, self.default_hold_ttl).await
    }

    /// Confirm an acquisition for `holder`.
    ///
    /// Confirming a resource the caller already owns returns the existing
    /// acquisition id.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::PriorityViolation`] if another holder's hold is
    ///   active
    /// - [`ArbitrationError::ContentionLost`] if a concurrent confirm won
    /// - [`ArbitrationError::AlreadyAcquired`] if another holder owns it
    /// - [`ArbitrationError::PartialFailure`] if the resource was acquired but
    ///   the ledger write kept failing
    /// - [`ArbitrationError::ResourceNotFound`] if the resource is unknown
    pub async fn confirm_acquisition(
        &self,
        resource_id: &ResourceId,
        holder: &HolderId,
    ) -> Result<AcquisitionId, ArbitrationError> {
        let started = Instant::now();
        let result = self.confirm_inner(resource_id, holder).await;
        ArbitrationMetrics::record_confirm(&result, started.elapsed());
        log_outcome("confirm_acquisition", resource_id, holder, &result);
        result
    }

    async fn confirm_inner(&self, resource_id: &ResourceId, holder: &HolderId) -> Result<AcquisitionId, ArbitrationError> {
        if !self.holds.has_priority(resource_id, holder).await? {
            return Err(ArbitrationError::PriorityViolation(resource_id.clone()));
        }

        let admitted = self
            .admission
            .admit(self.store.as_ref(), self.clock.as_ref(), resource_id, holder)
            .await?;

        let result = match admitted.admission {
            Admission::Flipped { revision } => {
                tracing::debug!(
                    resource_id = %resource_id,
                    holder_id = %holder,
                    revision = %revision,
                    strategy = self.admission.name(),
                    "Resource flipped to ACQUIRED"
                );
                self.record_with_compensation(resource_id, holder).await
            }
            Admission::AlreadyOwned => self.resume_confirm(resource_id, holder).await,
        };

        admitted.finish().await;
        result
    }

    /// Confirm retried by the holder that already owns the resource.
    async fn resume_confirm(&self, resource_id: &ResourceId, holder: &HolderId) -> Result<AcquisitionId, ArbitrationError> {
        match self.ledger.find_active(resource_id.clone()).await? {
            Some(entry) if &entry.holder == holder => Ok(entry.id),
            Some(entry) => Err(ArbitrationError::Fatal(format!(
                "resource {resource_id} is ACQUIRED by {holder} but its ledger entry {} belongs to {}",
                entry.id, entry.holder
            ))),
            None => {
                tracing::warn!(
                    resource_id = %resource_id,
                    holder_id = %holder,
                    "Completing ledger entry left behind by an earlier partial failure"
                );
                self.record_with_compensation(resource_id, holder).await
            }
        }
    }

    async fn record_with_compensation(
        &self,
        resource_id: &ResourceId,
        holder: &HolderId,
    ) -> Result<AcquisitionId, ArbitrationError> {
        let mut attempt = 0_usize;
        let result = retry_with_predicate(
            &self.ledger_retry,
            || {
                attempt += 1;
                let retrying = attempt > 1;
                let resource_id = resource_id.clone();
                let holder = holder.clone();
                async move {
                    if retrying {
                        ArbitrationMetrics::record_ledger_retry();
                    }
                    self.inject(FaultPoint::LedgerRecord)?;
                    self.ledger.record(resource_id, holder, self.clock.now()).await
                }
            },
            LedgerError::is_transient,
        )
        .await;

        match result {
            Ok(acquisition_id) => Ok(acquisition_id),
            Err(err) if err.is_transient() => {
                tracing::error!(
                    resource_id = %resource_id,
                    holder_id = %holder,
                    error = %err,
                    "Resource ACQUIRED but ledger write failed"
                );
                Err(ArbitrationError::PartialFailure {
                    resource_id: resource_id.clone(),
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel an acquisition and return the resource to `AVAILABLE`.
    ///
    /// Cancelling an already-cancelled acquisition is a no-op, and so is
    /// losing a race to a concurrent cancel of the same acquisition.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::AcquisitionNotFound`] if the id is unknown
    /// - [`ArbitrationError::Unauthorized`] if `holder` does not own it
    /// - [`ArbitrationError::Fatal`] if the entry is still confirmed while
    ///   the resource is `ACQUIRED` by another holder
    /// - [`ArbitrationError::PartialFailure`] if the resource was released but
    ///   the ledger update kept failing
    pub async fn cancel_acquisition(
        &self,
        acquisition_id: AcquisitionId,
        holder: &HolderId,
    ) -> Result<(), ArbitrationError> {
        let result = self.cancel_inner(acquisition_id, holder).await;
        ArbitrationMetrics::record_cancel(&result);
        if let Err(err) = &result {
            log_error("cancel_acquisition", &acquisition_id.to_string(), holder, err);
        } else {
            tracing::debug!(acquisition_id = %acquisition_id, holder_id = %holder, "Acquisition cancelled");
        }
        result
    }

    async fn cancel_inner(&self, acquisition_id: AcquisitionId, holder: &HolderId) -> Result<(), ArbitrationError> {
        let Some(confirmed) = self.cancellable_entry(acquisition_id, holder).await? else {
            return Ok(());
        };

        let mut attempt = 0_usize;
        loop {
            attempt += 1;
            let resource = self.store.read(confirmed.resource_id.clone()).await?;

            if resource.is_acquired_by(holder) {
                let transition = Transition::release(ResourceState::Acquired, resource.revision);
                if self.store.try_transition(confirmed.resource_id.clone(), transition).await? {
                    break;
                }
                // Lost to a concurrent cancel of the same acquisition, or to
                // another write on the resource. Re-evaluate from fresh state.
                if self.cancellable_entry(acquisition_id, holder).await?.is_none() {
                    return Ok(());
                }
                if attempt >= MAX_CANCEL_ATTEMPTS {
                    return Err(ArbitrationError::Fatal(format!(
                        "resource {} kept changing while its acquisition {acquisition_id} was being cancelled",
                        confirmed.resource_id
                    )));
                }
                continue;
            }

            if resource.state == ResourceState::Acquired {
                return Err(ArbitrationError::Fatal(format!(
                    "acquisition {acquisition_id} is CONFIRMED but resource {} is ACQUIRED by another holder",
                    confirmed.resource_id
                )));
            }

            tracing::warn!(
                acquisition_id = %acquisition_id,
                resource_id = %confirmed.resource_id,
                state = %resource.state,
                "Resource already released; marking acquisition cancelled"
            );
            break;
        }

        self.cancel_with_compensation(&confirmed, holder).await
    }

    /// The entry if `holder` may cancel it and it is still confirmed;
    /// `None` if it is already cancelled.
    async fn cancellable_entry(
        &self,
        acquisition_id: AcquisitionId,
        holder: &HolderId,
    ) -> Result<Option<Acquisition>, ArbitrationError> {
        let entry = self
            .ledger
            .get(acquisition_id)
            .await?
            .ok_or(ArbitrationError::AcquisitionNotFound(acquisition_id))?;

        if &entry.holder != holder {
            return Err(ArbitrationError::Unauthorized {
                holder: holder.clone(),
                target: format!("acquisition {acquisition_id}"),
            });
        }
        if entry.status == AcquisitionStatus::Cancelled {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn cancel_with_compensation(&self, entry: &Acquisition, holder: &HolderId) -> Result<(), ArbitrationError> {
        let result = retry_with_predicate(
            &self.ledger_retry,
            || {
                let holder = holder.clone();
                async move {
                    self.inject(FaultPoint::LedgerCancel)?;
                    self.ledger.cancel(entry.id, holder, self.clock.now()).await
                }
            },
            LedgerError::is_transient,
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => Err(ArbitrationError::PartialFailure {
                resource_id: entry.resource_id.clone(),
                reason: err.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn inject(&self, point: FaultPoint) -> Result<(), LedgerError> {
        if self.faults.should_fail(point) {
            Err(LedgerError::Injected(point.to_string()))
        } else {
            Ok(())
        }
    }

    /// Release `holder`'s hold. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::Unauthorized`] if another holder holds or owns
    ///   the resource
    /// - [`ArbitrationError::ResourceNotFound`] if the resource is unknown
    pub async fn release_hold(&self, resource_id: &ResourceId, holder: &HolderId) -> Result<bool, ArbitrationError> {
        let result = self.holds.release_hold(resource_id, holder).await;
        log_outcome("release_hold", resource_id, holder, &result);
        result
    }

    /// The resource as observed now; an expired hold reads as `AVAILABLE`.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::ResourceNotFound`] if the resource is unknown.
    pub async fn resource_state(&self, resource_id: &ResourceId) -> Result<Resource, ArbitrationError> {
        let resource = self.store.read(resource_id.clone()).await?;
        Ok(resource.observed(self.clock.now()))
    }

    /// Create resources as `AVAILABLE`. Existing resources are left alone.
    ///
    /// Returns how many were newly created.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on store failure.
    pub async fn provision<I>(&self, resource_ids: I) -> Result<usize, ArbitrationError>
    where
        I: IntoIterator<Item = ResourceId>,
    {
        let mut created = 0;
        for resource_id in resource_ids {
            if self.store.provision(resource_id.clone()).await? {
                tracing::debug!(resource_id = %resource_id, "Resource provisioned");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Every resource as observed now, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on store failure.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, ArbitrationError> {
        let now = self.clock.now();
        let resources = self.store.list().await?;
        Ok(resources.iter().map(|r| r.observed(now)).collect())
    }

    /// Digest of every resource's observed state and revision.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on store failure.
    pub async fn state_fingerprint(&self) -> Result<StateFingerprint, ArbitrationError> {
        let resources = self.store.list().await?;
        Ok(StateFingerprint::compute(&resources, self.clock.now()))
    }

    /// The confirmed acquisition for a resource, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on ledger failure.
    pub async fn active_acquisition(&self, resource_id: &ResourceId) -> Result<Option<Acquisition>, ArbitrationError> {
        Ok(self.ledger.find_active(resource_id.clone()).await?)
    }

    /// Every ledger entry for a resource, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on ledger failure.
    pub async fn resource_history(&self, resource_id: &ResourceId) -> Result<Vec<Acquisition>, ArbitrationError> {
        Ok(self.ledger.history(resource_id.clone()).await?)
    }

    /// Every ledger entry for a holder, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Unavailable`] on ledger failure.
    pub async fn acquisitions_for(&self, holder: &HolderId) -> Result<Vec<Acquisition>, ArbitrationError> {
        Ok(self.ledger.holder_acquisitions(holder.clone()).await?)
    }

    /// The hold manager, shared with the expiry reclaimer.
    #[must_use]
    pub fn holds(&self) -> Arc<HoldManager> {
        Arc::clone(&self.holds)
    }

    /// The resource store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ResourceStore> {
        Arc::clone(&self.store)
    }

    /// TTL applied by [`ArbitrationService::acquire_default_hold`].
    #[must_use]
    pub const fn default_hold_ttl(&self) -> Duration {
        self.default_hold_ttl
    }

    /// Name of the admission strategy in use.
    #[must_use]
    pub fn admission_name(&self) -> &'static str {
        self.admission.name()
    }
}

/// Builder for [`ArbitrationService`].
pub struct ArbitrationServiceBuilder {
    store: Arc<dyn ResourceStore>,
    ledger: Arc<dyn ReservationLedger>,
    admission: Option<Arc<dyn AdmissionStrategy>>,
    clock: Option<Arc<dyn Clock>>,
    faults: Option<Arc<dyn FaultInjector>>,
    ledger_retry: Option<RetryPolicy>,
    default_hold_ttl: Duration,
}

impl ArbitrationServiceBuilder {
    /// Admission strategy. Defaults to [`OptimisticAdmission`] with the
    /// default retry policy.
    #[must_use]
    pub fn admission(mut self, admission: Arc<dyn AdmissionStrategy>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Clock. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fault injector consulted before ledger writes. Defaults to [`NoFaults`].
    #[must_use]
    pub fn faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Retry policy for ledger writes.
    #[must_use]
    pub fn ledger_retry(mut self, policy: RetryPolicy) -> Self {
        self.ledger_retry = Some(policy);
        self
    }

    /// TTL for [`ArbitrationService::acquire_default_hold`].
    #[must_use]
    pub const fn default_hold_ttl(mut self, ttl: Duration) -> Self {
        self.default_hold_ttl = ttl;
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> ArbitrationService {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let holds = Arc::new(HoldManager::new(Arc::clone(&self.store), Arc::clone(&clock)));
        ArbitrationService {
            store: self.store,
            ledger: self.ledger,
            admission: self
                .admission
                .unwrap_or_else(|| Arc::new(OptimisticAdmission::new(RetryPolicy::default()))),
            holds,
            clock,
            faults: self.faults.unwrap_or_else(|| Arc::new(NoFaults)),
            ledger_retry: self.ledger_retry.unwrap_or_else(|| {
                RetryPolicy::builder().initial_delay(Duration::from_millis(50)).build()
            }),
            default_hold_ttl: self.default_hold_ttl,
        }
    }
}

fn log_outcome<T>(operation: &'static str, resource_id: &ResourceId, holder: &HolderId, result: &Result<T, ArbitrationError>) {
    match result {
        Ok(_) => tracing::debug!(operation, resource_id = %resource_id, holder_id = %holder, "Succeeded"),
        Err(err) => log_error(operation, resource_id.as_str(), holder, err),
    }
}

/// Log a failure at the level its kind deserves.
fn log_error(operation: &'static str, subject: &str, holder: &HolderId, err: &ArbitrationError) {
    match err.kind() {
        ErrorKind::Contention | ErrorKind::NotFound | ErrorKind::Invalid => {
            tracing::debug!(operation, subject, holder_id = %holder, error = %err, "Rejected");
        }
        ErrorKind::Authorization | ErrorKind::Transient => {
            tracing::warn!(operation, subject, holder_id = %holder, error = %err, "Failed");
        }
        ErrorKind::Fatal => {
            tracing::error!(operation, subject, holder_id = %holder, error = %err, "Ledger and resource state disagree");
        }
    }
}
