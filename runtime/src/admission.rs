//! Admission: flipping a resource to `ACQUIRED` under contention.
//!
//! Two interchangeable strategies implement [`AdmissionStrategy`]:
//!
//! - [`GateAdmission`]: win a TTL-backed gate first, then make a single
//!   compare-and-swap. Losers are turned away at the gate without touching
//!   the durable store. The gate stays held (via [`AdmissionPermit`]) until
//!   the caller has written the ledger.
//! - [`OptimisticAdmission`]: no gate. Read, compare-and-swap, and on a lost
//!   race re-read and retry with jittered backoff.
//!
//! Both refuse to flip a resource another holder has an active hold on, and
//! both report `AlreadyOwned` when the caller already acquired it, so that a
//! retried confirm is idempotent.

use crate::hold::holder_has_priority;
use crate::metrics::ArbitrationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use seatlock_core::environment::Clock;
use seatlock_core::gate::{CoordinationGate, GateKey, OwnerToken};
use seatlock_core::ids::{HolderId, ResourceId, Revision};
use seatlock_core::resource::{ResourceState, Transition};
use seatlock_core::store::ResourceStore;
use seatlock_core::ArbitrationError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// What admission did to the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// This call flipped the resource to `ACQUIRED`; it is now at `revision`.
    Flipped {
        /// Revision after the flip.
        revision: Revision,
    },
    /// The caller had already acquired the resource.
    AlreadyOwned,
}

/// A successful admission, possibly still holding a gate.
///
/// Call [`Admitted::finish`] once the ledger step is done. If the value is
/// dropped instead, any gate it holds is released in the background.
#[derive(Debug)]
pub struct Admitted {
    /// What happened to the resource.
    pub admission: Admission,
    permit: Option<AdmissionPermit>,
}

impl Admitted {
    /// Admission without a gate to release.
    #[must_use]
    pub const fn ungated(admission: Admission) -> Self {
        Self { admission, permit: None }
    }

    /// Admission that holds `permit` until finished.
    #[must_use]
    pub const fn gated(admission: Admission, permit: AdmissionPermit) -> Self {
        Self {
            admission,
            permit: Some(permit),
        }
    }

    /// Release whatever admission still holds.
    pub async fn finish(self) {
        if let Some(permit) = self.permit {
            permit.release().await;
        }
    }
}

/// Boxed future returned by [`AdmissionStrategy::admit`].
pub type AdmissionFuture<'a> = Pin<Box<dyn Future<Output = Result<Admitted, ArbitrationError>> + Send + 'a>>;

/// Pluggable step that turns a confirm request into an `ACQUIRED` resource.
pub trait AdmissionStrategy: Send + Sync {
    /// Try to flip `resource_id` to `ACQUIRED` for `holder`.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::ContentionLost`] if a concurrent confirm won the
    ///   gate, or retries ran out
    /// - [`ArbitrationError::AlreadyAcquired`] if another holder owns it
    /// - [`ArbitrationError::PriorityViolation`] if another holder's hold
    ///   appeared since the caller's priority check
    /// - [`ArbitrationError::ResourceNotFound`] / [`ArbitrationError::Unavailable`]
    ///   from the backends
    fn admit<'a>(
        &'a self,
        store: &'a dyn ResourceStore,
        clock: &'a dyn Clock,
        resource_id: &'a ResourceId,
        holder: &'a HolderId,
    ) -> AdmissionFuture<'a>;

    /// Short name for logs and configuration.
    fn name(&self) -> &'static str;
}

enum Flip {
    Done(Admission),
    Lost,
}

/// One read + compare-and-swap attempt.
async fn attempt_flip(
    store: &dyn ResourceStore,
    clock: &dyn Clock,
    resource_id: &ResourceId,
    holder: &HolderId,
) -> Result<Flip, ArbitrationError> {
    let current = store.read(resource_id.clone()).await?;

    if current.is_acquired_by(holder) {
        return Ok(Flip::Done(Admission::AlreadyOwned));
    }
    if current.state == ResourceState::Acquired {
        return Err(ArbitrationError::AlreadyAcquired(resource_id.clone()));
    }
    if !holder_has_priority(&current, holder, clock.now()) {
        return Err(ArbitrationError::PriorityViolation(resource_id.clone()));
    }

    let transition = Transition::acquire(current.state, current.revision, holder.clone());
    if store.try_transition(resource_id.clone(), transition).await? {
        Ok(Flip::Done(Admission::Flipped {
            revision: current.revision.next(),
        }))
    } else {
        Ok(Flip::Lost)
    }
}

/// Why a gated compare-and-swap lost: the gate keeps other confirmers out,
/// so the winning write was a confirm that got in first or a hold.
async fn lost_flip_error(
    store: &dyn ResourceStore,
    clock: &dyn Clock,
    resource_id: &ResourceId,
    holder: &HolderId,
) -> ArbitrationError {
    match store.read(resource_id.clone()).await {
        Ok(current) if current.state == ResourceState::Acquired => {
            ArbitrationError::AlreadyAcquired(resource_id.clone())
        }
        Ok(current) if !holder_has_priority(&current, holder, clock.now()) => {
            ArbitrationError::PriorityViolation(resource_id.clone())
        }
        Ok(_) => ArbitrationError::ContentionLost(resource_id.clone()),
        Err(err) => err.into(),
    }
}

/// A held gate entry, released on [`AdmissionPermit::release`] or on drop.
pub struct AdmissionPermit {
    gate: Arc<dyn CoordinationGate>,
    key: GateKey,
    owner: OwnerToken,
    released: bool,
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl AdmissionPermit {
    fn new(gate: Arc<dyn CoordinationGate>, key: GateKey, owner: OwnerToken) -> Self {
        Self {
            gate,
            key,
            owner,
            released: false,
        }
    }

    /// Release the gate. Failures are logged and counted, never returned: a
    /// stuck gate heals when its TTL runs out.
    pub async fn release(mut self) {
        self.released = true;
        release_quietly(Arc::clone(&self.gate), self.key.clone(), self.owner.clone()).await;
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let gate = Arc::clone(&self.gate);
        let key = self.key.clone();
        let owner = self.owner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release_quietly(gate, key, owner));
            }
            Err(_) => {
                tracing::warn!(key = %key, "Gate permit dropped outside a runtime; left to expire");
            }
        }
    }
}

async fn release_quietly(gate: Arc<dyn CoordinationGate>, key: GateKey, owner: OwnerToken) {
    match gate.release_gate(key.clone(), owner).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(key = %key, "Gate expired and was taken over before release");
        }
        Err(err) => {
            ArbitrationMetrics::record_gate_release_failure();
            tracing::warn!(key = %key, error = %err, "Gate release failed; entry will expire");
        }
    }
}

/// Gate first, then a single compare-and-swap.
pub struct GateAdmission {
    gate: Arc<dyn CoordinationGate>,
    gate_ttl: Duration,
}

impl GateAdmission {
    /// Create a gate admission strategy. `gate_ttl` bounds how long a crashed
    /// confirmer can block a resource.
    #[must_use]
    pub fn new(gate: Arc<dyn CoordinationGate>, gate_ttl: Duration) -> Self {
        Self { gate, gate_ttl }
    }

    /// The configured gate TTL.
    #[must_use]
    pub const fn gate_ttl(&self) -> Duration {
        self.gate_ttl
    }
}

impl AdmissionStrategy for GateAdmission {
    fn admit<'a>(
        &'a self,
        store: &'a dyn ResourceStore,
        clock: &'a dyn Clock,
        resource_id: &'a ResourceId,
        holder: &'a HolderId,
    ) -> AdmissionFuture<'a> {
        Box::pin(async move {
            let key = GateKey::for_resource(resource_id);
            let owner = OwnerToken::for_attempt(holder);

            if !self.gate.acquire_gate(key.clone(), owner.clone(), self.gate_ttl).await? {
                return Err(ArbitrationError::ContentionLost(resource_id.clone()));
            }
            let permit = AdmissionPermit::new(Arc::clone(&self.gate), key, owner);

            match attempt_flip(store, clock, resource_id, holder).await {
                Ok(Flip::Done(admission)) => Ok(Admitted::gated(admission, permit)),
                Ok(Flip::Lost) => {
                    let err = lost_flip_error(store, clock, resource_id, holder).await;
                    permit.release().await;
                    Err(err)
                }
                Err(err) => {
                    permit.release().await;
                    Err(err)
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "gate"
    }
}

enum OptimisticError {
    Lost,
    Rejected(ArbitrationError),
}

impl fmt::Display for OptimisticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lost => f.write_str("compare-and-swap lost"),
            Self::Rejected(err) => write!(f, "{err}"),
        }
    }
}

/// Compare-and-swap with re-read and jittered retry, no gate.
pub struct OptimisticAdmission {
    retry_policy: RetryPolicy,
}

impl OptimisticAdmission {
    /// Create an optimistic admission strategy.
    #[must_use]
    pub const fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    /// The configured retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl AdmissionStrategy for OptimisticAdmission {
    fn admit<'a>(
        &'a self,
        store: &'a dyn ResourceStore,
        clock: &'a dyn Clock,
        resource_id: &'a ResourceId,
        holder: &'a HolderId,
    ) -> AdmissionFuture<'a> {
        Box::pin(async move {
            let result = retry_with_predicate(
                &self.retry_policy,
                move || async move {
                    match attempt_flip(store, clock, resource_id, holder).await {
                        Ok(Flip::Done(admission)) => Ok(admission),
                        Ok(Flip::Lost) => Err(OptimisticError::Lost),
                        Err(err) => Err(OptimisticError::Rejected(err)),
                    }
                },
                |err| matches!(err, OptimisticError::Lost),
            )
            .await;

            match result {
                Ok(admission) => Ok(Admitted::ungated(admission)),
                Err(OptimisticError::Lost) => Err(ArbitrationError::ContentionLost(resource_id.clone())),
                Err(OptimisticError::Rejected(err)) => Err(err),
            }
        })
    }

    fn name(&self) -> &'static str {
        "optimistic"
    }
}
