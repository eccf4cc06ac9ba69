//! Time-boxed holds placed on a resource ahead of confirmation.
//!
//! Holds are stored on the resource itself (`HELD` + holder + expiry), so every
//! hold mutation is a conditional transition through the [`ResourceStore`]. An
//! expired hold is treated as absent: the next caller may take it over, and
//! the reclaimer writes it back to `AVAILABLE` in the background.
//!
//! Lost compare-and-swaps are re-evaluated against a fresh read a bounded
//! number of times; a caller never waits on another caller.

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::ids::{HolderId, ResourceId, Revision};
use seatlock_core::resource::{Resource, ResourceState, Transition, expiry_after};
use seatlock_core::store::ResourceStore;
use seatlock_core::ArbitrationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Re-reads allowed after losing a compare-and-swap before giving up.
const MAX_CAS_ATTEMPTS: usize = 16;

/// A hold as seen by its holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// The held resource.
    pub resource_id: ResourceId,
    /// The holder.
    pub holder: HolderId,
    /// When the hold lapses; `None` if the holder already acquired the resource.
    pub expires_at: Option<DateTime<Utc>>,
    /// Resource revision after the hold was written.
    pub revision: Revision,
}

/// Outcome of [`HoldManager::acquire_hold`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HoldResult {
    /// A new hold was placed.
    Granted(Hold),
    /// The caller already held (or owned) the resource; a hold's expiry was
    /// refreshed.
    AlreadyHeldBySelf(Hold),
    /// Another holder has an active claim.
    RejectedHeldByOther,
}

impl HoldResult {
    /// Whether the caller ends up holding the resource.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Granted(_) | Self::AlreadyHeldBySelf(_))
    }

    /// The hold, unless rejected.
    #[must_use]
    pub const fn hold(&self) -> Option<&Hold> {
        match self {
            Self::Granted(hold) | Self::AlreadyHeldBySelf(hold) => Some(hold),
            Self::RejectedHeldByOther => None,
        }
    }
}

/// Whether `holder` may confirm `resource` ahead of everyone else at `now`.
///
/// True unless some *other* holder has an unexpired hold. Callers without a
/// hold may therefore race for an unheld resource; acquisition by someone
/// else is detected later by the compare-and-swap, not here.
#[must_use]
pub fn holder_has_priority(resource: &Resource, holder: &HolderId, now: DateTime<Utc>) -> bool {
    match resource.state {
        ResourceState::Held if !resource.hold_expired(now) => resource.holder.as_ref() == Some(holder),
        _ => true,
    }
}

/// Manages holds on top of a resource store.
pub struct HoldManager {
    store: Arc<dyn ResourceStore>,
    clock: Arc<dyn Clock>,
}

impl HoldManager {
    /// Create a hold manager.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Place or refresh a hold for `holder`.
    ///
    /// - no active claim: a new hold until `now + ttl` (`Granted`)
    /// - caller's own unexpired hold: expiry refreshed (`AlreadyHeldBySelf`)
    /// - caller already acquired the resource: unchanged (`AlreadyHeldBySelf`)
    /// - another holder's unexpired hold or acquisition: `RejectedHeldByOther`
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::InvalidTtl`] if `ttl` is zero
    /// - [`ArbitrationError::ResourceNotFound`] if the resource is unknown
    /// - [`ArbitrationError::ContentionLost`] if the resource kept changing
    ///   under the caller
    pub async fn acquire_hold(
        &self,
        resource_id: &ResourceId,
        holder: &HolderId,
        ttl: Duration,
    ) -> Result<HoldResult, ArbitrationError> {
        if ttl.is_zero() {
            return Err(ArbitrationError::InvalidTtl);
        }

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.read(resource_id.clone()).await?;
            let now = self.clock.now();

            let refresh = match current.active_holder(now) {
                Some(owner) if owner != holder => return Ok(HoldResult::RejectedHeldByOther),
                Some(_) if current.state == ResourceState::Acquired => {
                    return Ok(HoldResult::AlreadyHeldBySelf(Hold {
                        resource_id: resource_id.clone(),
                        holder: holder.clone(),
                        expires_at: None,
                        revision: current.revision,
                    }));
                }
                Some(_) => true,
                None => false,
            };

            let expires_at = expiry_after(now, ttl);
            let transition = Transition::hold(current.state, current.revision, holder.clone(), expires_at);
            if self.store.try_transition(resource_id.clone(), transition).await? {
                let hold = Hold {
                    resource_id: resource_id.clone(),
                    holder: holder.clone(),
                    expires_at: Some(expires_at),
                    revision: current.revision.next(),
                };
                tracing::debug!(
                    resource_id = %resource_id,
                    holder_id = %holder,
                    revision = %hold.revision,
                    refresh,
                    "Hold placed"
                );
                return Ok(if refresh {
                    HoldResult::AlreadyHeldBySelf(hold)
                } else {
                    HoldResult::Granted(hold)
                });
            }

            tracing::trace!(resource_id = %resource_id, attempt, "Hold CAS lost, re-reading");
        }

        Err(ArbitrationError::ContentionLost(resource_id.clone()))
    }

    /// Whether `holder` may confirm the resource now.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::ResourceNotFound`] if the resource is
    /// unknown.
    pub async fn has_priority(&self, resource_id: &ResourceId, holder: &HolderId) -> Result<bool, ArbitrationError> {
        let current = self.store.read(resource_id.clone()).await?;
        Ok(holder_has_priority(&current, holder, self.clock.now()))
    }

    /// Release `holder`'s hold.
    ///
    /// Returns `true` if a hold was cleared and `false` if there was nothing
    /// to release (the resource is `AVAILABLE`, or the caller owns it as
    /// `ACQUIRED` and should cancel instead).
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::Unauthorized`] if another holder holds or owns
    ///   the resource; nothing is changed
    /// - [`ArbitrationError::ResourceNotFound`] if the resource is unknown
    /// - [`ArbitrationError::ContentionLost`] if the resource kept changing
    pub async fn release_hold(&self, resource_id: &ResourceId, holder: &HolderId) -> Result<bool, ArbitrationError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.read(resource_id.clone()).await?;

            match current.state {
                ResourceState::Available => return Ok(false),
                _ if current.holder.as_ref() != Some(holder) => {
                    return Err(ArbitrationError::Unauthorized {
                        holder: holder.clone(),
                        target: format!("hold on {resource_id}"),
                    });
                }
                ResourceState::Acquired => return Ok(false),
                ResourceState::Held => {}
            }

            let transition = Transition::release(ResourceState::Held, current.revision);
            if self.store.try_transition(resource_id.clone(), transition).await? {
                tracing::debug!(resource_id = %resource_id, holder_id = %holder, "Hold released");
                return Ok(true);
            }
        }

        Err(ArbitrationError::ContentionLost(resource_id.clone()))
    }

    /// System-initiated release of an expired hold, bypassing the holder check.
    ///
    /// `snapshot` is the resource as the caller last read it. The release only
    /// happens if the hold is expired at `now` *and* the resource is still at
    /// the snapshot's revision, so a hold refreshed in the meantime survives.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::ResourceNotFound`] or
    /// [`ArbitrationError::Unavailable`] from the store.
    pub async fn reclaim(&self, snapshot: &Resource, now: DateTime<Utc>) -> Result<bool, ArbitrationError> {
        if !snapshot.hold_expired(now) {
            return Ok(false);
        }
        let transition = Transition::release(ResourceState::Held, snapshot.revision);
        Ok(self.store.try_transition(snapshot.id.clone(), transition).await?)
    }

    /// The clock holds are measured against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
