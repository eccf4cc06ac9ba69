//! In-memory backends for the three storage seams.
//!
//! - [`InMemoryResourceStore`]: `BTreeMap` of resources; each transition is a
//!   compare-and-swap under one mutex
//! - [`InMemoryCoordinationGate`]: key → (owner, expiry), expiry measured on
//!   an injected clock
//! - [`InMemoryReservationLedger`]: append-only `Vec` of entries
//!
//! All three are cheap to clone (shared `Arc` state) and are also what the
//! `memory` backend of the seats daemon runs on. A poisoned mutex is
//! recovered rather than propagated: every critical section leaves the map
//! consistent before it can panic.

use chrono::{DateTime, Utc};
use seatlock_core::environment::{Clock, SystemClock};
use seatlock_core::gate::{CoordinationGate, GateError, GateFuture, GateKey, OwnerToken};
use seatlock_core::ids::{AcquisitionId, HolderId, ResourceId};
use seatlock_core::ledger::{Acquisition, AcquisitionStatus, LedgerError, LedgerFuture, ReservationLedger};
use seatlock_core::resource::{Resource, ResourceState, Transition, expiry_after};
use seatlock_core::store::{ResourceStore, StoreError, StoreFuture};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory resource store.
///
/// # Example
///
/// ```
/// use seatlock_core::ids::{HolderId, ResourceId};
/// use seatlock_core::resource::{ResourceState, Transition};
/// use seatlock_core::store::ResourceStore;
/// use seatlock_testing::InMemoryResourceStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryResourceStore::with_resources(["seat-1"]);
/// let seat = ResourceId::new("seat-1");
///
/// let current = store.read(seat.clone()).await?;
/// let won = store
///     .try_transition(seat.clone(), Transition::acquire(current.state, current.revision, HolderId::new("a")))
///     .await?;
/// assert!(won);
/// assert_eq!(store.read(seat).await?.state, ResourceState::Acquired);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryResourceStore {
    resources: Arc<Mutex<BTreeMap<ResourceId, Resource>>>,
}

impl InMemoryResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given resources provisioned as `AVAILABLE`.
    #[must_use]
    pub fn with_resources<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut resources = lock(&store.resources);
            for id in ids {
                let id = ResourceId::new(id);
                resources.insert(id.clone(), Resource::available(id));
            }
        }
        store
    }

    /// Overwrite a resource verbatim, bypassing the compare-and-swap.
    ///
    /// For arranging test fixtures only.
    pub fn put(&self, resource: Resource) {
        lock(&self.resources).insert(resource.id.clone(), resource);
    }

    /// Snapshot of one resource, if present.
    #[must_use]
    pub fn get(&self, resource_id: &ResourceId) -> Option<Resource> {
        lock(&self.resources).get(resource_id).cloned()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.resources).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.resources).is_empty()
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn try_transition(&self, resource_id: ResourceId, transition: Transition) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut resources = lock(&self.resources);
            let current = resources
                .get(&resource_id)
                .ok_or_else(|| StoreError::NotFound(resource_id.clone()))?;

            match transition.apply(current) {
                Some(next) => {
                    resources.insert(resource_id, next);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn read(&self, resource_id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            lock(&self.resources)
                .get(&resource_id)
                .cloned()
                .ok_or(StoreError::NotFound(resource_id))
        })
    }

    fn provision(&self, resource_id: ResourceId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut resources = lock(&self.resources);
            if resources.contains_key(&resource_id) {
                return Ok(false);
            }
            resources.insert(resource_id.clone(), Resource::available(resource_id));
            Ok(true)
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move { Ok(lock(&self.resources).values().cloned().collect()) })
    }

    fn expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            Ok(lock(&self.resources)
                .values()
                .filter(|r| r.state == ResourceState::Held && r.hold_expired(now))
                .cloned()
                .collect())
        })
    }
}

/// In-memory coordination gate with clock-driven expiry.
#[derive(Clone)]
pub struct InMemoryCoordinationGate {
    entries: Arc<Mutex<HashMap<GateKey, (OwnerToken, DateTime<Utc>)>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryCoordinationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCoordinationGate")
            .field("entries", &lock(&self.entries).len())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCoordinationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationGate {
    /// A gate measuring expiry on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A gate measuring expiry on `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of unexpired entries.
    #[must_use]
    pub fn active_entries(&self) -> usize {
        let now = self.clock.now();
        lock(&self.entries).values().filter(|(_, expires_at)| *expires_at > now).count()
    }
}

impl CoordinationGate for InMemoryCoordinationGate {
    fn acquire_gate(&self, key: GateKey, owner: OwnerToken, ttl: Duration) -> GateFuture<'_, bool> {
        Box::pin(async move {
            if ttl.is_zero() {
                return Err(GateError::ZeroTtl);
            }
            let now = self.clock.now();
            let mut entries = lock(&self.entries);
            if let Some((_, expires_at)) = entries.get(&key) {
                if *expires_at > now {
                    return Ok(false);
                }
            }
            entries.insert(key, (owner, expiry_after(now, ttl)));
            Ok(true)
        })
    }

    fn release_gate(&self, key: GateKey, owner: OwnerToken) -> GateFuture<'_, bool> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = lock(&self.entries);
            let released = match entries.get(&key) {
                None => return Ok(true),
                Some((current, expires_at)) => *expires_at <= now || *current == owner,
            };
            if released {
                entries.remove(&key);
            }
            Ok(released)
        })
    }

    fn current_owner(&self, key: GateKey) -> GateFuture<'_, Option<OwnerToken>> {
        Box::pin(async move {
            let now = self.clock.now();
            Ok(lock(&self.entries)
                .get(&key)
                .filter(|(_, expires_at)| *expires_at > now)
                .map(|(owner, _)| owner.clone()))
        })
    }
}

/// In-memory reservation ledger.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReservationLedger {
    entries: Arc<Mutex<Vec<Acquisition>>>,
}

impl InMemoryReservationLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<Acquisition> {
        lock(&self.entries).clone()
    }

    /// Number of `CONFIRMED` entries for a resource.
    #[must_use]
    pub fn confirmed_count(&self, resource_id: &ResourceId) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| &e.resource_id == resource_id && e.is_confirmed())
            .count()
    }
}

impl ReservationLedger for InMemoryReservationLedger {
    fn record(&self, resource_id: ResourceId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, AcquisitionId> {
        Box::pin(async move {
            let mut entries = lock(&self.entries);
            if let Some(existing) = entries.iter().find(|e| e.resource_id == resource_id && e.is_confirmed()) {
                if existing.holder == holder {
                    return Ok(existing.id);
                }
                return Err(LedgerError::Conflict {
                    resource_id,
                    existing_holder: existing.holder.clone(),
                });
            }
            let entry = Acquisition::confirmed(resource_id, holder, at);
            let id = entry.id;
            entries.push(entry);
            Ok(id)
        })
    }

    fn cancel(&self, acquisition_id: AcquisitionId, holder: HolderId, at: DateTime<Utc>) -> LedgerFuture<'_, ()> {
        Box::pin(async move {
            let mut entries = lock(&self.entries);
            let entry = entries
                .iter_mut()
                .find(|e| e.id == acquisition_id)
                .ok_or(LedgerError::NotFound(acquisition_id))?;

            if entry.holder != holder {
                return Err(LedgerError::Unauthorized { acquisition_id, holder });
            }
            if entry.status == AcquisitionStatus::Confirmed {
                entry.status = AcquisitionStatus::Cancelled;
                entry.cancelled_at = Some(at);
            }
            Ok(())
        })
    }

    fn find_active(&self, resource_id: ResourceId) -> LedgerFuture<'_, Option<Acquisition>> {
        Box::pin(async move {
            Ok(lock(&self.entries)
                .iter()
                .find(|e| e.resource_id == resource_id && e.is_confirmed())
                .cloned())
        })
    }

    fn get(&self, acquisition_id: AcquisitionId) -> LedgerFuture<'_, Option<Acquisition>> {
        Box::pin(async move { Ok(lock(&self.entries).iter().find(|e| e.id == acquisition_id).cloned()) })
    }

    fn history(&self, resource_id: ResourceId) -> LedgerFuture<'_, Vec<Acquisition>> {
        Box::pin(async move {
            Ok(lock(&self.entries)
                .iter()
                .filter(|e| e.resource_id == resource_id)
                .cloned()
                .collect())
        })
    }

    fn holder_acquisitions(&self, holder: HolderId) -> LedgerFuture<'_, Vec<Acquisition>> {
        Box::pin(async move {
            Ok(lock(&self.entries)
                .iter()
                .filter(|e| e.holder == holder)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::{ManualClock, test_clock};
    use seatlock_core::ids::Revision;

    fn seat() -> ResourceId {
        ResourceId::new("seat-1")
    }

    mod store_tests {
        use super::*;

        #[tokio::test]
        async fn read_unknown_is_not_found() {
            let store = InMemoryResourceStore::new();
            let err = store.read(seat()).await.unwrap_err();
            assert_eq!(err, StoreError::NotFound(seat()));
        }

        #[tokio::test]
        async fn transition_on_unknown_is_not_found() {
            let store = InMemoryResourceStore::new();
            let transition = Transition::release(ResourceState::Held, Revision::INITIAL);
            assert!(store.try_transition(seat(), transition).await.is_err());
        }

        #[tokio::test]
        async fn stale_revision_loses() {
            let store = InMemoryResourceStore::with_resources(["seat-1"]);
            let a = Transition::acquire(ResourceState::Available, Revision::INITIAL, HolderId::new("a"));
            let b = Transition::acquire(ResourceState::Available, Revision::INITIAL, HolderId::new("b"));

            assert!(store.try_transition(seat(), a).await.unwrap());
            assert!(!store.try_transition(seat(), b).await.unwrap());

            let current = store.get(&seat()).unwrap();
            assert_eq!(current.holder, Some(HolderId::new("a")));
            assert_eq!(current.revision, Revision::new(1));
        }

        #[tokio::test]
        async fn provision_is_idempotent() {
            let store = InMemoryResourceStore::new();
            assert!(store.provision(seat()).await.unwrap());
            assert!(!store.provision(seat()).await.unwrap());
            assert_eq!(store.len(), 1);
        }

        #[tokio::test]
        async fn list_is_ordered_by_id() {
            let store = InMemoryResourceStore::with_resources(["seat-3", "seat-1", "seat-2"]);
            let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.id.into_inner()).collect();
            assert_eq!(ids, vec!["seat-1", "seat-2", "seat-3"]);
        }

        #[tokio::test]
        async fn expired_holds_only_returns_lapsed_holds() {
            let now = test_clock().now();
            let store = InMemoryResourceStore::with_resources(["seat-1", "seat-2"]);
            store.put(Resource {
                state: ResourceState::Held,
                holder: Some(HolderId::new("a")),
                hold_expires_at: Some(now),
                revision: Revision::new(1),
                ..Resource::available(ResourceId::new("seat-1"))
            });
            store.put(Resource {
                state: ResourceState::Held,
                holder: Some(HolderId::new("b")),
                hold_expires_at: Some(now + chrono::Duration::seconds(1)),
                revision: Revision::new(1),
                ..Resource::available(ResourceId::new("seat-2"))
            });

            let expired = store.expired_holds(now).await.unwrap();
            assert_eq!(expired.len(), 1);
            assert_eq!(expired[0].id, ResourceId::new("seat-1"));
        }
    }

    mod gate_tests {
        use super::*;

        fn gate() -> (InMemoryCoordinationGate, ManualClock) {
            let clock = ManualClock::new(test_clock().now());
            (InMemoryCoordinationGate::with_clock(Arc::new(clock.clone())), clock)
        }

        #[tokio::test]
        async fn first_writer_wins() {
            let (gate, _) = gate();
            let key = GateKey::new("resource:seat-1");
            let ttl = Duration::from_secs(30);

            assert!(gate.acquire_gate(key.clone(), OwnerToken::new("a"), ttl).await.unwrap());
            assert!(!gate.acquire_gate(key.clone(), OwnerToken::new("b"), ttl).await.unwrap());
            assert_eq!(gate.current_owner(key).await.unwrap(), Some(OwnerToken::new("a")));
        }

        #[tokio::test]
        async fn expired_entry_can_be_taken_over() {
            let (gate, clock) = gate();
            let key = GateKey::new("resource:seat-1");

            assert!(gate.acquire_gate(key.clone(), OwnerToken::new("a"), Duration::from_secs(30)).await.unwrap());
            clock.advance(Duration::from_secs(30));
            assert!(gate.acquire_gate(key.clone(), OwnerToken::new("b"), Duration::from_secs(30)).await.unwrap());
        }

        #[tokio::test]
        async fn release_requires_matching_owner() {
            let (gate, clock) = gate();
            let key = GateKey::new("resource:seat-1");
            let ttl = Duration::from_secs(30);

            gate.acquire_gate(key.clone(), OwnerToken::new("a"), ttl).await.unwrap();
            clock.advance(ttl);
            gate.acquire_gate(key.clone(), OwnerToken::new("b"), ttl).await.unwrap();

            // a's entry expired and b took over; a must not release b's entry.
            assert!(!gate.release_gate(key.clone(), OwnerToken::new("a")).await.unwrap());
            assert_eq!(gate.active_entries(), 1);

            assert!(gate.release_gate(key.clone(), OwnerToken::new("b")).await.unwrap());
            assert!(gate.release_gate(key, OwnerToken::new("b")).await.unwrap());
            assert_eq!(gate.active_entries(), 0);
        }

        #[tokio::test]
        async fn zero_ttl_is_rejected() {
            let (gate, _) = gate();
            let err = gate
                .acquire_gate(GateKey::new("k"), OwnerToken::new("a"), Duration::ZERO)
                .await
                .unwrap_err();
            assert_eq!(err, GateError::ZeroTtl);
        }
    }

    mod ledger_tests {
        use super::*;

        #[tokio::test]
        async fn record_is_idempotent_for_the_owner() {
            let ledger = InMemoryReservationLedger::new();
            let now = test_clock().now();
            let first = ledger.record(seat(), HolderId::new("a"), now).await.unwrap();
            let second = ledger.record(seat(), HolderId::new("a"), now).await.unwrap();

            assert_eq!(first, second);
            assert_eq!(ledger.confirmed_count(&seat()), 1);
        }

        #[tokio::test]
        async fn record_conflicts_for_another_holder() {
            let ledger = InMemoryReservationLedger::new();
            let now = test_clock().now();
            ledger.record(seat(), HolderId::new("a"), now).await.unwrap();

            let err = ledger.record(seat(), HolderId::new("b"), now).await.unwrap_err();
            assert!(matches!(err, LedgerError::Conflict { .. }));
        }

        #[tokio::test]
        async fn cancel_checks_holder_and_is_idempotent() {
            let ledger = InMemoryReservationLedger::new();
            let now = test_clock().now();
            let id = ledger.record(seat(), HolderId::new("a"), now).await.unwrap();

            let err = ledger.cancel(id, HolderId::new("b"), now).await.unwrap_err();
            assert!(matches!(err, LedgerError::Unauthorized { .. }));

            ledger.cancel(id, HolderId::new("a"), now).await.unwrap();
            ledger.cancel(id, HolderId::new("a"), now).await.unwrap();

            let entry = ledger.get(id).await.unwrap().unwrap();
            assert_eq!(entry.status, AcquisitionStatus::Cancelled);
            assert_eq!(entry.cancelled_at, Some(now));
            assert!(ledger.find_active(seat()).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn cancel_unknown_is_not_found() {
            let ledger = InMemoryReservationLedger::new();
            let id = AcquisitionId::new();
            let err = ledger.cancel(id, HolderId::new("a"), test_clock().now()).await.unwrap_err();
            assert_eq!(err, LedgerError::NotFound(id));
        }

        #[tokio::test]
        async fn history_and_holder_listing() {
            let ledger = InMemoryReservationLedger::new();
            let now = test_clock().now();
            let first = ledger.record(seat(), HolderId::new("a"), now).await.unwrap();
            ledger.cancel(first, HolderId::new("a"), now).await.unwrap();
            ledger.record(seat(), HolderId::new("b"), now).await.unwrap();
            ledger.record(ResourceId::new("seat-2"), HolderId::new("a"), now).await.unwrap();

            let history = ledger.history(seat()).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].id, first);

            let mine = ledger.holder_acquisitions(HolderId::new("a")).await.unwrap();
            assert_eq!(mine.len(), 2);
        }
    }
}
