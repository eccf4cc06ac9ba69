//! Resource data model and the conditional transitions that mutate it.
//!
//! A resource is always in exactly one of three states. Holds live on the
//! resource row itself: a `HELD` resource carries the holder and the instant
//! the hold expires. Every mutation is expressed as a [`Transition`], which
//! only applies if the stored state and revision match what the caller last
//! observed.
//!
//! ```text
//!              acquire_hold               confirm
//! AVAILABLE ───────────────▶ HELD ─────────────────▶ ACQUIRED
//!     ▲   ◀─── expire / release ─┘                     │
//!     └──────────────────── cancel ────────────────────┘
//! ```

use crate::ids::{HolderId, ResourceId, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// The three states a resource can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    /// Free for anyone to hold or confirm.
    Available,
    /// Claimed by a time-boxed hold.
    Held,
    /// Confirmed; exactly one `CONFIRMED` ledger entry references it.
    Acquired,
}

impl ResourceState {
    /// The canonical upper-case name, as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Held => "HELD",
            Self::Acquired => "ACQUIRED",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown resource state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for ResourceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(Self::Available),
            "HELD" => Ok(Self::Held),
            "ACQUIRED" => Ok(Self::Acquired),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A point-in-time snapshot of one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identity.
    pub id: ResourceId,
    /// Stored state.
    pub state: ResourceState,
    /// Owner of the hold or acquisition; `None` when `AVAILABLE`.
    pub holder: Option<HolderId>,
    /// Set only while `HELD`.
    pub hold_expires_at: Option<DateTime<Utc>>,
    /// Incremented on every successful transition.
    pub revision: Revision,
}

impl Resource {
    /// A freshly provisioned resource.
    #[must_use]
    pub const fn available(id: ResourceId) -> Self {
        Self {
            id,
            state: ResourceState::Available,
            holder: None,
            hold_expires_at: None,
            revision: Revision::INITIAL,
        }
    }

    /// Whether this resource carries a hold whose expiry has passed.
    ///
    /// A hold expires at exactly `hold_expires_at`; at that instant it is
    /// already reclaimable.
    #[must_use]
    pub fn hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == ResourceState::Held && self.hold_expires_at.is_none_or(|at| at <= now)
    }

    /// The holder whose claim is currently in force, if any.
    ///
    /// Returns the acquirer for `ACQUIRED`, the holder for an unexpired
    /// `HELD`, and `None` otherwise.
    #[must_use]
    pub fn active_holder(&self, now: DateTime<Utc>) -> Option<&HolderId> {
        match self.state {
            ResourceState::Available => None,
            ResourceState::Held if self.hold_expired(now) => None,
            ResourceState::Held | ResourceState::Acquired => self.holder.as_ref(),
        }
    }

    /// The state a reader should see at `now`.
    ///
    /// An expired hold reads as `AVAILABLE` even before the reclaimer has
    /// written the transition back.
    #[must_use]
    pub fn observed_state(&self, now: DateTime<Utc>) -> ResourceState {
        if self.hold_expired(now) {
            ResourceState::Available
        } else {
            self.state
        }
    }

    /// A copy of this snapshot as a reader should see it at `now`.
    ///
    /// The revision is left untouched so callers can still use it as the
    /// expected revision of a subsequent transition.
    #[must_use]
    pub fn observed(&self, now: DateTime<Utc>) -> Self {
        if self.hold_expired(now) {
            Self {
                state: ResourceState::Available,
                holder: None,
                hold_expires_at: None,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }

    /// Whether `holder` currently owns this resource as `ACQUIRED`.
    #[must_use]
    pub fn is_acquired_by(&self, holder: &HolderId) -> bool {
        self.state == ResourceState::Acquired && self.holder.as_ref() == Some(holder)
    }
}

/// A conditional state change.
///
/// The transition applies only if the stored state equals `from` and the
/// stored revision equals `expected_revision`. On success the resource takes
/// on `to`, `holder` and `hold_expires_at`, and its revision is incremented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Required current state.
    pub from: ResourceState,
    /// State after the transition.
    pub to: ResourceState,
    /// Required current revision.
    pub expected_revision: Revision,
    /// Holder after the transition.
    pub holder: Option<HolderId>,
    /// Hold expiry after the transition.
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl Transition {
    /// Place (or refresh) a hold for `holder` until `expires_at`.
    #[must_use]
    pub const fn hold(
        from: ResourceState,
        expected_revision: Revision,
        holder: HolderId,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            from,
            to: ResourceState::Held,
            expected_revision,
            holder: Some(holder),
            hold_expires_at: Some(expires_at),
        }
    }

    /// Confirm the resource for `holder`, clearing any hold expiry.
    #[must_use]
    pub const fn acquire(from: ResourceState, expected_revision: Revision, holder: HolderId) -> Self {
        Self {
            from,
            to: ResourceState::Acquired,
            expected_revision,
            holder: Some(holder),
            hold_expires_at: None,
        }
    }

    /// Return the resource to `AVAILABLE`.
    #[must_use]
    pub const fn release(from: ResourceState, expected_revision: Revision) -> Self {
        Self {
            from,
            to: ResourceState::Available,
            expected_revision,
            holder: None,
            hold_expires_at: None,
        }
    }

    /// Apply this transition to `current`, returning the new snapshot if the
    /// state and revision match.
    ///
    /// This is the in-process compare-and-swap; durable stores express the
    /// same check as a single conditional `UPDATE`.
    #[must_use]
    pub fn apply(&self, current: &Resource) -> Option<Resource> {
        if current.state != self.from || current.revision != self.expected_revision {
            return None;
        }
        Some(Resource {
            id: current.id.clone(),
            state: self.to,
            holder: self.holder.clone(),
            hold_expires_at: self.hold_expires_at,
            revision: current.revision.next(),
        })
    }
}

/// Compute the instant `ttl` after `now`.
///
/// Saturates at the largest representable instant instead of overflowing.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A digest over the observed state of every resource.
///
/// Pollers compare fingerprints to learn whether anything changed without
/// transferring the full listing. The digest covers `(id, observed state,
/// revision)` in id order, so it changes whenever any resource transitions
/// or a hold lapses.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFingerprint(String);

impl StateFingerprint {
    /// Compute the fingerprint of `resources` as observed at `now`.
    #[must_use]
    pub fn compute(resources: &[Resource], now: DateTime<Utc>) -> Self {
        let mut sorted: Vec<&Resource> = resources.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        for resource in sorted {
            hasher.update(resource.id.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(resource.observed_state(now).as_str().as_bytes());
            hasher.update(b":");
            hasher.update(resource.revision.value().to_be_bytes());
            hasher.update(b"\n");
        }

        let digest = hasher.finalize();
        let hex = digest.iter().fold(String::with_capacity(64), |mut acc, byte| {
            use std::fmt::Write;
            let _ = write!(acc, "{byte:02x}");
            acc
        });
        Self(hex)
    }

    /// The hex-encoded digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn held(by: &str, expires_at: DateTime<Utc>) -> Resource {
        Resource {
            id: ResourceId::new("seat-1"),
            state: ResourceState::Held,
            holder: Some(HolderId::new(by)),
            hold_expires_at: Some(expires_at),
            revision: Revision::new(1),
        }
    }

    #[test]
    fn state_names_round_trip() {
        for state in [ResourceState::Available, ResourceState::Held, ResourceState::Acquired] {
            assert_eq!(state.as_str().parse::<ResourceState>(), Ok(state));
        }
        assert!("RESERVED".parse::<ResourceState>().is_err());
    }

    #[test]
    fn active_hold_is_reported() {
        let resource = held("alice", t0() + chrono::Duration::seconds(30));
        assert_eq!(resource.active_holder(t0()), Some(&HolderId::new("alice")));
        assert_eq!(resource.observed_state(t0()), ResourceState::Held);
    }

    #[test]
    fn hold_expires_at_its_deadline() {
        let deadline = t0() + chrono::Duration::seconds(30);
        let resource = held("alice", deadline);

        assert!(!resource.hold_expired(deadline - chrono::Duration::milliseconds(1)));
        assert!(resource.hold_expired(deadline));
        assert_eq!(resource.active_holder(deadline), None);
    }

    #[test]
    fn expired_hold_is_observed_as_available() {
        let resource = held("alice", t0());
        let observed = resource.observed(t0() + chrono::Duration::seconds(1));

        assert_eq!(observed.state, ResourceState::Available);
        assert_eq!(observed.holder, None);
        assert_eq!(observed.revision, resource.revision);
    }

    #[test]
    fn transition_applies_on_match() {
        let resource = Resource::available(ResourceId::new("seat-1"));
        let next = Transition::acquire(ResourceState::Available, Revision::INITIAL, HolderId::new("bob"))
            .apply(&resource)
            .unwrap();

        assert_eq!(next.state, ResourceState::Acquired);
        assert_eq!(next.revision, Revision::new(1));
        assert!(next.is_acquired_by(&HolderId::new("bob")));
    }

    #[test]
    fn transition_rejects_stale_revision() {
        let resource = held("alice", t0());
        let stale = Transition::release(ResourceState::Held, Revision::INITIAL);
        assert!(stale.apply(&resource).is_none());
    }

    #[test]
    fn transition_rejects_wrong_state() {
        let resource = Resource::available(ResourceId::new("seat-1"));
        let wrong = Transition::release(ResourceState::Acquired, Revision::INITIAL);
        assert!(wrong.apply(&resource).is_none());
    }

    #[test]
    fn expiry_after_saturates() {
        assert_eq!(expiry_after(t0(), Duration::from_secs(5)), t0() + chrono::Duration::seconds(5));
        assert_eq!(expiry_after(t0(), Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = Resource::available(ResourceId::new("seat-1"));
        let b = Resource::available(ResourceId::new("seat-2"));

        let one = StateFingerprint::compute(&[a.clone(), b.clone()], t0());
        let two = StateFingerprint::compute(&[b, a], t0());
        assert_eq!(one, two);
        assert_eq!(one.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_changes_when_hold_lapses() {
        let resource = held("alice", t0() + chrono::Duration::seconds(10));
        let before = StateFingerprint::compute(std::slice::from_ref(&resource), t0());
        let after = StateFingerprint::compute(
            std::slice::from_ref(&resource),
            t0() + chrono::Duration::seconds(10),
        );
        assert_ne!(before, after);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn successful_transitions_bump_revision_by_one(
                start in 0_u64..1_000_000,
                steps in proptest::collection::vec(0_u8..3, 1..50),
            ) {
                let mut resource = Resource {
                    revision: Revision::new(start),
                    ..Resource::available(ResourceId::new("seat-p"))
                };
                let holder = HolderId::new("h");

                for step in steps {
                    let transition = match step {
                        0 => Transition::hold(resource.state, resource.revision, holder.clone(), t0()),
                        1 => Transition::acquire(resource.state, resource.revision, holder.clone()),
                        _ => Transition::release(resource.state, resource.revision),
                    };
                    let before = resource.revision;
                    if let Some(next) = transition.apply(&resource) {
                        prop_assert_eq!(next.revision.value(), before.value() + 1);
                        resource = next;
                    }
                }
            }

            #[test]
            fn fingerprint_distinguishes_revisions(rev_a in 0_u64..10_000, rev_b in 0_u64..10_000) {
                let a = Resource { revision: Revision::new(rev_a), ..Resource::available(ResourceId::new("s")) };
                let b = Resource { revision: Revision::new(rev_b), ..Resource::available(ResourceId::new("s")) };
                let same = StateFingerprint::compute(&[a], t0()) == StateFingerprint::compute(&[b], t0());
                prop_assert_eq!(same, rev_a == rev_b);
            }
        }
    }
}
