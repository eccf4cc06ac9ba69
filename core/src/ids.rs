//! Strongly typed identifiers and the resource revision counter.
//!
//! `ResourceId` and `HolderId` are opaque strings supplied by the calling layer
//! (seat numbers, member ids, session tokens). `AcquisitionId` is generated by
//! the ledger. `Revision` is the per-resource monotonic counter that every
//! conditional update is checked against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: {reason}")]
pub struct ParseIdError {
    kind: &'static str,
    reason: String,
}

/// Declares a string-backed identifier newtype.
///
/// `FromStr` validates (rejects empty and whitespace-only input); `new()` and
/// `From` do not, and are meant for application-controlled values.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` without validation.")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert into the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(ParseIdError {
                        kind: $kind,
                        reason: "cannot be empty".to_string(),
                    });
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identity of a contended resource (a seat).
    ///
    /// ```
    /// use seatlock_core::ids::ResourceId;
    ///
    /// let id = ResourceId::new("seat-7");
    /// assert_eq!(id.as_str(), "seat-7");
    /// assert!("".parse::<ResourceId>().is_err());
    /// ```
    ResourceId,
    "resource id"
);

string_id!(
    /// Identity of a competing client (member, session, user).
    HolderId,
    "holder id"
);

/// Identity of a ledger entry, generated on successful confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcquisitionId(Uuid);

impl AcquisitionId {
    /// Creates a new random `AcquisitionId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AcquisitionId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AcquisitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AcquisitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AcquisitionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
            kind: "acquisition id",
            reason: e.to_string(),
        })
    }
}

/// Per-resource revision used to detect concurrent modification.
///
/// Revisions start at 0 when a resource is provisioned and increase by exactly
/// one on every successful transition. A revision value is never reused for
/// the same resource, so `(resource_id, revision)` names one immutable
/// snapshot.
///
/// ```
/// use seatlock_core::ids::Revision;
///
/// let r0 = Revision::INITIAL;
/// assert_eq!(r0.next(), Revision::new(1));
/// assert!(r0 < r0.next());
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The revision of a freshly provisioned resource.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Revision` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the revision number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The revision a successful transition produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Revision> for u64 {
    fn from(revision: Revision) -> Self {
        revision.0
    }
}
