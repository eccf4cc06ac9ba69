//! TTL-backed first-writer-wins gate.
//!
//! The gate short-circuits contention before the durable store is touched:
//! of many concurrent confirmers only the one that wins `acquire_gate` goes on
//! to attempt the compare-and-swap. Every entry carries a TTL, so a gate left
//! behind by a crashed process heals on its own.

use crate::ids::{HolderId, ResourceId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Key under which a resource's gate entry is stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GateKey(String);

impl GateKey {
    /// The gate key for a resource: `"resource:" + id`.
    #[must_use]
    pub fn for_resource(resource_id: &ResourceId) -> Self {
        Self(format!("resource:{resource_id}"))
    }

    /// Wrap an arbitrary key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as stored in the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value written into a gate entry, identifying who holds it.
///
/// Tokens for confirm attempts are the holder id plus a per-attempt nonce, so
/// two overlapping attempts by the same holder never release each other's
/// entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// A fresh token for one attempt by `holder`.
    #[must_use]
    pub fn for_attempt(holder: &HolderId) -> Self {
        Self(format!("{holder}:{}", Uuid::new_v4().simple()))
    }

    /// Wrap an existing token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as stored in the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur talking to the gate backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The backend could not be reached or rejected the command.
    #[error("Gate backend error: {0}")]
    Backend(String),

    /// A zero TTL was requested; every entry must expire.
    #[error("Gate TTL must be non-zero")]
    ZeroTtl,
}

/// Boxed future returned by [`CoordinationGate`] methods.
pub type GateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GateError>> + Send + 'a>>;

/// A fast, shared set-if-absent facility with mandatory expiry.
pub trait CoordinationGate: Send + Sync {
    /// Set `key = owner` only if the key is absent or expired.
    ///
    /// Returns `true` iff this call won the set.
    ///
    /// # Errors
    ///
    /// - [`GateError::ZeroTtl`] if `ttl` is zero
    /// - [`GateError::Backend`] on backend failure
    fn acquire_gate(&self, key: GateKey, owner: OwnerToken, ttl: Duration) -> GateFuture<'_, bool>;

    /// Delete `key` only if its value equals `owner`.
    ///
    /// Returns `true` if the entry was deleted or was already absent, and
    /// `false` if it is held by a different owner (left untouched).
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Backend`] on backend failure.
    fn release_gate(&self, key: GateKey, owner: OwnerToken) -> GateFuture<'_, bool>;

    /// The current, unexpired owner of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Backend`] on backend failure.
    fn current_owner(&self, key: GateKey) -> GateFuture<'_, Option<OwnerToken>>;
}
