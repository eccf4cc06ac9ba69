//! Durable resource state with an atomic compare-and-swap write path.
//!
//! # Implementations
//!
//! - `PostgresResourceStore` (in `seatlock-postgres`): one conditional `UPDATE`
//!   per transition
//! - `InMemoryResourceStore` (in `seatlock-testing`): mutex-guarded map
//!
//! # Example
//!
//! ```no_run
//! use seatlock_core::ids::{HolderId, ResourceId};
//! use seatlock_core::resource::Transition;
//! use seatlock_core::store::{ResourceStore, StoreError};
//!
//! async fn take(store: &dyn ResourceStore, id: ResourceId) -> Result<bool, StoreError> {
//!     let current = store.read(id.clone()).await?;
//!     let transition = Transition::acquire(current.state, current.revision, HolderId::new("alice"));
//!     store.try_transition(id, transition).await
//! }
//! ```

use crate::ids::ResourceId;
use crate::resource::{Resource, Transition};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during resource store operations.
///
/// There is deliberately no conflict variant: losing a compare-and-swap is
/// reported as `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The resource id is unknown.
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// The backing database failed or returned malformed data.
    #[error("Database error: {0}")]
    Database(String),
}

/// Boxed future returned by [`ResourceStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable record of each resource's state and revision.
///
/// `try_transition` is the sole write path into resource state. It must be a
/// single atomic operation: a database statement guarded by `state` and
/// `revision`, or an in-memory compare-and-swap under one lock.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn ResourceStore>` between the arbitration service and the reclaimer.
pub trait ResourceStore: Send + Sync {
    /// Atomically apply `transition` to the resource.
    ///
    /// Returns `Ok(true)` if the stored state and revision matched and the
    /// update was written, `Ok(false)` if either differed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the resource does not exist
    /// - [`StoreError::Database`] on backend failure
    fn try_transition(&self, resource_id: ResourceId, transition: Transition) -> StoreFuture<'_, bool>;

    /// Point read without locking.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the resource does not exist
    /// - [`StoreError::Database`] on backend failure
    fn read(&self, resource_id: ResourceId) -> StoreFuture<'_, Resource>;

    /// Create the resource as `AVAILABLE` at revision 0.
    ///
    /// Returns `true` if it was created and `false` if it already existed, in
    /// which case it is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn provision(&self, resource_id: ResourceId) -> StoreFuture<'_, bool>;

    /// All resources, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn list(&self) -> StoreFuture<'_, Vec<Resource>>;

    /// Resources in `HELD` whose hold expired at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<Resource>>;
}
