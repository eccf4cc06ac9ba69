//! Redis-backed coordination gate.
//!
//! Gate entries are plain Redis keys with a millisecond TTL:
//!
//! - **Acquire**: `SET {prefix}{key} {owner} NX PX {ttl}`; the reply is `OK`
//!   only for the caller that created the key
//! - **Release**: a Lua script compares the stored owner and deletes the key
//!   only on a match, so an attempt whose entry expired and was taken over
//!   can never delete the new owner's entry
//! - **Expiry**: left entirely to Redis
//!
//! # Example
//!
//! ```no_run
//! use seatlock_core::gate::{CoordinationGate, GateKey, OwnerToken};
//! use seatlock_core::ids::{HolderId, ResourceId};
//! use seatlock_redis::RedisCoordinationGate;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = RedisCoordinationGate::new("redis://127.0.0.1:6379").await?;
//!
//! let key = GateKey::for_resource(&ResourceId::new("seat-1"));
//! let owner = OwnerToken::for_attempt(&HolderId::new("alice"));
//! if gate.acquire_gate(key.clone(), owner.clone(), Duration::from_secs(30)).await? {
//!     // critical section
//!     gate.release_gate(key, owner).await?;
//! }
//! # Ok(())
//! # }
//! ```

use redis::aio::ConnectionManager;
use redis::{Client, Script};
use seatlock_core::gate::{CoordinationGate, GateError, GateFuture, GateKey, OwnerToken};
use std::time::Duration;

/// Default namespace for gate keys.
pub const DEFAULT_KEY_PREFIX: &str = "seatlock:gate:";

/// Returns 1 if the key was deleted, -1 if it was absent, 0 if another owner
/// holds it.
const RELEASE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// [`CoordinationGate`] backed by Redis.
///
/// Clones share one `ConnectionManager`, which reconnects on its own after
/// a dropped connection.
#[derive(Clone)]
pub struct RedisCoordinationGate {
    conn_manager: ConnectionManager,
    release: Script,
    key_prefix: String,
}

impl RedisCoordinationGate {
    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Backend`] if the URL is malformed or the
    /// connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, GateError> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::Backend(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GateError::Backend(format!("Failed to create Redis connection manager: {e}")))?;

        tracing::info!("Redis coordination gate connected");
        Ok(Self::from_manager(conn_manager))
    }

    /// Use an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: Script::new(RELEASE_SCRIPT),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Namespace keys under `prefix` instead of [`DEFAULT_KEY_PREFIX`].
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn redis_key(&self, key: &GateKey) -> String {
        format!("{}{}", self.key_prefix, key.as_str())
    }
}

/// TTL in whole milliseconds, at least one.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn backend(e: &redis::RedisError) -> GateError {
    GateError::Backend(e.to_string())
}

impl CoordinationGate for RedisCoordinationGate {
    fn acquire_gate(&self, key: GateKey, owner: OwnerToken, ttl: Duration) -> GateFuture<'_, bool> {
        Box::pin(async move {
            if ttl.is_zero() {
                return Err(GateError::ZeroTtl);
            }
            let mut conn = self.conn_manager.clone();

            let reply: Option<String> = redis::cmd("SET")
                .arg(self.redis_key(&key))
                .arg(owner.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;

            let acquired = reply.is_some();
            tracing::trace!(key = %key, owner = %owner, acquired, "Gate acquire");
            Ok(acquired)
        })
    }

    fn release_gate(&self, key: GateKey, owner: OwnerToken) -> GateFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let outcome: i64 = self
                .release
                .key(self.redis_key(&key))
                .arg(owner.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;

            if outcome == 0 {
                tracing::debug!(key = %key, owner = %owner, "Gate held by another owner; not released");
            }
            Ok(outcome != 0)
        })
    }

    fn current_owner(&self, key: GateKey) -> GateFuture<'_, Option<OwnerToken>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let owner: Option<String> = redis::cmd("GET")
                .arg(self.redis_key(&key))
                .query_async(&mut conn)
                .await
                .map_err(|e| backend(&e))?;
            Ok(owner.map(OwnerToken::new))
        })
    }
}
