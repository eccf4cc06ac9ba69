//! Integration tests for `RedisCoordinationGate` using testcontainers.
//!
//! Docker must be running. Run with:
//! `cargo test -p seatlock-redis -- --ignored`

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use futures::future::join_all;
use seatlock_core::gate::{CoordinationGate, GateError, GateKey, OwnerToken};
use seatlock_core::ids::{HolderId, ResourceId};
use seatlock_redis::RedisCoordinationGate;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn setup() -> (ContainerAsync<Redis>, RedisCoordinationGate) {
    let container = Redis::default().start().await.expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");

    let gate = RedisCoordinationGate::new(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, gate)
}

fn key() -> GateKey {
    GateKey::for_resource(&ResourceId::new("seat-1"))
}

fn owner(name: &str) -> OwnerToken {
    OwnerToken::for_attempt(&HolderId::new(name))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_acquire_is_exclusive() {
    let (_container, gate) = setup().await;
    let (a, b) = (owner("a"), owner("b"));

    assert!(gate.acquire_gate(key(), a.clone(), Duration::from_secs(30)).await.expect("acquire"));
    assert!(!gate.acquire_gate(key(), b.clone(), Duration::from_secs(30)).await.expect("acquire"));
    assert_eq!(gate.current_owner(key()).await.expect("get"), Some(a.clone()));

    assert!(!gate.release_gate(key(), b).await.expect("foreign release"));
    assert_eq!(gate.current_owner(key()).await.expect("get"), Some(a.clone()));

    assert!(gate.release_gate(key(), a.clone()).await.expect("release"));
    assert_eq!(gate.current_owner(key()).await.expect("get"), None);
    assert!(gate.release_gate(key(), a).await.expect("release absent"), "absent key counts as released");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_entry_expires() {
    let (_container, gate) = setup().await;

    assert!(gate.acquire_gate(key(), owner("a"), Duration::from_millis(100)).await.expect("acquire"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(gate.current_owner(key()).await.expect("get"), None);
    assert!(gate.acquire_gate(key(), owner("b"), Duration::from_secs(30)).await.expect("acquire after expiry"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_zero_ttl_rejected() {
    let (_container, gate) = setup().await;
    let result = gate.acquire_gate(key(), owner("a"), Duration::ZERO).await;
    assert!(matches!(result, Err(GateError::ZeroTtl)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_acquire_single_owner() {
    let (_container, gate) = setup().await;
    let gate = Arc::new(gate);

    let attempts = (0..100).map(|i| {
        let gate = Arc::clone(&gate);
        async move {
            gate.acquire_gate(key(), owner(&format!("h{i}")), Duration::from_secs(30))
                .await
                .expect("acquire")
        }
    });
    let winners = join_all(attempts).await.into_iter().filter(|won| *won).count();
    assert_eq!(winners, 1);
}
