//! Expiry reclamation tests.

#![allow(clippy::unwrap_used)] // Test code
#![allow(clippy::expect_used)] // Test code

use seatlock_core::environment::Clock;
use seatlock_core::ids::{HolderId, ResourceId};
use seatlock_core::resource::ResourceState;
use seatlock_runtime::reclaimer::SweepReport;
use seatlock_testing::TestArbiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const TTL: Duration = Duration::from_secs(30);

fn seat(n: usize) -> ResourceId {
    ResourceId::new(format!("seat-{n}"))
}

#[tokio::test]
async fn sweep_reclaims_only_expired_holds() {
    let arbiter = TestArbiter::builder().resources(["seat-1", "seat-2", "seat-3"]).build();
    let service = &arbiter.service;

    service.acquire_hold(&seat(1), &HolderId::new("a"), TTL).await.unwrap();
    service.acquire_hold(&seat(2), &HolderId::new("b"), TTL * 4).await.unwrap();
    service.confirm_acquisition(&seat(3), &HolderId::new("c")).await.unwrap();

    let reclaimer = arbiter.reclaimer(Duration::from_secs(1));
    assert_eq!(reclaimer.sweep().await.unwrap(), SweepReport::default());

    arbiter.advance(TTL);
    let report = reclaimer.sweep().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.reclaimed, 1);

    let first = arbiter.stored(&seat(1));
    assert_eq!(first.state, ResourceState::Available);
    assert_eq!(first.holder, None);
    assert_eq!(first.hold_expires_at, None);
    assert_eq!(arbiter.stored(&seat(2)).state, ResourceState::Held);
    arbiter.assert_single_winner(&seat(3));

    // Nothing left to do.
    assert_eq!(reclaimer.sweep().await.unwrap().examined, 0);
}

#[tokio::test]
async fn refreshed_hold_survives_stale_snapshot() {
    let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
    let holder = HolderId::new("a");
    arbiter.service.acquire_hold(&seat(1), &holder, TTL).await.unwrap();

    arbiter.advance(TTL);
    let snapshot = arbiter.stored(&seat(1));
    let now = arbiter.service.holds().clock().now();
    assert!(snapshot.hold_expired(now));

    // The holder refreshes between the sweep's read and its write.
    arbiter.service.acquire_hold(&seat(1), &holder, TTL).await.unwrap();

    assert!(!arbiter.service.holds().reclaim(&snapshot, now).await.unwrap());
    let stored = arbiter.stored(&seat(1));
    assert_eq!(stored.state, ResourceState::Held);
    assert_eq!(stored.holder, Some(holder));
}

#[tokio::test]
async fn confirmed_resource_is_never_reclaimed() {
    let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
    let holder = HolderId::new("a");
    arbiter.service.acquire_hold(&seat(1), &holder, TTL).await.unwrap();
    let snapshot = arbiter.stored(&seat(1));

    arbiter.service.confirm_acquisition(&seat(1), &holder).await.unwrap();
    arbiter.advance(TTL * 10);

    let now = arbiter.service.holds().clock().now();
    assert!(!arbiter.service.holds().reclaim(&snapshot, now).await.unwrap());
    assert_eq!(arbiter.reclaimer(TTL).sweep().await.unwrap().examined, 0);
    arbiter.assert_single_winner(&seat(1));
}

#[tokio::test]
async fn spawned_reclaimer_runs_until_shutdown() {
    let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
    arbiter.service.acquire_hold(&seat(1), &HolderId::new("a"), TTL).await.unwrap();
    arbiter.advance(TTL + Duration::from_secs(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Arc::new(arbiter.reclaimer(Duration::from_millis(10))).spawn(shutdown_rx);

    tokio::time::timeout(Duration::from_secs(5), async {
        while arbiter.stored(&seat(1)).state != ResourceState::Available {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reclaimer should release the expired hold");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reclaimer should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn reclaimed_resource_can_be_acquired() {
    let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
    arbiter.service.acquire_hold(&seat(1), &HolderId::new("a"), TTL).await.unwrap();
    arbiter.advance(TTL);

    arbiter.reclaimer(TTL).sweep().await.unwrap();
    arbiter.service.confirm_acquisition(&seat(1), &HolderId::new("b")).await.unwrap();

    arbiter.assert_single_winner(&seat(1));
    assert_eq!(arbiter.stored(&seat(1)).holder, Some(HolderId::new("b")));
}
