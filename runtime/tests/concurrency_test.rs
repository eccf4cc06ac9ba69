//! Concurrency tests: many holders racing for the same resources.
//!
//! These tests verify the central guarantee under real parallelism: however
//! many confirmers race for a resource, exactly one wins, every loser gets a
//! contention error, and the ledger holds exactly one confirmed entry.

#![allow(clippy::unwrap_used)] // Test code
#![allow(clippy::expect_used)] // Test code
#![allow(clippy::panic)] // Test code

use futures::future::join_all;
use seatlock_core::ids::{HolderId, ResourceId};
use seatlock_core::resource::ResourceState;
use seatlock_core::{ArbitrationError, ErrorKind};
use seatlock_runtime::HoldResult;
use seatlock_testing::{AdmissionKind, TestArbiter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const CONTENDERS: usize = 1000;

async fn race_single_resource(kind: AdmissionKind) {
    let arbiter = TestArbiter::builder().admission(kind).resources(["seat-1"]).build();
    let seat = ResourceId::new("seat-1");

    let tasks = (0..CONTENDERS).map(|i| {
        let service = Arc::clone(&arbiter.service);
        let seat = seat.clone();
        tokio::spawn(async move {
            let holder = HolderId::new(format!("holder-{i}"));
            service.confirm_acquisition(&seat, &holder).await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.expect("task panicked")).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "{kind:?}: exactly one confirmer wins");

    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::Contention, "{kind:?}: unexpected loser error {err}");
    }

    arbiter.assert_single_winner(&seat);
    assert_eq!(arbiter.ledger.entries().len(), 1, "{kind:?}: no stray ledger entries");
    assert_eq!(arbiter.gate.active_entries(), 0, "{kind:?}: gate entry left behind");
}

/// Test 1: 1000 confirmers, gate admission.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn thousand_confirmers_gate() {
    race_single_resource(AdmissionKind::Gate).await;
}

/// Test 2: 1000 confirmers, optimistic admission.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn thousand_confirmers_optimistic() {
    race_single_resource(AdmissionKind::Optimistic).await;
}

/// Test 3: holders spread across several resources; each has at most one
/// owner and every win is recorded.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_resources_many_holders() {
    for kind in [AdmissionKind::Gate, AdmissionKind::Optimistic] {
        let seats: Vec<String> = (0..10).map(|i| format!("seat-{i}")).collect();
        let arbiter = TestArbiter::builder().admission(kind).resources(seats.clone()).build();

        let tasks = (0..400).map(|i| {
            let service = Arc::clone(&arbiter.service);
            let seat = ResourceId::new(seats[i % seats.len()].clone());
            tokio::spawn(async move {
                let holder = HolderId::new(format!("holder-{i}"));
                service.confirm_acquisition(&seat, &holder).await.map(|_| seat)
            })
        });
        let won: Vec<ResourceId> = join_all(tasks)
            .await
            .into_iter()
            .filter_map(|r| r.expect("task panicked").ok())
            .collect();

        let distinct: HashSet<_> = won.iter().collect();
        assert_eq!(won.len(), distinct.len(), "{kind:?}: a resource was won twice");
        assert_eq!(won.len(), seats.len(), "{kind:?}: every resource was contested and won");

        for seat in &won {
            arbiter.assert_single_winner(seat);
        }
    }
}

/// Test 4: concurrent holds on one resource grant exactly one.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_holds_grant_one() {
    let arbiter = TestArbiter::builder().resources(["seat-1"]).build();
    let seat = ResourceId::new("seat-1");

    let tasks = (0..200).map(|i| {
        let service = Arc::clone(&arbiter.service);
        let seat = seat.clone();
        tokio::spawn(async move {
            let holder = HolderId::new(format!("holder-{i}"));
            service.acquire_hold(&seat, &holder, Duration::from_secs(60)).await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.expect("task panicked")).collect();

    let granted: Vec<_> = results
        .iter()
        .filter_map(|r| match r {
            Ok(HoldResult::Granted(hold)) => Some(hold.holder.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(granted.len(), 1);

    for result in &results {
        match result {
            Ok(HoldResult::Granted(_)) => {}
            Err(ArbitrationError::RejectedHeldByOther(_) | ArbitrationError::ContentionLost(_)) => {}
            other => panic!("unexpected hold result {other:?}"),
        }
    }

    let stored = arbiter.stored(&seat);
    assert_eq!(stored.state, ResourceState::Held);
    assert_eq!(stored.holder.as_ref(), granted.first());
}

/// Test 5: the hold holder confirms while others race; only the holder can win.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn holder_wins_race_against_non_holders() {
    for kind in [AdmissionKind::Gate, AdmissionKind::Optimistic] {
        let arbiter = TestArbiter::builder().admission(kind).resources(["seat-1"]).build();
        let seat = ResourceId::new("seat-1");
        let owner = HolderId::new("owner");
        arbiter.service.acquire_hold(&seat, &owner, Duration::from_secs(60)).await.unwrap();

        let rivals = (0..100).map(|i| {
            let service = Arc::clone(&arbiter.service);
            let seat = seat.clone();
            tokio::spawn(async move {
                let holder = HolderId::new(format!("rival-{i}"));
                service.confirm_acquisition(&seat, &holder).await
            })
        });
        let rival_results = join_all(rivals).await;

        for result in rival_results {
            let err = result.expect("task panicked").unwrap_err();
            assert!(
                matches!(err, ArbitrationError::PriorityViolation(_) | ArbitrationError::AlreadyAcquired(_)),
                "{kind:?}: {err}"
            );
        }

        arbiter.service.confirm_acquisition(&seat, &owner).await.unwrap();
        arbiter.assert_single_winner(&seat);
        assert_eq!(arbiter.stored(&seat).holder, Some(owner));
    }
}
