//! Concurrency tests: reservation creation, validation and the expiry
//! sweep all contend on one store from independent tasks.

use std::sync::Arc;

use chrono::{Duration, Utc};
use locknet_service::error::LocknetError;
use locknet_service::lifecycle::LifecycleManager;
use locknet_service::store::Store;
use locknet_service::validation::ValidationEngine;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_exactly_one_concurrent_reservation_wins() {
    let store = Store::open_in_memory().unwrap();
    store.create_lock("101").unwrap();
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), None));

    let mut handles = Vec::new();
    for i in 0..16 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .create_reservation(&format!("user-{i}"), "101", Duration::days(3))
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(matches!(e, LocknetError::LockAlreadyReserved(_))),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(store.list_tokens().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_sweep_overlaps_validation_safely() {
    let store = Store::open_in_memory().unwrap();
    store.create_lock("101").unwrap();
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), None));
    let engine = Arc::new(ValidationEngine::new(store.clone()));

    let reservation = lifecycle
        .create_reservation("ana", "101", Duration::days(3))
        .await
        .unwrap();
    let token = reservation.token.clone();
    let past_end = reservation.end + Duration::seconds(1);

    let mut handles = Vec::new();
    for i in 0..24 {
        if i % 3 == 0 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                lifecycle.sweep_expired(past_end).unwrap();
            }));
        } else {
            let engine = engine.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                // Past the window, so whichever of the time check or a
                // completed sweep gets there first, the decision is a
                // rejection; either way it must not error.
                let decision = engine.validate(&token, "101", past_end).unwrap();
                assert!(!decision.is_approved());
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // One record per validation attempt, none lost to the overlap.
    assert_eq!(store.count_access_records_for_lock("101").unwrap(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reservations_on_distinct_locks_all_win() {
    let store = Store::open_in_memory().unwrap();
    for i in 0..8 {
        store.create_lock(&format!("lock-{i}")).unwrap();
    }
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), None));

    let mut handles = Vec::new();
    for i in 0..8 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .create_reservation("ana", &format!("lock-{i}"), Duration::days(3))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let tokens = store.list_tokens().unwrap();
    assert_eq!(tokens.len(), 8);
    // Implicit user creation inside the transaction never duplicated
    // the user row.
    let now = Utc::now();
    let err = store
        .create_reservation("ana", "lock-0", "dup", now, now + Duration::days(1))
        .unwrap_err();
    assert!(matches!(err, LocknetError::LockAlreadyReserved(_)));
    assert!(tokens.iter().all(|t| t.user == "ana"));
}
