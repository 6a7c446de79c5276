//! Concurrent access from many tasks on a multi-threaded runtime.

#![allow(clippy::unwrap_used)]

use calendar_core::error::StorageError;
use calendar_core::model::EventFields;
use calendar_core::repository::{EventRepository, UserRepository};
use calendar_memory::InMemoryStorage;
use calendar_testing::helpers::{at, slot, user};
use chrono::TimeDelta;
use futures::future::join_all;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_creates_all_succeed() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.create_user(user("alice")).await.unwrap();

    let tasks = (0..64).map(|i| {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let start = at(0, 0) + TimeDelta::minutes(i * 10);
            storage
                .create_event("alice", slot(&format!("slot {i}"), start, 10))
                .await
        })
    });

    let results = join_all(tasks).await;
    assert!(results.iter().all(|r| matches!(r, Ok(Ok(_)))));
    assert_eq!(storage.event_count().unwrap(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_creates_admit_exactly_one() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.create_user(user("alice")).await.unwrap();

    let tasks = (0..32).map(|i| {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let fields = EventFields::new(
                format!("racer {i}"),
                at(10, 0) + TimeDelta::seconds(i),
                at(11, 0) + TimeDelta::seconds(i),
            );
            storage.create_event("alice", fields).await
        })
    });

    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(StorageError::DateBusy)))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(busy, 31);
    assert_eq!(storage.event_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owners_do_not_contend() {
    let storage = Arc::new(InMemoryStorage::new());
    let owners: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
    for owner in &owners {
        storage.create_user(user(owner)).await.unwrap();
    }

    let tasks = owners.iter().cloned().map(|owner| {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            storage
                .create_event(&owner, slot("same slot", at(10, 0), 60))
                .await
        })
    });

    let results = join_all(tasks).await;
    assert!(results.iter().all(|r| matches!(r, Ok(Ok(_)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_user_races_with_creates() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.create_user(user("alice")).await.unwrap();

    let creates = (0..32).map(|i| {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let start = at(0, 0) + TimeDelta::minutes(i * 10);
            storage.create_event("alice", slot("x", start, 10)).await
        })
    });
    let delete = {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move { storage.delete_user("alice").await })
    };

    let results = join_all(creates).await;
    delete.await.unwrap().unwrap();

    // Every create either finished before the cascade or saw no owner
    assert!(results.iter().all(|r| matches!(
        r,
        Ok(Ok(_) | Err(StorageError::UserNotFound(_)))
    )));
    assert_eq!(storage.event_count().unwrap(), 0);
}

#[tokio::test]
async fn test_alice_scenario() {
    let storage = InMemoryStorage::new();
    storage.create_user(user("alice")).await.unwrap();

    let standup = storage
        .create_event("alice", slot("standup", at(10, 0), 60))
        .await
        .unwrap();
    assert_eq!(
        storage
            .create_event("alice", slot("clash", at(10, 30), 60))
            .await,
        Err(StorageError::DateBusy)
    );
    let review = storage
        .create_event("alice", slot("review", at(11, 0), 60))
        .await
        .unwrap();

    let day = storage
        .list_events("alice", at(0, 0), at(23, 0))
        .await
        .unwrap();
    let ids: Vec<_> = day.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![review, standup]);
}
