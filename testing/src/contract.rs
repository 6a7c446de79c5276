//! Behaviour every [`Storage`] backend must share.
//!
//! Each check creates its own uniquely named users, so the checks can run
//! against a shared database without interfering. Backends call
//! [`run_all`] or individual checks from their own test suites.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::panic)]
#![allow(clippy::missing_panics_doc)] // Every check panics on a contract violation

use crate::helpers::{at, slot, unique_name, user};
use calendar_core::error::StorageError;
use calendar_core::model::{EventFields, EventId};
use calendar_core::repository::Storage;
use chrono::TimeDelta;
use futures::future::join_all;
use std::time::Duration;

/// Run every check in sequence.
pub async fn run_all<S: Storage + ?Sized>(storage: &S) {
    tracing::info!(backend = storage.backend_name(), "Running storage contract");
    user_lifecycle(storage).await;
    event_lifecycle(storage).await;
    overlapping_create_is_rejected(storage).await;
    update_checks_only_other_events(storage).await;
    foreign_events_are_invisible(storage).await;
    create_for_unknown_owner_fails(storage).await;
    list_filters_and_orders(storage).await;
    notify_window_spans_owners(storage).await;
    delete_user_cascades(storage).await;
    concurrent_overlapping_creates_admit_one(storage).await;
    concurrent_disjoint_creates_all_succeed(storage).await;
    concurrent_update_and_create_admit_one(storage).await;
    sub_microsecond_precision_is_truncated(storage).await;
    tracing::info!(backend = storage.backend_name(), "Storage contract passed");
}

/// Create, read, duplicate, delete and re-delete a user.
pub async fn user_lifecycle<S: Storage + ?Sized>(storage: &S) {
    let name = unique_name("carol");
    let carol = user(&name);

    storage.create_user(carol.clone()).await.unwrap();
    assert_eq!(storage.get_user(&name).await.unwrap(), carol);

    let duplicate = storage.create_user(carol.clone()).await;
    assert_eq!(duplicate, Err(StorageError::UserExists(name.clone())));

    storage.delete_user(&name).await.unwrap();
    assert_eq!(
        storage.get_user(&name).await,
        Err(StorageError::UserNotFound(name.clone()))
    );
    assert_eq!(
        storage.delete_user(&name).await,
        Err(StorageError::UserNotFound(name))
    );
}

/// Create, read, update and delete one event.
pub async fn event_lifecycle<S: Storage + ?Sized>(storage: &S) {
    let owner = unique_name("dave");
    storage.create_user(user(&owner)).await.unwrap();

    let fields = slot("planning", at(9, 0), 60)
        .with_description("quarterly")
        .with_notify_before(Duration::from_secs(15 * 60));
    let id = storage.create_event(&owner, fields.clone()).await.unwrap();

    let stored = storage.get_event(&owner, id).await.unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.owner, owner);
    assert_eq!(stored.title, "planning");
    assert_eq!(stored.description.as_deref(), Some("quarterly"));
    assert_eq!(stored.start_time, fields.start_time);
    assert_eq!(stored.end_time, fields.end_time);
    assert_eq!(stored.notify_before, Some(Duration::from_secs(15 * 60)));

    storage
        .update_event(&owner, id, slot("planning (moved)", at(14, 0), 30))
        .await
        .unwrap();
    let moved = storage.get_event(&owner, id).await.unwrap();
    assert_eq!(moved.title, "planning (moved)");
    assert_eq!(moved.start_time, at(14, 0));
    assert_eq!(moved.description, None);
    assert_eq!(moved.notify_before, None);

    storage.delete_event(&owner, id).await.unwrap();
    assert_eq!(
        storage.get_event(&owner, id).await,
        Err(StorageError::EventNotFound(id))
    );
    assert_eq!(
        storage.delete_event(&owner, id).await,
        Err(StorageError::EventNotFound(id))
    );
    assert_eq!(
        storage.update_event(&owner, id, slot("ghost", at(16, 0), 30)).await,
        Err(StorageError::EventNotFound(id))
    );

    storage.delete_user(&owner).await.unwrap();
}

/// Overlap is rejected per owner, touching intervals are accepted.
pub async fn overlapping_create_is_rejected<S: Storage + ?Sized>(storage: &S) {
    let alice = unique_name("alice");
    let bob = unique_name("bob");
    storage.create_user(user(&alice)).await.unwrap();
    storage.create_user(user(&bob)).await.unwrap();

    storage
        .create_event(&alice, slot("standup", at(10, 0), 60))
        .await
        .unwrap();

    let clash = storage
        .create_event(&alice, slot("clash", at(10, 30), 60))
        .await;
    assert_eq!(clash, Err(StorageError::DateBusy));

    storage
        .create_event(&alice, slot("after", at(11, 0), 60))
        .await
        .unwrap();
    storage
        .create_event(&bob, slot("same slot, other owner", at(10, 0), 60))
        .await
        .unwrap();

    let events = storage
        .list_events(&alice, at(0, 0), at(23, 59))
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.title != "clash"));

    storage.delete_user(&alice).await.unwrap();
    storage.delete_user(&bob).await.unwrap();
}

/// Updating an event may overlap its own old interval but not a sibling.
pub async fn update_checks_only_other_events<S: Storage + ?Sized>(storage: &S) {
    let owner = unique_name("erin");
    storage.create_user(user(&owner)).await.unwrap();

    let first = storage
        .create_event(&owner, slot("first", at(9, 0), 60))
        .await
        .unwrap();
    let second = storage
        .create_event(&owner, slot("second", at(11, 0), 60))
        .await
        .unwrap();

    storage
        .update_event(&owner, first, slot("first (longer)", at(9, 0), 90))
        .await
        .unwrap();

    let collision = storage
        .update_event(&owner, first, slot("first (collides)", at(10, 30), 60))
        .await;
    assert_eq!(collision, Err(StorageError::DateBusy));

    let unchanged = storage.get_event(&owner, first).await.unwrap();
    assert_eq!(unchanged.title, "first (longer)");
    assert_eq!(unchanged.end_time, at(10, 30));

    let untouched = storage.get_event(&owner, second).await.unwrap();
    assert_eq!(untouched.title, "second");

    storage.delete_user(&owner).await.unwrap();
}

/// Another user's event behaves exactly like a missing one.
pub async fn foreign_events_are_invisible<S: Storage + ?Sized>(storage: &S) {
    let alice = unique_name("alice");
    let mallory = unique_name("mallory");
    storage.create_user(user(&alice)).await.unwrap();
    storage.create_user(user(&mallory)).await.unwrap();

    let id = storage
        .create_event(&alice, slot("private", at(13, 0), 60))
        .await
        .unwrap();

    assert_eq!(
        storage.get_event(&mallory, id).await,
        Err(StorageError::EventNotFound(id))
    );
    assert_eq!(
        storage.update_event(&mallory, id, slot("hijack", at(13, 0), 60)).await,
        Err(StorageError::EventNotFound(id))
    );
    assert_eq!(
        storage.delete_event(&mallory, id).await,
        Err(StorageError::EventNotFound(id))
    );

    let event = storage.get_event(&alice, id).await.unwrap();
    assert_eq!(event.title, "private");

    storage.delete_user(&alice).await.unwrap();
    storage.delete_user(&mallory).await.unwrap();
}

/// Events need an existing owner.
pub async fn create_for_unknown_owner_fails<S: Storage + ?Sized>(storage: &S) {
    let ghost = unique_name("ghost");
    let result = storage
        .create_event(&ghost, slot("nobody home", at(8, 0), 30))
        .await;
    assert_eq!(result, Err(StorageError::UserNotFound(ghost.clone())));

    let listed = storage
        .list_events(&ghost, at(0, 0), at(23, 59))
        .await
        .unwrap();
    assert!(listed.is_empty());

    let missing = EventId::new();
    assert_eq!(
        storage.get_event(&ghost, missing).await,
        Err(StorageError::EventNotFound(missing))
    );
}

/// Listing keeps intersecting events only, latest start first.
pub async fn list_filters_and_orders<S: Storage + ?Sized>(storage: &S) {
    let owner = unique_name("frank");
    storage.create_user(user(&owner)).await.unwrap();

    for (title, hour) in [("early", 7), ("morning", 9), ("noon", 12), ("evening", 18)] {
        storage
            .create_event(&owner, slot(title, at(hour, 0), 60))
            .await
            .unwrap();
    }

    // [09:30, 12:30) intersects "morning" (09-10) and "noon" (12-13)
    let listed = storage
        .list_events(&owner, at(9, 30), at(12, 30))
        .await
        .unwrap();
    let titles: Vec<_> = listed.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["noon", "morning"]);

    // A window ending exactly at a start excludes that event
    let touching = storage
        .list_events(&owner, at(10, 0), at(12, 0))
        .await
        .unwrap();
    assert!(touching.is_empty());

    storage.delete_user(&owner).await.unwrap();
}

/// The reminder window spans owners and honours lead time.
pub async fn notify_window_spans_owners<S: Storage + ?Sized>(storage: &S) {
    let grace = unique_name("grace");
    let heidi = unique_name("heidi");
    storage.create_user(user(&grace)).await.unwrap();
    storage.create_user(user(&heidi)).await.unwrap();

    // reminder at 10:00
    let heidi_ten = storage
        .create_event(&heidi, slot("heidi 10:00", at(10, 0), 30))
        .await
        .unwrap();
    // reminder at 10:05
    let grace_ten = storage
        .create_event(&grace, slot("grace 10:05", at(10, 5), 30))
        .await
        .unwrap();
    // starts 10:40 with a 35 minute lead, reminder at 10:05
    let grace_lead = storage
        .create_event(
            &grace,
            slot("grace lead", at(10, 40), 20).with_notify_before(Duration::from_secs(35 * 60)),
        )
        .await
        .unwrap();
    // starts 10:40 with a 30 minute lead, reminder at 10:10, outside the window
    storage
        .create_event(
            &heidi,
            slot("heidi late", at(10, 40), 10).with_notify_before(Duration::from_secs(30 * 60)),
        )
        .await
        .unwrap();
    // reminder at 09:59, outside the window
    storage
        .create_event(&heidi, slot("heidi 09:59", at(9, 59), 1))
        .await
        .unwrap();

    let due = storage
        .list_events_to_notify(at(10, 0), at(10, 10))
        .await
        .unwrap();
    let ours: Vec<_> = due
        .iter()
        .filter(|e| e.owner == grace || e.owner == heidi)
        .map(|e| e.id)
        .collect();

    assert_eq!(ours, vec![heidi_ten, grace_ten, grace_lead]);
    assert!(due.windows(2).all(|w| w[0].start_time <= w[1].start_time));

    storage.delete_user(&grace).await.unwrap();
    storage.delete_user(&heidi).await.unwrap();
}

/// Deleting a user removes every event it owned.
pub async fn delete_user_cascades<S: Storage + ?Sized>(storage: &S) {
    let owner = unique_name("ivan");
    storage.create_user(user(&owner)).await.unwrap();

    let ids = [
        storage
            .create_event(&owner, slot("a", at(15, 0), 30))
            .await
            .unwrap(),
        storage
            .create_event(&owner, slot("b", at(16, 0), 30))
            .await
            .unwrap(),
    ];

    storage.delete_user(&owner).await.unwrap();

    for id in ids {
        assert_eq!(
            storage.get_event(&owner, id).await,
            Err(StorageError::EventNotFound(id))
        );
    }
    let due = storage
        .list_events_to_notify(at(15, 0), at(16, 30))
        .await
        .unwrap();
    assert!(due.iter().all(|e| e.owner != owner));

    // The name is free again and the new account starts empty
    storage.create_user(user(&owner)).await.unwrap();
    assert!(
        storage
            .list_events(&owner, at(0, 0), at(23, 59))
            .await
            .unwrap()
            .is_empty()
    );
    storage.delete_user(&owner).await.unwrap();
}

/// Of several mutually overlapping creates racing, exactly one wins.
pub async fn concurrent_overlapping_creates_admit_one<S: Storage + ?Sized>(storage: &S) {
    const RACERS: i64 = 8;

    let owner = unique_name("judy");
    storage.create_user(user(&owner)).await.unwrap();

    // Every slot contains 12:00-12:01, so any two overlap
    let attempts = (0..RACERS).map(|i| {
        let start = at(11, 0) + TimeDelta::minutes(i);
        let fields = EventFields::new(format!("racer {i}"), start, at(12, 1) + TimeDelta::minutes(i));
        storage.create_event(&owner, fields)
    });
    let results = join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(StorageError::DateBusy)))
        .count();
    assert_eq!(winners, 1, "results: {results:?}");
    assert_eq!(busy, results.len() - 1);

    let stored = storage
        .list_events(&owner, at(0, 0), at(23, 59))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    storage.delete_user(&owner).await.unwrap();
}

/// Disjoint creates for one owner, issued together, all land.
pub async fn concurrent_disjoint_creates_all_succeed<S: Storage + ?Sized>(storage: &S) {
    const RACERS: i64 = 16;

    let owner = unique_name("kim");
    storage.create_user(user(&owner)).await.unwrap();

    // Back-to-back half-hour slots from 08:00
    let attempts = (0..RACERS).map(|i| {
        let start = at(8, 0) + TimeDelta::minutes(30 * i);
        storage.create_event(&owner, slot(&format!("slot {i}"), start, 30))
    });
    let results = join_all(attempts).await;

    assert!(results.iter().all(Result::is_ok), "results: {results:?}");
    let mut ids: Vec<EventId> = results.into_iter().map(Result::unwrap).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    let stored = storage
        .list_events(&owner, at(0, 0), at(23, 59))
        .await
        .unwrap();
    assert_eq!(stored.len(), 16);

    storage.delete_user(&owner).await.unwrap();
}

/// Moving an event into a slot while another create claims it: one wins.
pub async fn concurrent_update_and_create_admit_one<S: Storage + ?Sized>(storage: &S) {
    for round in 0..8 {
        let owner = unique_name("leo");
        storage.create_user(user(&owner)).await.unwrap();
        let id = storage
            .create_event(&owner, slot("movable", at(9, 0), 30))
            .await
            .unwrap();

        let (moved, created) = futures::join!(
            storage.update_event(&owner, id, slot("moved", at(14, 0), 60)),
            storage.create_event(&owner, slot("claim", at(14, 30), 60)),
        );

        match (&moved, &created) {
            (Ok(()), Err(StorageError::DateBusy)) | (Err(StorageError::DateBusy), Ok(_)) => {},
            _ => panic!("round {round}: update {moved:?}, create {created:?}"),
        }

        let afternoon = storage
            .list_events(&owner, at(13, 0), at(17, 0))
            .await
            .unwrap();
        assert_eq!(afternoon.len(), 1, "round {round}");

        storage.delete_user(&owner).await.unwrap();
    }
}

/// Instants and lead time keep whole microseconds only, on every backend.
pub async fn sub_microsecond_precision_is_truncated<S: Storage + ?Sized>(storage: &S) {
    let owner = unique_name("mia");
    storage.create_user(user(&owner)).await.unwrap();

    let start = at(10, 0) + TimeDelta::nanoseconds(1_500);
    let fields = EventFields::new("precise", start, at(11, 0))
        .with_notify_before(Duration::new(90, 500));
    let id = storage.create_event(&owner, fields).await.unwrap();

    let event = storage.get_event(&owner, id).await.unwrap();
    assert_eq!(event.start_time, at(10, 0) + TimeDelta::microseconds(1));
    assert_eq!(event.notify_before, Some(Duration::from_secs(90)));

    storage
        .update_event(
            &owner,
            id,
            EventFields::new("precise", at(12, 0) + TimeDelta::nanoseconds(999), at(13, 0)),
        )
        .await
        .unwrap();
    let event = storage.get_event(&owner, id).await.unwrap();
    assert_eq!(event.start_time, at(12, 0));
    assert_eq!(event.notify_before, None);

    storage.delete_user(&owner).await.unwrap();
}
