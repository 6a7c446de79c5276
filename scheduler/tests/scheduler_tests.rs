//! Scheduler behaviour against the in-memory store and a recording queue.
//!
//! Tokio time is paused, so ticks and timeouts resolve instantly. "Now" for
//! the reminder window comes from a [`ManualClock`] the tests move by hand.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use calendar_core::error::StorageError;
use calendar_core::model::{Event, EventFields, EventId, User};
use calendar_core::queue::{AlertQueue, QueueError};
use calendar_core::repository::{EventRepository, Storage, StorageFuture, UserRepository};
use calendar_memory::InMemoryStorage;
use calendar_scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
use calendar_testing::helpers::{at, slot, user};
use calendar_testing::{ManualClock, RecordingAlertQueue};
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TOPIC: &str = "reminders";

fn config(minutes: u64) -> SchedulerConfig {
    SchedulerConfig::from_minutes(minutes)
}

async fn store_with(owners: &[&str]) -> Arc<InMemoryStorage> {
    let storage = Arc::new(InMemoryStorage::new());
    for owner in owners {
        storage.create_user(user(owner)).await.unwrap();
    }
    storage
}

/// Delegates to an in-memory store, failing on request.
#[derive(Default)]
struct FaultyStorage {
    inner: InMemoryStorage,
    fail_listing: bool,
    stall_listing: bool,
    fail_user_lookup: bool,
}

impl UserRepository for FaultyStorage {
    fn create_user(&self, user: User) -> StorageFuture<'_, ()> {
        self.inner.create_user(user)
    }

    fn get_user(&self, name: &str) -> StorageFuture<'_, User> {
        if self.fail_user_lookup {
            return Box::pin(async { Err::<User, _>(StorageError::Backend("lookup refused".to_string())) });
        }
        self.inner.get_user(name)
    }

    fn delete_user(&self, name: &str) -> StorageFuture<'_, ()> {
        self.inner.delete_user(name)
    }
}

impl EventRepository for FaultyStorage {
    fn create_event(&self, owner: &str, fields: EventFields) -> StorageFuture<'_, EventId> {
        self.inner.create_event(owner, fields)
    }

    fn get_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, Event> {
        self.inner.get_event(owner, id)
    }

    fn update_event(&self, owner: &str, id: EventId, fields: EventFields) -> StorageFuture<'_, ()> {
        self.inner.update_event(owner, id, fields)
    }

    fn delete_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, ()> {
        self.inner.delete_event(owner, id)
    }

    fn list_events(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        self.inner.list_events(owner, start, end)
    }

    fn list_events_to_notify(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        if self.fail_listing {
            return Box::pin(async {
                Err::<Vec<Event>, _>(StorageError::Backend("connection reset".to_string()))
            });
        }
        if self.stall_listing {
            return Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<Vec<Event>, StorageError>(Vec::new())
            });
        }
        self.inner.list_events_to_notify(start, end)
    }
}

impl Storage for FaultyStorage {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.inner.close()
    }
}

/// Queue that never answers.
struct StalledQueue;

impl AlertQueue for StalledQueue {
    fn destination(&self) -> &str {
        "nowhere"
    }

    fn publish(
        &self,
        _key: &str,
        _payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(std::future::pending::<Result<(), QueueError>>())
    }
}

#[tokio::test(start_paused = true)]
async fn test_alice_window_emits_one_reminder() {
    let storage = store_with(&["alice"]).await;
    let first = storage
        .create_event("alice", slot("standup", at(10, 0), 60))
        .await
        .unwrap();
    assert!(matches!(
        storage.create_event("alice", slot("clash", at(10, 30), 60)).await,
        Err(StorageError::DateBusy)
    ));
    storage
        .create_event("alice", slot("lunch", at(11, 0), 60))
        .await
        .unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(
        storage,
        Arc::clone(&queue),
        ManualClock::new(at(9, 45)),
        config(30),
    );

    let report = scheduler.tick().await;

    assert_eq!(report.window_start, at(9, 45));
    assert_eq!(report.window_end, at(10, 15));
    assert_eq!((report.found, report.published, report.failed), (1, 1, 0));
    assert!(!report.list_failed);

    let alerts = queue.alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].event_id, first);
    assert_eq!(alerts[0].title, "standup");
    assert_eq!(alerts[0].owner, "alice");
    assert_eq!(alerts[0].owner_email.as_deref(), Some("alice@example.com"));
    assert_eq!(queue.published()[0].0, first.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_lead_time_moves_reminder_into_window() {
    let storage = store_with(&["bob"]).await;
    storage
        .create_event(
            "bob",
            slot("flight", at(12, 0), 120).with_notify_before(Duration::from_secs(2 * 3600)),
        )
        .await
        .unwrap();
    storage
        .create_event("bob", slot("no lead", at(10, 20), 10))
        .await
        .unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config(15));

    let report = scheduler.tick().await;

    assert_eq!(report.found, 1);
    assert_eq!(queue.alerts().unwrap()[0].title, "flight");
}

#[tokio::test(start_paused = true)]
async fn test_running_event_is_not_reminded_again() {
    let storage = store_with(&["dave"]).await;
    storage
        .create_event("dave", slot("review", at(9, 30), 60))
        .await
        .unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let clock = ManualClock::new(at(9, 15));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), clock.clone(), config(30));

    // [09:15, 09:45) holds the start.
    assert_eq!(scheduler.tick().await.found, 1);

    // [09:45, 10:15) lies inside the running event but holds no start.
    clock.set(at(9, 45));
    let report = scheduler.tick().await;

    assert_eq!((report.found, report.published), (0, 0));
    assert_eq!(queue.alerts().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_windows_publish_each_reminder_once() {
    let storage = store_with(&["carol"]).await;
    for (title, minute) in [("a", 0), ("b", 20), ("c", 40)] {
        storage
            .create_event("carol", slot(title, at(10, minute), 10))
            .await
            .unwrap();
    }

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let clock = ManualClock::new(at(10, 0));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), clock.clone(), config(20));

    for _ in 0..4 {
        scheduler.tick().await;
        clock.advance(TimeDelta::minutes(20));
    }

    let titles: Vec<String> = queue.alerts().unwrap().into_iter().map(|a| a.title).collect();
    assert_eq!(titles, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_does_not_stop_other_reminders() {
    let storage = store_with(&["dave", "erin", "frank"]).await;
    storage.create_event("dave", slot("one", at(10, 0), 30)).await.unwrap();
    let doomed = storage.create_event("erin", slot("two", at(10, 5), 30)).await.unwrap();
    storage.create_event("frank", slot("three", at(10, 10), 30)).await.unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    queue.fail_key(doomed.to_string());
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config(15));

    let report = scheduler.tick().await;

    assert_eq!((report.found, report.published, report.failed), (3, 2, 1));
    assert_eq!(queue.attempts(), 3);
    let titles: Vec<String> = queue.alerts().unwrap().into_iter().map(|a| a.title).collect();
    assert_eq!(titles, vec!["one", "three"]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_publish_times_out() {
    let storage = store_with(&["gina"]).await;
    storage.create_event("gina", slot("one", at(10, 0), 30)).await.unwrap();
    storage.create_event("gina", slot("two", at(10, 30), 30)).await.unwrap();

    let scheduler = Scheduler::new(storage, Arc::new(StalledQueue), ManualClock::new(at(10, 0)), config(60));

    let report = scheduler.tick().await;

    assert_eq!((report.found, report.published, report.failed), (2, 0, 2));
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_skips_tick() {
    let storage = Arc::new(FaultyStorage {
        fail_listing: true,
        ..FaultyStorage::default()
    });
    storage.create_user(user("hank")).await.unwrap();
    storage.create_event("hank", slot("one", at(10, 0), 30)).await.unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config(15));

    let report = scheduler.tick().await;

    assert!(report.list_failed);
    assert_eq!(report.found, 0);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_listing_times_out() {
    let storage = Arc::new(FaultyStorage {
        stall_listing: true,
        ..FaultyStorage::default()
    });
    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config(15));

    let report = scheduler.tick().await;

    assert!(report.list_failed);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_owner_lookup_failure_publishes_without_email() {
    let storage = Arc::new(FaultyStorage {
        fail_user_lookup: true,
        ..FaultyStorage::default()
    });
    storage.create_user(user("ivan")).await.unwrap();
    storage.create_event("ivan", slot("one", at(10, 0), 30)).await.unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config(15));

    let report = scheduler.tick().await;

    assert_eq!(report.published, 1);
    assert_eq!(queue.alerts().unwrap()[0].owner_email, None);
}

#[tokio::test(start_paused = true)]
async fn test_email_resolution_can_be_disabled() {
    let storage = store_with(&["judy"]).await;
    storage.create_event("judy", slot("one", at(10, 0), 30)).await.unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let config = SchedulerConfig {
        resolve_owner_email: false,
        ..config(15)
    };
    let scheduler = Scheduler::new(storage, Arc::clone(&queue), ManualClock::new(at(10, 0)), config);

    scheduler.tick().await;

    assert_eq!(queue.alerts().unwrap()[0].owner_email, None);
}

#[tokio::test(start_paused = true)]
async fn test_run_ticks_until_shutdown() {
    let storage = store_with(&["kate"]).await;
    storage.create_event("kate", slot("one", at(10, 0), 30)).await.unwrap();

    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Arc::new(Scheduler::new(
        storage,
        Arc::clone(&queue),
        ManualClock::new(at(10, 0)),
        config(1),
    ));
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let mut state = scheduler.subscribe_state();
    state
        .wait_for(|s| *s == SchedulerState::WaitingForTick)
        .await
        .unwrap();

    // No tick before the first full period
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(queue.attempts(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(queue.attempts(), 1);

    let (_, second_rx) = broadcast::channel(1);
    assert_eq!(scheduler.run(second_rx).await, Err(SchedulerError::AlreadyStarted));

    shutdown_tx.send(()).unwrap();
    assert_eq!(runner.await.unwrap(), Ok(()));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let (_, third_rx) = broadcast::channel(1);
    assert_eq!(scheduler.run(third_rx).await, Err(SchedulerError::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_shutdown_sender_stops_loop() {
    let storage = store_with(&[]).await;
    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let scheduler = Scheduler::new(storage, queue, ManualClock::new(at(10, 0)), config(5));

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    drop(shutdown_tx);

    assert_eq!(scheduler.run(shutdown_rx).await, Ok(()));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_zero_period_is_rejected() {
    let storage = store_with(&[]).await;
    let queue = Arc::new(RecordingAlertQueue::new(TOPIC));
    let config = SchedulerConfig {
        period: Duration::ZERO,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(storage, queue, ManualClock::new(at(10, 0)), config);

    let (_tx, rx) = broadcast::channel(1);
    assert_eq!(scheduler.run(rx).await, Err(SchedulerError::InvalidPeriod));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_accepts_trait_objects() {
    let storage: Arc<dyn Storage> = store_with(&["liam"]).await;
    storage.create_event("liam", slot("one", at(10, 0), 30)).await.unwrap();
    let queue: Arc<dyn AlertQueue> = Arc::new(RecordingAlertQueue::new(TOPIC));

    let scheduler = Scheduler::new(storage, queue, ManualClock::new(at(10, 0)), config(15));

    assert_eq!(scheduler.tick().await.published, 1);
}
