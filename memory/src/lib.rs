//! # Calendar Memory
//!
//! In-process [`Storage`] backend. Suitable for tests, local runs and
//! single-process deployments; nothing survives a restart.
//!
//! ## Locking
//!
//! Users and events live in two maps, each behind its own `RwLock`. Any
//! operation that needs both takes the users lock first. Creating an event
//! holds the users lock (read) while it checks and inserts, and deleting a
//! user holds it (write) while it cascades, so an event can never be created
//! for a user that is being deleted.
//!
//! Overlap check and insert happen under one events write lock, which makes
//! them atomic with respect to every other writer.
//!
//! ## Example
//!
//! ```
//! use calendar_memory::InMemoryStorage;
//! use calendar_core::model::{EventFields, Role, User};
//! use calendar_core::repository::{EventRepository, UserRepository};
//! use chrono::{TimeDelta, Utc};
//!
//! # async fn example() -> Result<(), calendar_core::error::StorageError> {
//! let storage = InMemoryStorage::new();
//! storage
//!     .create_user(User::new("alice", "hash", "alice@example.com", Role::User))
//!     .await?;
//!
//! let start = Utc::now();
//! let id = storage
//!     .create_event("alice", EventFields::new("standup", start, start + TimeDelta::minutes(15)))
//!     .await?;
//! assert_eq!(storage.get_event("alice", id).await?.title, "standup");
//! # Ok(())
//! # }
//! ```

use calendar_core::error::{Result, StorageError};
use calendar_core::model::{Event, EventFields, EventId, User};
use calendar_core::repository::{EventRepository, Storage, StorageFuture, UserRepository};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Users = HashMap<String, User>;
type Events = HashMap<EventId, Event>;

/// In-memory users and events.
///
/// Clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    users: Arc<RwLock<Users>>,
    events: Arc<RwLock<Events>>,
}

fn poisoned(which: &str) -> StorageError {
    StorageError::Backend(format!("{which} lock poisoned"))
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events across all owners.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if a lock is poisoned.
    pub fn event_count(&self) -> Result<usize> {
        Ok(self.read_events()?.len())
    }

    fn read_users(&self) -> Result<RwLockReadGuard<'_, Users>> {
        self.users.read().map_err(|_| poisoned("users"))
    }

    fn write_users(&self) -> Result<RwLockWriteGuard<'_, Users>> {
        self.users.write().map_err(|_| poisoned("users"))
    }

    fn read_events(&self) -> Result<RwLockReadGuard<'_, Events>> {
        self.events.read().map_err(|_| poisoned("events"))
    }

    fn write_events(&self) -> Result<RwLockWriteGuard<'_, Events>> {
        self.events.write().map_err(|_| poisoned("events"))
    }

    fn owned_event(&self, owner: &str, id: EventId) -> Result<Event> {
        self.read_events()?
            .get(&id)
            .filter(|event| event.owner == owner)
            .cloned()
            .ok_or(StorageError::EventNotFound(id))
    }

    fn insert_event(&self, owner: &str, fields: EventFields) -> Result<EventId> {
        let fields = fields.truncated_to_micros();
        let users = self.read_users()?;
        if !users.contains_key(owner) {
            return Err(StorageError::UserNotFound(owner.to_string()));
        }

        let mut events = self.write_events()?;
        let busy = events
            .values()
            .any(|e| e.owner == owner && e.overlaps(fields.start_time, fields.end_time));
        if busy {
            return Err(StorageError::DateBusy);
        }

        let id = loop {
            let candidate = EventId::new();
            if !events.contains_key(&candidate) {
                break candidate;
            }
        };
        events.insert(id, Event::from_fields(id, owner, fields));
        drop(users);

        tracing::debug!(%id, owner, "Event created");
        Ok(id)
    }

    fn replace_event(&self, owner: &str, id: EventId, fields: EventFields) -> Result<()> {
        let fields = fields.truncated_to_micros();
        let mut events = self.write_events()?;

        if !events.get(&id).is_some_and(|e| e.owner == owner) {
            return Err(StorageError::EventNotFound(id));
        }

        let busy = events.values().any(|e| {
            e.id != id && e.owner == owner && e.overlaps(fields.start_time, fields.end_time)
        });
        if busy {
            return Err(StorageError::DateBusy);
        }

        if let Some(event) = events.get_mut(&id) {
            event.apply(fields);
        }
        Ok(())
    }

    fn remove_event(&self, owner: &str, id: EventId) -> Result<()> {
        let mut events = self.write_events()?;
        match events.entry(id) {
            Entry::Occupied(entry) if entry.get().owner == owner => {
                entry.remove();
                Ok(())
            },
            _ => Err(StorageError::EventNotFound(id)),
        }
    }

    fn remove_user(&self, name: &str) -> Result<()> {
        // Both guards before any mutation, so a failure leaves no orphans
        let mut users = self.write_users()?;
        let mut events = self.write_events()?;
        if users.remove(name).is_none() {
            return Err(StorageError::UserNotFound(name.to_string()));
        }

        let before = events.len();
        events.retain(|_, event| event.owner != name);
        tracing::debug!(user = name, removed = before - events.len(), "User deleted");
        Ok(())
    }

    fn select_events(
        &self,
        keep: impl Fn(&Event) -> bool,
        order: impl Fn(&Event, &Event) -> std::cmp::Ordering,
    ) -> Result<Vec<Event>> {
        let mut selected: Vec<Event> = self
            .read_events()?
            .values()
            .filter(|event| keep(event))
            .cloned()
            .collect();
        selected.sort_by(order);
        Ok(selected)
    }
}

impl UserRepository for InMemoryStorage {
    fn create_user(&self, user: User) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            let mut users = self.write_users()?;
            match users.entry(user.name.clone()) {
                Entry::Occupied(_) => Err(StorageError::UserExists(user.name)),
                Entry::Vacant(slot) => {
                    slot.insert(user);
                    Ok(())
                },
            }
        })
    }

    fn get_user(&self, name: &str) -> StorageFuture<'_, User> {
        let name = name.to_string();
        Box::pin(async move {
            self.read_users()?
                .get(&name)
                .cloned()
                .ok_or(StorageError::UserNotFound(name))
        })
    }

    fn delete_user(&self, name: &str) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move { self.remove_user(&name) })
    }
}

impl EventRepository for InMemoryStorage {
    fn create_event(&self, owner: &str, fields: EventFields) -> StorageFuture<'_, EventId> {
        let owner = owner.to_string();
        Box::pin(async move { self.insert_event(&owner, fields) })
    }

    fn get_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, Event> {
        let owner = owner.to_string();
        Box::pin(async move { self.owned_event(&owner, id) })
    }

    fn update_event(&self, owner: &str, id: EventId, fields: EventFields) -> StorageFuture<'_, ()> {
        let owner = owner.to_string();
        Box::pin(async move { self.replace_event(&owner, id, fields) })
    }

    fn delete_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, ()> {
        let owner = owner.to_string();
        Box::pin(async move { self.remove_event(&owner, id) })
    }

    fn list_events(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        let owner = owner.to_string();
        Box::pin(async move {
            self.select_events(
                |e| e.owner == owner && e.overlaps(start, end),
                |a, b| b.start_time.cmp(&a.start_time),
            )
        })
    }

    fn list_events_to_notify(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        Box::pin(async move {
            self.select_events(
                |e| e.reminder_due_within(start, end),
                |a, b| a.start_time.cmp(&b.start_time),
            )
        })
    }
}

impl Storage for InMemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // Same order as every other writer
            if let Ok(mut users) = self.users.write() {
                users.clear();
            }
            if let Ok(mut events) = self.events.write() {
                events.clear();
            }
            tracing::info!("In-memory storage closed");
        })
    }
}
