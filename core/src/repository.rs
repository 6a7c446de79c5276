//! Storage contract for users and events.
//!
//! # Design
//!
//! Two backends implement this contract: `InMemoryStorage`
//! (`calendar-memory`) and `PostgresStorage` (`calendar-postgres`). Both must
//!
//! - never let two events of the same owner overlap, even under concurrent
//!   creates and updates (see [`crate::model::intervals_overlap`])
//! - report the same [`StorageError`] kind for the same situation
//! - hand out copies, never references into stored state
//!
//! The owner is an explicit parameter on every event operation. Stores never
//! look identity up from ambient request context.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of `async fn` so the traits
//! can be used as `Arc<dyn Storage>`.

use crate::error::StorageError;
use crate::model::{Event, EventFields, EventId, User};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by repository methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// User accounts.
pub trait UserRepository: Send + Sync {
    /// Register a new user.
    ///
    /// # Errors
    ///
    /// - `UserExists`: a user with the same name exists
    /// - `Backend`: infrastructure failure
    fn create_user(&self, user: User) -> StorageFuture<'_, ()>;

    /// Fetch a user by name.
    ///
    /// # Errors
    ///
    /// - `UserNotFound`: no such user
    /// - `Backend`: infrastructure failure
    fn get_user(&self, name: &str) -> StorageFuture<'_, User>;

    /// Delete a user and every event it owns.
    ///
    /// # Errors
    ///
    /// - `UserNotFound`: no such user
    /// - `Backend`: infrastructure failure
    fn delete_user(&self, name: &str) -> StorageFuture<'_, ()>;
}

/// Calendar events, scoped by owner.
pub trait EventRepository: Send + Sync {
    /// Store a new event for `owner` and return its generated id.
    ///
    /// The overlap check and the insert are one atomic step.
    ///
    /// # Errors
    ///
    /// - `DateBusy`: the interval overlaps another event of `owner`; nothing is stored
    /// - `UserNotFound`: `owner` has no account
    /// - `Backend`: infrastructure failure
    fn create_event(&self, owner: &str, fields: EventFields) -> StorageFuture<'_, EventId>;

    /// Fetch one event of `owner`.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event, or it belongs to someone else
    /// - `Backend`: infrastructure failure
    fn get_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, Event>;

    /// Replace the fields of an event of `owner`.
    ///
    /// The overlap check against the owner's *other* events and the write are
    /// one atomic step.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event, or it belongs to someone else
    /// - `DateBusy`: the new interval overlaps another event of `owner`
    /// - `Backend`: infrastructure failure
    fn update_event(&self, owner: &str, id: EventId, fields: EventFields) -> StorageFuture<'_, ()>;

    /// Delete an event of `owner`.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no such event, or it belongs to someone else
    /// - `Backend`: infrastructure failure
    fn delete_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, ()>;

    /// Events of `owner` whose interval intersects `[start, end)`, latest
    /// start first.
    ///
    /// An unknown owner yields an empty list.
    ///
    /// # Errors
    ///
    /// - `Backend`: infrastructure failure
    fn list_events(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>>;

    /// Events of every owner whose reminder is due inside `[start, end)`,
    /// earliest start first.
    ///
    /// The due instant is [`Event::reminder_at`].
    ///
    /// # Errors
    ///
    /// - `Backend`: infrastructure failure
    fn list_events_to_notify(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>>;
}

/// A complete backend: users, events and lifecycle.
pub trait Storage: UserRepository + EventRepository {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Release backend resources (close the pool, clear the maps).
    ///
    /// Calls made after `close` may fail with `Backend`.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
