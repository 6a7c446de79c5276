//! Error taxonomy shared by every storage backend.
//!
//! Backends must report the same kind for the same situation so the protocol
//! layer can map kinds to status codes without knowing which backend is in
//! use. Match on the variant, never on the message.

use crate::model::EventId;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors returned by [`crate::repository`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A user with this name already exists.
    #[error("user already exists: {0:?}")]
    UserExists(String),

    /// No user with this name.
    #[error("user not found: {0:?}")]
    UserNotFound(String),

    /// No event with this id for the requesting owner.
    ///
    /// Also returned when the event exists but belongs to someone else.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The requested interval overlaps another event of the same owner.
    #[error("date already busy")]
    DateBusy,

    /// Infrastructure fault: connection loss, malformed row, poisoned lock.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// `true` for [`StorageError::UserNotFound`] and [`StorageError::EventNotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_) | Self::EventNotFound(_))
    }

    /// `true` for [`StorageError::UserExists`] and [`StorageError::DateBusy`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::UserExists(_) | Self::DateBusy)
    }

    /// `true` for [`StorageError::Backend`].
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
