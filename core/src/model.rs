//! User and event records.
//!
//! # Overlap rule
//!
//! Event intervals are half-open, `[start, end)`. Two intervals overlap iff
//! `a.start < b.end && b.start < a.end`, so an event ending at 11:00 and one
//! starting at 11:00 do not conflict. Every backend decides conflicts with
//! [`intervals_overlap`] or its SQL equivalent.

use crate::error::StorageError;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account.
    #[default]
    User,
    /// Administrator.
    Admin,
}

impl Role {
    /// Stored text form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Parse the stored text form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] for an unknown role, since it can only
    /// come from a malformed row.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(StorageError::Backend(format!("Invalid role: {s}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calendar account.
///
/// `name` is the unique, immutable identifier and the owner key of events.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    /// Unique account name.
    pub name: String,
    /// Opaque password hash. Never logged.
    pub hashed_password: String,
    /// Contact address used for reminders.
    pub email: String,
    /// Account role.
    pub role: Role,
}

impl User {
    /// Create a user record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        hashed_password: impl Into<String>,
        email: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            name: name.into(),
            hashed_password: hashed_password.into(),
            email: email.into(),
            role,
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("hashed_password", &"<redacted>")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish()
    }
}

/// Store-generated event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Caller-supplied part of an event, used for both create and update.
///
/// `start_time < end_time` is the caller's responsibility; stores do not
/// re-validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFields {
    /// Short title.
    pub title: String,
    /// Optional free text.
    pub description: Option<String>,
    /// Inclusive start instant.
    pub start_time: DateTime<Utc>,
    /// Exclusive end instant.
    pub end_time: DateTime<Utc>,
    /// How long before `start_time` the reminder is due.
    pub notify_before: Option<Duration>,
}

impl EventFields {
    /// Fields with a title and interval, no description and no lead time.
    #[must_use]
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            start_time,
            end_time,
            notify_before: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the reminder lead time.
    #[must_use]
    pub const fn with_notify_before(mut self, notify_before: Duration) -> Self {
        self.notify_before = Some(notify_before);
        self
    }

    /// Drop sub-microsecond precision from both instants and the lead time.
    ///
    /// Microseconds are the finest unit every backend stores. Stores apply
    /// this before checking overlap so all of them keep the same values.
    #[must_use]
    pub fn truncated_to_micros(mut self) -> Self {
        self.start_time = self.start_time.trunc_subsecs(6);
        self.end_time = self.end_time.trunc_subsecs(6);
        self.notify_before = self
            .notify_before
            .map(|lead| Duration::from_micros(u64::try_from(lead.as_micros()).unwrap_or(u64::MAX)));
        self
    }
}

/// A stored event.
///
/// Readers always receive copies; nothing outside the store holds a mutable
/// reference to stored data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-generated id.
    pub id: EventId,
    /// Short title.
    pub title: String,
    /// Optional free text.
    pub description: Option<String>,
    /// Inclusive start instant.
    pub start_time: DateTime<Utc>,
    /// Exclusive end instant.
    pub end_time: DateTime<Utc>,
    /// How long before `start_time` the reminder is due.
    pub notify_before: Option<Duration>,
    /// Owning user name. Not part of the wire form.
    #[serde(skip)]
    pub owner: String,
}

impl Event {
    /// Assemble a stored event from its id, owner and fields.
    #[must_use]
    pub fn from_fields(id: EventId, owner: impl Into<String>, fields: EventFields) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            start_time: fields.start_time,
            end_time: fields.end_time,
            notify_before: fields.notify_before,
            owner: owner.into(),
        }
    }

    /// Replace the mutable fields, keeping id and owner.
    pub fn apply(&mut self, fields: EventFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.start_time = fields.start_time;
        self.end_time = fields.end_time;
        self.notify_before = fields.notify_before;
    }

    /// Whether this event's interval overlaps `[start, end)`.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_time, self.end_time, start, end)
    }

    /// Instant the reminder is due: `start_time - notify_before`.
    #[must_use]
    pub fn reminder_at(&self) -> DateTime<Utc> {
        let Some(lead) = self.notify_before else {
            return self.start_time;
        };

        TimeDelta::from_std(lead)
            .ok()
            .and_then(|lead| self.start_time.checked_sub_signed(lead))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the reminder is due inside `[start, end)`.
    #[must_use]
    pub fn reminder_due_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let at = self.reminder_at();
        start <= at && at < end
    }
}

/// Half-open interval overlap: `a_start < b_end && b_start < a_end`.
#[must_use]
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}
