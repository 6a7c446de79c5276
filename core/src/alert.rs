//! Reminder records and their wire format.
//!
//! A reminder is self-contained: the consumer needs nothing but the payload
//! to notify the owner.
//!
//! # Wire format
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ version │ bincode(AlertEvent)          │
//! │  1 byte │                              │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! The leading byte lets consumers reject payloads written by a newer
//! producer instead of misreading them. `decode(encode(x)) == x` for every
//! record.

use crate::model::{Event, EventId};
use crate::queue::QueueError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current payload format version.
pub const ALERT_FORMAT_VERSION: u8 = 1;

/// A reminder for one upcoming event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Event the reminder is about.
    pub event_id: EventId,
    /// Event title.
    pub title: String,
    /// Event description.
    pub description: Option<String>,
    /// Event start.
    pub start_time: DateTime<Utc>,
    /// Event end.
    pub end_time: DateTime<Utc>,
    /// Owning user name.
    pub owner: String,
    /// Owner's email, when the scheduler resolved it.
    pub owner_email: Option<String>,
}

impl AlertEvent {
    /// Build a reminder from a stored event.
    #[must_use]
    pub fn from_event(event: &Event, owner_email: Option<String>) -> Self {
        Self {
            event_id: event.id,
            title: event.title.clone(),
            description: event.description.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            owner: event.owner.clone(),
            owner_email,
        }
    }
}

/// Encode a reminder for the queue.
///
/// # Errors
///
/// Returns [`QueueError::Encode`] if serialization fails.
pub fn encode(alert: &AlertEvent) -> Result<Vec<u8>, QueueError> {
    let body = bincode::serialize(alert).map_err(|e| QueueError::Encode(e.to_string()))?;

    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(ALERT_FORMAT_VERSION);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Decode a reminder taken off the queue.
///
/// # Errors
///
/// Returns [`QueueError::Decode`] for an empty payload, an unknown format
/// version, or a body that does not deserialize.
pub fn decode(payload: &[u8]) -> Result<AlertEvent, QueueError> {
    let Some((&version, body)) = payload.split_first() else {
        return Err(QueueError::Decode("empty payload".to_string()));
    };

    if version != ALERT_FORMAT_VERSION {
        return Err(QueueError::Decode(format!(
            "unsupported format version {version}"
        )));
    }

    bincode::deserialize(body).map_err(|e| QueueError::Decode(e.to_string()))
}
