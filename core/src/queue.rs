//! Reminder transport contract.
//!
//! The scheduler hands the transport pre-encoded payloads (see
//! [`crate::alert::encode`]). The transport delivers them at least once to a
//! destination fixed when it was constructed; reconnection is its own
//! business.
//!
//! # Implementations
//!
//! - `RedpandaAlertQueue` (in `calendar-redpanda`): Kafka-compatible producer
//! - `RecordingAlertQueue` (in `calendar-testing`): captures payloads for tests

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from encoding, decoding or moving reminder payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to serialize a reminder.
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Failed to deserialize a reminder.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a payload.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// Destination topic
        topic: String,
        /// Reason for failure
        reason: String,
    },

    /// Failed to subscribe to the destination.
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// Topic that failed
        topic: String,
        /// Reason for failure
        reason: String,
    },

    /// The operation did not finish in time.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Outbound reminder transport.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so schedulers can hold `Arc<dyn AlertQueue>`.
pub trait AlertQueue: Send + Sync {
    /// Destination name, for logs.
    fn destination(&self) -> &str;

    /// Publish one encoded reminder.
    ///
    /// `key` groups messages for partitioning; the scheduler passes the
    /// event id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] or [`QueueError::Timeout`] when
    /// the transport does not accept the payload.
    fn publish(
        &self,
        key: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}
