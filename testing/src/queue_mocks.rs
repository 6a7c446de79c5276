//! In-memory reminder transport for scheduler tests.

use calendar_core::alert::{self, AlertEvent};
use calendar_core::queue::{AlertQueue, QueueError};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    published: Vec<(String, Vec<u8>)>,
    failing_keys: HashSet<String>,
    fail_all: bool,
    attempts: usize,
}

/// Captures every published payload instead of sending it anywhere.
///
/// Clones share state. Publishing can be made to fail for chosen keys, or
/// for everything, to exercise error paths.
///
/// # Example
///
/// ```
/// use calendar_testing::RecordingAlertQueue;
/// use calendar_core::queue::AlertQueue;
///
/// # async fn example() {
/// let queue = RecordingAlertQueue::new("reminders");
/// queue.publish("k", vec![1, 2, 3]).await.unwrap();
/// assert_eq!(queue.len(), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RecordingAlertQueue {
    topic: String,
    inner: Arc<Mutex<Inner>>,
}

impl RecordingAlertQueue {
    /// Create an empty queue reporting `topic` as its destination.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject publishes whose key is `key`.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.lock().failing_keys.insert(key.into());
    }

    /// Reject every publish until [`Self::recover`] is called.
    pub fn fail_all(&self) {
        self.lock().fail_all = true;
    }

    /// Accept publishes again.
    pub fn recover(&self) {
        let mut inner = self.lock();
        inner.fail_all = false;
        inner.failing_keys.clear();
    }

    /// Number of accepted payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().published.len()
    }

    /// Whether nothing was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().published.is_empty()
    }

    /// Number of publish calls, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Accepted `(key, payload)` pairs in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    /// Accepted payloads decoded back into reminders.
    ///
    /// # Errors
    ///
    /// Returns the first decode failure.
    pub fn alerts(&self) -> Result<Vec<AlertEvent>, QueueError> {
        self.lock()
            .published
            .iter()
            .map(|(_, payload)| alert::decode(payload))
            .collect()
    }

    /// Forget everything accepted so far.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.published.clear();
        inner.attempts = 0;
    }
}

impl AlertQueue for RecordingAlertQueue {
    fn destination(&self) -> &str {
        &self.topic
    }

    fn publish(
        &self,
        key: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.lock();
            inner.attempts += 1;

            if inner.fail_all || inner.failing_keys.contains(&key) {
                return Err(QueueError::PublishFailed {
                    topic: self.topic.clone(),
                    reason: "rejected by test".to_string(),
                });
            }

            inner.published.push((key, payload));
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order() {
        let queue = RecordingAlertQueue::new("reminders");
        queue.publish("a", vec![1]).await.unwrap();
        queue.publish("b", vec![2]).await.unwrap();

        let keys: Vec<_> = queue.published().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(queue.destination(), "reminders");
    }

    #[tokio::test]
    async fn failing_key_is_not_recorded() {
        let queue = RecordingAlertQueue::new("reminders");
        queue.fail_key("bad");

        assert!(queue.publish("bad", vec![1]).await.is_err());
        queue.publish("good", vec![2]).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.attempts(), 2);
    }

    #[tokio::test]
    async fn recover_clears_failures() {
        let queue = RecordingAlertQueue::new("reminders");
        queue.fail_all();
        assert!(queue.publish("a", vec![1]).await.is_err());

        queue.recover();
        queue.publish("a", vec![1]).await.unwrap();
        assert_eq!(queue.len(), 1);
    }
}
