//! Redpanda transport for calendar reminders.
//!
//! [`RedpandaAlertQueue`] implements [`AlertQueue`] from `calendar-core` on top
//! of rdkafka, so any Kafka-compatible broker works (Redpanda, Apache Kafka,
//! MSK, ...).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   encode    ┌──────────────────┐
//! │  Scheduler  │ ──────────► │ RedpandaAlert-   │──► topic (key = event id)
//! └─────────────┘             │ Queue::publish   │
//!                             └──────────────────┘
//!                                                        │
//!                             ┌──────────────────┐       │
//!          notifier  ◄─────── │ ::subscribe      │ ◄─────┘
//!                   decoded   └──────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the decoded reminder reaches the subscriber's channel
//! - If the process crashes before commit, reminders will be redelivered
//! - Consumers MUST tolerate duplicates (the event id is a natural dedup key)
//! - Ordering is guaranteed per event id (same key, same partition)
//!
//! # Example
//!
//! ```no_run
//! use calendar_redpanda::RedpandaAlertQueue;
//! use calendar_core::alert::{self, AlertEvent};
//! use calendar_core::queue::AlertQueue;
//! use futures::StreamExt;
//!
//! # async fn example(reminder: AlertEvent) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaAlertQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("calendar-alerts")
//!     .build()?;
//!
//! queue
//!     .publish(&reminder.event_id.to_string(), alert::encode(&reminder)?)
//!     .await?;
//!
//! let mut reminders = queue.subscribe().await?;
//! while let Some(result) = reminders.next().await {
//!     match result {
//!         Ok(reminder) => println!("Remind {} about {}", reminder.owner, reminder.title),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use calendar_core::alert::{self, AlertEvent};
use calendar_core::queue::{AlertQueue, QueueError};
use futures::Stream;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default destination topic.
pub const DEFAULT_TOPIC: &str = "calendar-alerts";

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream of decoded reminders returned by [`RedpandaAlertQueue::subscribe`].
pub type AlertStream = Pin<Box<dyn Stream<Item = Result<AlertEvent, QueueError>> + Send>>;

/// Kafka-compatible reminder transport.
///
/// The destination topic is fixed when the queue is built. Reconnection and
/// retries are left to librdkafka.
///
/// # Example
///
/// ```no_run
/// use calendar_redpanda::RedpandaAlertQueue;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaAlertQueue::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("calendar-alerts")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaAlertQueue {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaAlertQueue {
    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaAlertQueueBuilder {
        RedpandaAlertQueueBuilder::default()
    }

    /// Consume reminders from the topic.
    ///
    /// Undecodable payloads are yielded as [`QueueError::Decode`] and their
    /// offsets committed, so one bad message does not block the partition.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] if the consumer cannot be
    /// created or subscribed.
    pub async fn subscribe(&self) -> Result<AlertStream, QueueError> {
        let group = self
            .consumer_group
            .clone()
            .unwrap_or_else(|| format!("calendar-{}", self.topic));

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| QueueError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| QueueError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

        tracing::info!(
            topic = %self.topic,
            consumer_group = %group,
            buffer_size = self.buffer_size,
            auto_offset_reset = %self.auto_offset_reset,
            "Subscribed to reminders"
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

        // The task owns the consumer; dropping the stream ends it.
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut messages = consumer.stream();

            while let Some(received) = messages.next().await {
                let message = match received {
                    Ok(message) => message,
                    Err(e) => {
                        let err = QueueError::ConnectionFailed(format!("Failed to receive: {e}"));
                        if tx.send(Err(err)).await.is_err() {
                            break;
                        }
                        continue;
                    },
                };

                let decoded = message.payload().map_or_else(
                    || Err(QueueError::Decode("message has no payload".to_string())),
                    alert::decode,
                );

                if let Ok(reminder) = &decoded {
                    tracing::trace!(
                        partition = message.partition(),
                        offset = message.offset(),
                        event_id = %reminder.event_id,
                        "Received reminder"
                    );
                }

                // Commit only once the subscriber has the message
                if tx.send(decoded).await.is_err() {
                    tracing::debug!("Reminder receiver dropped, exiting consumer task");
                    break;
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            }

            tracing::debug!("Consumer task exiting");
        });

        let stream = async_stream::stream! {
            while let Some(result) = rx.recv().await {
                yield result;
            }
        };

        Ok(Box::pin(stream))
    }
}

impl AlertQueue for RedpandaAlertQueue {
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
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        key = %key,
                        "Reminder published"
                    );
                    metrics::counter!("redpanda.alerts.published").increment(1);
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish reminder"
                    );
                    metrics::counter!("redpanda.alerts.failed").increment(1);
                    Err(classify_send_error(&self.topic, self.timeout, &kafka_error))
                },
            }
        })
    }
}

fn classify_send_error(topic: &str, timeout: Duration, error: &KafkaError) -> QueueError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => QueueError::Timeout(timeout),
        other => QueueError::PublishFailed {
            topic: topic.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Builder for configuring a [`RedpandaAlertQueue`].
#[derive(Default)]
pub struct RedpandaAlertQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaAlertQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the destination topic.
    ///
    /// Default: [`DEFAULT_TOPIC`]
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer delivery timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group used by [`RedpandaAlertQueue::subscribe`].
    ///
    /// Default: `calendar-<topic>`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many decoded reminders may wait for the subscriber.
    ///
    /// Zero is raised to one. Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where a new consumer group starts: "earliest", "latest" or "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaAlertQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaAlertQueue, QueueError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = %acks,
            compression = %compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaAlertQueue created"
        );

        Ok(RedpandaAlertQueue {
            producer,
            brokers,
            topic,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}
