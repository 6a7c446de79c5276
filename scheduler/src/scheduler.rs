//! The reminder loop.
//!
//! Every `period` the scheduler asks storage for events whose reminder is due
//! in `[now, now + period)`, turns each into an [`AlertEvent`] and publishes
//! it. One failing event never stops the others; a failing listing only
//! costs that tick.
//!
//! ```text
//! Idle ──run──► WaitingForTick ──tick──► Processing ──┐
//!                    ▲                                │
//!                    └────────────────────────────────┘
//!               shutdown (any state) ──► Stopped (terminal)
//! ```

use calendar_core::alert::{self, AlertEvent};
use calendar_core::environment::Clock;
use calendar_core::model::Event;
use calendar_core::queue::{AlertQueue, QueueError};
use calendar_core::repository::Storage;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks, and the length of each lookahead window
    pub period: Duration,
    /// Upper bound on one publish call
    pub publish_timeout: Duration,
    /// Upper bound on the storage listing (and each owner lookup)
    pub list_timeout: Duration,
    /// Look up the owner's email and put it in the reminder
    pub resolve_owner_email: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_minutes(1)
    }
}

impl SchedulerConfig {
    /// Period of `minutes` with default timeouts.
    #[must_use]
    pub const fn from_minutes(minutes: u64) -> Self {
        Self {
            period: Duration::from_secs(minutes * 60),
            publish_timeout: Duration::from_secs(1),
            list_timeout: Duration::from_secs(1),
            resolve_owner_email: true,
        }
    }
}

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, `run` not called yet
    Idle,
    /// Waiting for the next tick or for shutdown
    WaitingForTick,
    /// Listing and publishing
    Processing,
    /// Terminal
    Stopped,
}

/// Errors starting the loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `run` is already executing.
    #[error("Scheduler is already running")]
    AlreadyStarted,

    /// The scheduler ran and stopped; it cannot be restarted.
    #[error("Scheduler has stopped")]
    Stopped,

    /// A zero period would tick continuously.
    #[error("Scheduler period must be greater than zero")]
    InvalidPeriod,
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Window start (the tick's "now")
    pub window_start: DateTime<Utc>,
    /// Window end, exclusive
    pub window_end: DateTime<Utc>,
    /// Events due in the window
    pub found: usize,
    /// Reminders the queue accepted
    pub published: usize,
    /// Reminders that failed to encode or publish
    pub failed: usize,
    /// The listing itself failed or timed out
    pub list_failed: bool,
}

/// Periodic reminder publisher.
///
/// Needs read access to storage only. Holds the storage and queue behind
/// `Arc` so the binary can share them with shutdown code.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(storage, queue, SystemClock, SchedulerConfig::from_minutes(5));
/// let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
/// tokio::spawn(async move { scheduler.run(shutdown_rx).await });
/// // later
/// shutdown_tx.send(()).ok();
/// ```
pub struct Scheduler<S: ?Sized, Q: ?Sized, C> {
    storage: Arc<S>,
    queue: Arc<Q>,
    clock: C,
    config: SchedulerConfig,
    state: watch::Sender<SchedulerState>,
    started: AtomicBool,
}

impl<S, Q, C> Scheduler<S, Q, C>
where
    S: Storage + ?Sized,
    Q: AlertQueue + ?Sized,
    C: Clock,
{
    /// Create an idle scheduler.
    #[must_use]
    pub fn new(storage: Arc<S>, queue: Arc<Q>, clock: C, config: SchedulerConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            storage,
            queue,
            clock,
            config,
            state,
            started: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn set_state(&self, next: SchedulerState) {
        self.state.send_replace(next);
    }

    /// Tick every `period` until `shutdown` fires or its sender is dropped.
    ///
    /// The first tick happens one period after the call. A tick in progress
    /// is allowed to finish; no new tick starts after shutdown.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::AlreadyStarted`] if another `run` is executing
    /// - [`SchedulerError::Stopped`] if the scheduler already stopped
    /// - [`SchedulerError::InvalidPeriod`] for a zero period
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SchedulerError> {
        if self.config.period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(if self.state() == SchedulerState::Stopped {
                SchedulerError::Stopped
            } else {
                SchedulerError::AlreadyStarted
            });
        }

        let period = self.config.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            period_secs = period.as_secs(),
            destination = self.queue.destination(),
            backend = self.storage.backend_name(),
            "Scheduler started"
        );

        loop {
            self.set_state(SchedulerState::WaitingForTick);

            tokio::select! {
                biased;

                // A value, a closed sender or a lag all mean stop
                _ = shutdown.recv() => break,

                _ = ticker.tick() => {
                    self.set_state(SchedulerState::Processing);
                    let report = self.tick().await;
                    tracing::info!(
                        found = report.found,
                        published = report.published,
                        failed = report.failed,
                        list_failed = report.list_failed,
                        "Tick finished"
                    );
                },
            }
        }

        self.set_state(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Run one processing cycle for the window starting now.
    pub async fn tick(&self) -> TickReport {
        metrics::counter!("scheduler.ticks").increment(1);

        let window_start = self.clock.now();
        let window_end = TimeDelta::from_std(self.config.period)
            .ok()
            .and_then(|period| window_start.checked_add_signed(period))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut report = TickReport {
            window_start,
            window_end,
            found: 0,
            published: 0,
            failed: 0,
            list_failed: false,
        };

        let listing = tokio::time::timeout(
            self.config.list_timeout,
            self.storage.list_events_to_notify(window_start, window_end),
        )
        .await;

        let events = match listing {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to list events to notify");
                report.list_failed = true;
                return report;
            },
            Err(_) => {
                tracing::error!(
                    timeout_ms = duration_ms(self.config.list_timeout),
                    "Listing events to notify timed out"
                );
                report.list_failed = true;
                return report;
            },
        };

        report.found = events.len();

        for event in &events {
            match self.remind(event).await {
                Ok(()) => {
                    report.published += 1;
                    metrics::counter!("scheduler.reminders.published").increment(1);
                    tracing::info!(event_id = %event.id, owner = %event.owner, "Reminder queued");
                },
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("scheduler.reminders.failed").increment(1);
                    tracing::error!(event_id = %event.id, error = %e, "Failed to queue reminder");
                },
            }
        }

        report
    }

    async fn remind(&self, event: &Event) -> Result<(), QueueError> {
        let email = if self.config.resolve_owner_email {
            self.owner_email(&event.owner).await
        } else {
            None
        };

        let payload = alert::encode(&AlertEvent::from_event(event, email))?;
        let key = event.id.to_string();

        tokio::time::timeout(self.config.publish_timeout, self.queue.publish(&key, payload))
            .await
            .map_err(|_| QueueError::Timeout(self.config.publish_timeout))?
    }

    async fn owner_email(&self, owner: &str) -> Option<String> {
        match tokio::time::timeout(self.config.list_timeout, self.storage.get_user(owner)).await {
            Ok(Ok(user)) => Some(user.email),
            Ok(Err(e)) => {
                tracing::warn!(owner, error = %e, "Could not resolve owner email");
                None
            },
            Err(_) => {
                tracing::warn!(owner, "Owner lookup timed out");
                None
            },
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
