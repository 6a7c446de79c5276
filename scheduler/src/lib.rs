//! # Calendar Scheduler
//!
//! Periodically publishes reminders for calendar events whose notification
//! time falls in the next scheduling window.
//!
//! - [`scheduler`]: the tick loop, its state machine and per-tick report
//! - [`config`]: environment-driven process settings for the binary
//!
//! The loop is generic over [`calendar_core::repository::Storage`],
//! [`calendar_core::queue::AlertQueue`] and
//! [`calendar_core::environment::Clock`], so it runs unchanged against the
//! in-memory store in tests and `PostgreSQL` plus Redpanda in production.

pub mod config;
pub mod scheduler;

pub use config::{ConfigError, Settings};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerState, TickReport};
