//! # Calendar Core
//!
//! Core types and traits for the calendar service.
//!
//! This crate owns everything the storage backends and the reminder scheduler
//! agree on:
//!
//! - [`model`]: `User` and `Event` records and the half-open overlap rule
//! - [`repository`]: the storage contract every backend implements
//! - [`error`]: the error taxonomy shared by all backends
//! - [`alert`]: the reminder record and its wire encoding
//! - [`queue`]: the contract for the reminder transport
//! - [`retry`]: bounded retry for startup checks and contended writes
//!
//! ## Architecture
//!
//! ```text
//!  protocol layer ──► Storage (trait) ◄── Scheduler ──► AlertQueue (trait)
//!                        │                                  │
//!              ┌─────────┴─────────┐                 ┌──────┴──────┐
//!              ▼                   ▼                 ▼             ▼
//!       InMemoryStorage     PostgresStorage   RedpandaAlertQueue  (tests)
//! ```
//!
//! Callers depend on the traits only. Backend-specific lifecycle (closing a
//! pool, clearing maps) goes through [`repository::Storage::close`].
//!
//! ## Example
//!
//! ```ignore
//! use calendar_core::model::EventFields;
//! use calendar_core::repository::Storage;
//!
//! async fn book(storage: &dyn Storage, fields: EventFields) {
//!     match storage.create_event("alice", fields).await {
//!         Ok(id) => tracing::info!(%id, "booked"),
//!         Err(e) if e.is_conflict() => tracing::info!("slot taken"),
//!         Err(e) => tracing::error!(error = %e, "storage failure"),
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};

pub mod alert;
pub mod error;
pub mod model;
pub mod queue;
pub mod repository;
pub mod retry;

/// Environment module - injected dependencies
///
/// All time lookups in the scheduler go through [`environment::Clock`] so
/// tests can pin "now".
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use calendar_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
