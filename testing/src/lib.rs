//! # Calendar Testing
//!
//! Test doubles and shared checks for the calendar service.
//!
//! This crate provides:
//! - A clock that tests move by hand ([`ManualClock`])
//! - A capturing reminder transport ([`RecordingAlertQueue`])
//! - Fixture builders for users and events ([`helpers`])
//! - Backend-agnostic storage checks ([`contract`]) that every `Storage`
//!   implementation runs from its own test suite
//!
//! ## Example
//!
//! ```ignore
//! use calendar_testing::contract;
//!
//! #[tokio::test]
//! async fn memory_backend_honours_contract() {
//!     let storage = InMemoryStorage::new();
//!     contract::run_all(&storage).await;
//! }
//! ```

use chrono::{DateTime, Utc};
use calendar_core::environment::Clock;

pub mod contract;
mod queue_mocks;

pub use queue_mocks::RecordingAlertQueue;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same instant, so a test can keep one handle and give
    /// another to the code under test.
    ///
    /// # Example
    ///
    /// ```
    /// use calendar_testing::mocks::ManualClock;
    /// use calendar_core::environment::Clock;
    /// use chrono::{TimeDelta, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(TimeDelta::minutes(5));
    /// assert_eq!(clock.now() - before, TimeDelta::minutes(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: chrono::TimeDelta) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Fixture builders.
pub mod helpers {
    use calendar_core::model::{EventFields, Role, User};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    /// A user with a fixed hash and a derived email.
    #[must_use]
    pub fn user(name: &str) -> User {
        User::new(name, "$argon2id$fixture", format!("{name}@example.com"), Role::User)
    }

    /// A user name that no other test will pick.
    ///
    /// Backends backed by a shared database need this to keep tests apart.
    #[must_use]
    pub fn unique_name(label: &str) -> String {
        format!("{label}-{}", uuid::Uuid::new_v4().simple())
    }

    /// 2030-06-03 at `hour:minute` UTC.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range hour or minute.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 3, hour, minute, 0)
            .single()
            .expect("fixture time should be valid")
    }

    /// Fields for `[start, start + minutes)`.
    #[must_use]
    pub fn slot(title: &str, start: DateTime<Utc>, minutes: i64) -> EventFields {
        EventFields::new(title, start, start + TimeDelta::minutes(minutes))
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::ManualClock;
