//! `PostgreSQL` storage backend for the calendar service.
//!
//! Implements [`calendar_core::repository::Storage`] on a bounded `sqlx`
//! connection pool:
//!
//! - Overlap check and write in one conditional statement per create/update,
//!   backed by an exclusion constraint on `(owner, tstzrange(start, end))`
//! - Cascading user deletion through a foreign key
//! - Embedded migrations ([`PostgresStorage::migrate`])
//! - Startup connectivity check with bounded retries
//!   ([`PostgresStorage::connect`]); a write that deadlocks against a racing
//!   writer is re-run, other query failures are returned as they are
//!
//! # Example
//!
//! ```ignore
//! use calendar_postgres::{PostgresSettings, PostgresStorage};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = PostgresStorage::connect(&PostgresSettings::default()).await?;
//!     storage.migrate().await?;
//!     Ok(())
//! }
//! ```

pub mod settings;
pub mod storage;

pub use settings::PostgresSettings;
pub use storage::PostgresStorage;
