//! [`Storage`] over a `PostgreSQL` connection pool.

use crate::settings::PostgresSettings;
use calendar_core::error::{Result, StorageError};
use calendar_core::model::{Event, EventFields, EventId, Role, User};
use calendar_core::repository::{EventRepository, Storage, StorageFuture, UserRepository};
use calendar_core::retry::{RetryPolicy, retry_if, retry_with_backoff};
use chrono::{DateTime, Utc};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const EXCLUSION_VIOLATION: &str = "23P01";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

const MICROS_PER_DAY: i64 = 86_400_000_000;

const EVENT_COLUMNS: &str =
    "id, title, description, start_time, end_time, notify_before, owner";

/// `PostgreSQL`-backed users and events.
///
/// No in-process locks: each create or update is one conditional statement,
/// and the `events_no_overlap` exclusion constraint rejects whatever slips
/// past the condition under concurrent writers. Racing overlapping writers
/// can also deadlock on that constraint; the losing statement is re-run a
/// few times and reported as `DateBusy` if it keeps losing. Deleting a user
/// cascades to its events through the foreign key.
///
/// Instants and `notify_before` are stored with microsecond precision; finer
/// digits are truncated before the write.
///
/// # Example
///
/// ```no_run
/// use calendar_postgres::{PostgresSettings, PostgresStorage};
///
/// # async fn example() -> Result<(), calendar_core::error::StorageError> {
/// let storage = PostgresStorage::connect(&PostgresSettings::default()).await?;
/// storage.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Build a pool from `settings` and wait until the server answers.
    ///
    /// Pings `connect_retries + 1` times with `retry_pause` in between.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if no ping succeeds.
    pub async fn connect(settings: &PostgresSettings) -> Result<Self> {
        let pool = settings
            .pool_options()
            .connect_lazy_with(settings.connect_options());
        let storage = Self::from_pool(pool);

        let policy = RetryPolicy::fixed(settings.connect_retries, settings.retry_pause);
        retry_with_backoff(&policy, || storage.ping()).await?;

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            max_connections = settings.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(storage)
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Round-trip a trivial query.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the server does not answer.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Ping failed: {e}")))?;
        Ok(())
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        count_query("create_user");
        let result = sqlx::query(
            r"
            INSERT INTO users (name, hashed_password, email, role)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&user.name)
        .bind(&user.hashed_password)
        .bind(&user.email)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(user = %user.name, role = %user.role, "User created");
                Ok(())
            },
            Err(e) if has_sql_state(&e, UNIQUE_VIOLATION) => Err(StorageError::UserExists(user.name)),
            Err(e) => Err(backend("create_user", &e)),
        }
    }

    async fn fetch_user(&self, name: &str) -> Result<User> {
        count_query("get_user");
        let row = sqlx::query(
            r"
            SELECT name, hashed_password, email, role
            FROM users
            WHERE name = $1
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get_user", &e))?
        .ok_or_else(|| StorageError::UserNotFound(name.to_string()))?;

        let role: String = row.try_get("role").map_err(|e| malformed("role", &e))?;
        Ok(User {
            name: row.try_get("name").map_err(|e| malformed("name", &e))?,
            hashed_password: row
                .try_get("hashed_password")
                .map_err(|e| malformed("hashed_password", &e))?,
            email: row.try_get("email").map_err(|e| malformed("email", &e))?,
            role: Role::parse(&role)?,
        })
    }

    async fn remove_user(&self, name: &str) -> Result<()> {
        count_query("delete_user");
        let result = sqlx::query("DELETE FROM users WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("delete_user", &e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound(name.to_string()));
        }

        tracing::info!(user = name, "User deleted");
        Ok(())
    }

    async fn insert_event(&self, owner: &str, fields: EventFields) -> Result<EventId> {
        count_query("create_event");
        let fields = fields.truncated_to_micros();
        let notify_before = to_interval(fields.notify_before)?;

        let result = retry_if(&contention_policy(), is_contended, || {
            sqlx::query(
                r"
                INSERT INTO events (title, description, start_time, end_time, notify_before, owner)
                SELECT $1, $2, $3, $4, $5, $6
                WHERE NOT EXISTS (
                    SELECT 1 FROM events
                    WHERE owner = $6 AND start_time < $4 AND $3 < end_time
                )
                RETURNING id
                ",
            )
            .bind(&fields.title)
            .bind(&fields.description)
            .bind(fields.start_time)
            .bind(fields.end_time)
            .bind(&notify_before)
            .bind(owner)
            .fetch_optional(&self.pool)
        })
        .await;

        match result {
            Ok(Some(row)) => {
                let id: Uuid = row.try_get("id").map_err(|e| malformed("id", &e))?;
                tracing::debug!(event_id = %id, owner, "Event created");
                Ok(EventId(id))
            },
            Ok(None) => Err(date_busy("create_event")),
            Err(e) if has_sql_state(&e, EXCLUSION_VIOLATION) || is_contended(&e) => {
                Err(date_busy("create_event"))
            },
            Err(e) if has_sql_state(&e, FOREIGN_KEY_VIOLATION) => {
                Err(StorageError::UserNotFound(owner.to_string()))
            },
            Err(e) => Err(backend("create_event", &e)),
        }
    }

    async fn fetch_event(&self, owner: &str, id: EventId) -> Result<Event> {
        count_query("get_event");
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND owner = $2"
        ))
        .bind(id.as_uuid())
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get_event", &e))?
        .ok_or(StorageError::EventNotFound(id))?;

        row_to_event(&row)
    }

    async fn replace_event(&self, owner: &str, id: EventId, fields: EventFields) -> Result<()> {
        count_query("update_event");
        let fields = fields.truncated_to_micros();
        let notify_before = to_interval(fields.notify_before)?;

        let result = retry_if(&contention_policy(), is_contended, || {
            sqlx::query(
                r"
                UPDATE events
                SET title = $3, description = $4, start_time = $5, end_time = $6, notify_before = $7
                WHERE id = $1 AND owner = $2
                  AND NOT EXISTS (
                      SELECT 1 FROM events other
                      WHERE other.owner = $2
                        AND other.id <> $1
                        AND other.start_time < $6
                        AND $5 < other.end_time
                  )
                ",
            )
            .bind(id.as_uuid())
            .bind(owner)
            .bind(&fields.title)
            .bind(&fields.description)
            .bind(fields.start_time)
            .bind(fields.end_time)
            .bind(&notify_before)
            .execute(&self.pool)
        })
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(()),
            // Best effort: a concurrent delete between the two statements
            // turns a conflict into EventNotFound.
            Ok(_) => {
                if self.event_exists(owner, id).await? {
                    Err(date_busy("update_event"))
                } else {
                    Err(StorageError::EventNotFound(id))
                }
            },
            Err(e) if has_sql_state(&e, EXCLUSION_VIOLATION) || is_contended(&e) => {
                Err(date_busy("update_event"))
            },
            Err(e) => Err(backend("update_event", &e)),
        }
    }

    async fn event_exists(&self, owner: &str, id: EventId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM events WHERE id = $1 AND owner = $2")
            .bind(id.as_uuid())
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("update_event", &e))?;
        Ok(row.is_some())
    }

    async fn remove_event(&self, owner: &str, id: EventId) -> Result<()> {
        count_query("delete_event");
        let result = sqlx::query("DELETE FROM events WHERE id = $1 AND owner = $2")
            .bind(id.as_uuid())
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("delete_event", &e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::EventNotFound(id));
        }
        Ok(())
    }

    async fn select_owner_window(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        count_query("list_events");
        let rows = sqlx::query(&format!(
            r"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE owner = $1 AND start_time < $3 AND $2 < end_time
            ORDER BY start_time DESC
            "
        ))
        .bind(owner)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list_events", &e))?;

        rows.iter().map(row_to_event).collect()
    }

    async fn select_due(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Event>> {
        count_query("list_events_to_notify");
        let rows = sqlx::query(&format!(
            r"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE start_time - COALESCE(notify_before, INTERVAL '0') >= $1
              AND start_time - COALESCE(notify_before, INTERVAL '0') < $2
            ORDER BY start_time ASC
            "
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list_events_to_notify", &e))?;

        rows.iter().map(row_to_event).collect()
    }
}

fn count_query(op: &'static str) {
    metrics::counter!("storage.postgres.queries", "op" => op).increment(1);
}

fn has_sql_state(err: &sqlx::Error, state: &str) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == state)
}

/// Deadlock or serialization failure: another writer won a lock race.
fn is_contended(err: &sqlx::Error) -> bool {
    has_sql_state(err, DEADLOCK_DETECTED) || has_sql_state(err, SERIALIZATION_FAILURE)
}

/// Short, growing pauses for re-running a write that lost a lock race.
fn contention_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(5))
        .multiplier(4.0)
        .max_delay(Duration::from_millis(100))
        .build()
}

fn backend(op: &'static str, err: &sqlx::Error) -> StorageError {
    tracing::error!(op, error = %err, "PostgreSQL query failed");
    metrics::counter!("storage.postgres.errors", "op" => op).increment(1);
    StorageError::Backend(format!("{op}: {err}"))
}

fn date_busy(op: &'static str) -> StorageError {
    metrics::counter!("storage.postgres.conflicts", "op" => op).increment(1);
    StorageError::DateBusy
}

fn malformed(column: &str, err: &sqlx::Error) -> StorageError {
    StorageError::Backend(format!("Malformed row, column {column}: {err}"))
}

fn to_interval(lead: Option<Duration>) -> Result<Option<PgInterval>> {
    lead.map(|lead| {
        PgInterval::try_from(lead)
            .map_err(|e| StorageError::Backend(format!("notify_before out of range: {e}")))
    })
    .transpose()
}

/// Months count as 30 days. Only intervals written from a `Duration` are
/// expected, and those carry microseconds only.
fn from_interval(interval: &PgInterval) -> Result<Duration> {
    let micros = i64::from(interval.months)
        .checked_mul(30 * MICROS_PER_DAY)
        .zip(i64::from(interval.days).checked_mul(MICROS_PER_DAY))
        .and_then(|(months, days)| months.checked_add(days))
        .and_then(|total| total.checked_add(interval.microseconds))
        .and_then(|total| u64::try_from(total).ok())
        .ok_or_else(|| StorageError::Backend("notify_before is negative or too large".to_string()))?;

    Ok(Duration::from_micros(micros))
}

fn row_to_event(row: &PgRow) -> Result<Event> {
    let id: Uuid = row.try_get("id").map_err(|e| malformed("id", &e))?;
    let notify_before: Option<PgInterval> = row
        .try_get("notify_before")
        .map_err(|e| malformed("notify_before", &e))?;

    Ok(Event {
        id: EventId(id),
        title: row.try_get("title").map_err(|e| malformed("title", &e))?,
        description: row
            .try_get("description")
            .map_err(|e| malformed("description", &e))?,
        start_time: row
            .try_get("start_time")
            .map_err(|e| malformed("start_time", &e))?,
        end_time: row.try_get("end_time").map_err(|e| malformed("end_time", &e))?,
        notify_before: notify_before.as_ref().map(from_interval).transpose()?,
        owner: row.try_get("owner").map_err(|e| malformed("owner", &e))?,
    })
}

impl UserRepository for PostgresStorage {
    fn create_user(&self, user: User) -> StorageFuture<'_, ()> {
        Box::pin(self.insert_user(user))
    }

    fn get_user(&self, name: &str) -> StorageFuture<'_, User> {
        let name = name.to_string();
        Box::pin(async move { self.fetch_user(&name).await })
    }

    fn delete_user(&self, name: &str) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move { self.remove_user(&name).await })
    }
}

impl EventRepository for PostgresStorage {
    fn create_event(&self, owner: &str, fields: EventFields) -> StorageFuture<'_, EventId> {
        let owner = owner.to_string();
        Box::pin(async move { self.insert_event(&owner, fields).await })
    }

    fn get_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, Event> {
        let owner = owner.to_string();
        Box::pin(async move { self.fetch_event(&owner, id).await })
    }

    fn update_event(&self, owner: &str, id: EventId, fields: EventFields) -> StorageFuture<'_, ()> {
        let owner = owner.to_string();
        Box::pin(async move { self.replace_event(&owner, id, fields).await })
    }

    fn delete_event(&self, owner: &str, id: EventId) -> StorageFuture<'_, ()> {
        let owner = owner.to_string();
        Box::pin(async move { self.remove_event(&owner, id).await })
    }

    fn list_events(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        let owner = owner.to_string();
        Box::pin(async move { self.select_owner_window(&owner, start, end).await })
    }

    fn list_events_to_notify(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageFuture<'_, Vec<Event>> {
        Box::pin(self.select_due(start, end))
    }
}

impl Storage for PostgresStorage {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.pool.close().await;
            tracing::info!("PostgreSQL pool closed");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_duration() {
        let lead = Duration::from_secs(15 * 60);
        let interval = to_interval(Some(lead)).unwrap().unwrap();
        assert_eq!(interval.months, 0);
        assert_eq!(interval.days, 0);
        assert_eq!(from_interval(&interval).unwrap(), lead);
    }

    #[test]
    fn interval_days_and_months_are_folded() {
        let interval = PgInterval {
            months: 1,
            days: 2,
            microseconds: 3_000_000,
        };
        let expected = Duration::from_secs(32 * 86_400 + 3);
        assert_eq!(from_interval(&interval).unwrap(), expected);
    }

    #[test]
    fn negative_interval_is_malformed() {
        let interval = PgInterval {
            months: 0,
            days: -1,
            microseconds: 0,
        };
        assert!(matches!(from_interval(&interval), Err(StorageError::Backend(_))));
    }

    #[test]
    fn sub_microsecond_lead_is_storable_after_truncation() {
        let fields = EventFields::new("t", DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH)
            .with_notify_before(Duration::new(60, 1))
            .truncated_to_micros();
        let interval = to_interval(fields.notify_before).unwrap().unwrap();
        assert_eq!(from_interval(&interval).unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn contention_policy_grows_and_is_capped() {
        let policy = contention_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
    }

    #[test]
    fn absent_lead_binds_null() {
        assert!(to_interval(None).unwrap().is_none());
    }
}
