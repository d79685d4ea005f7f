//! SQLite lock repository
//!
//! Times are stored as epoch milliseconds and days as `YYYY-MM-DD` text so
//! that the schema's trigger and unique index can compare them directly.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::repository_trait::LockRepositoryTrait;
use super::types::{
    InsertOutcome, ProtectedEntity, ProtectionLock, ProtectionType, ScheduleLock, ScheduleSlot,
};
use crate::error::{Error, Result};
use crate::storage::migrations::SCHEDULE_CONFLICT_MARKER;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Repository for lock table operations
#[derive(Debug, Clone)]
pub struct SqliteLockRepository {
    pool: SqlitePool,
}

impl SqliteLockRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Whether the store's own conflict enforcement rejected a write
fn is_store_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains(SCHEDULE_CONFLICT_MARKER)
        }
        _ => false,
    }
}

fn classify_insert(result: std::result::Result<(), sqlx::Error>) -> Result<InsertOutcome> {
    match result {
        Ok(()) => Ok(InsertOutcome::Inserted),
        Err(e) if is_store_conflict(&e) => Ok(InsertOutcome::Conflicted),
        Err(e) => Err(Error::DatabaseError(e)),
    }
}

fn millis_to_datetime(ms: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::CorruptRecord(format!("Invalid {} timestamp: {}", column, ms)))
}

async fn insert_protection_row(
    conn: &mut sqlx::SqliteConnection,
    lock: &ProtectionLock,
) -> std::result::Result<(), sqlx::Error> {
    // An expired row still occupies the unique (type, id) key
    sqlx::query(
        r#"
        DELETE FROM protection_locks
        WHERE lock_type = ? AND lock_id = ? AND expires_at <= ?
        "#,
    )
    .bind(lock.entity.lock_type.as_str())
    .bind(lock.entity.lock_id)
    .bind(lock.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO protection_locks (id, client_id, lock_type, lock_id, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lock.id.to_string())
    .bind(&lock.client_id)
    .bind(lock.entity.lock_type.as_str())
    .bind(lock.entity.lock_id)
    .bind(lock.created_at.timestamp_millis())
    .bind(lock.expires_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl LockRepositoryTrait for SqliteLockRepository {
    // ========== Schedule locks ==========

    async fn insert_schedule_lock(&self, lock: &ScheduleLock) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO schedule_locks (
                id, client_id, day, sub_column, start_time, end_time,
                provider_id, resource_id, created_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lock.id.to_string())
        .bind(&lock.client_id)
        .bind(lock.slot.date.format(DAY_FORMAT).to_string())
        .bind(lock.slot.sub_column)
        .bind(lock.slot.start_time)
        .bind(lock.slot.end_time)
        .bind(lock.slot.provider_id)
        .bind(lock.slot.resource_id)
        .bind(lock.created_at.timestamp_millis())
        .bind(lock.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map(|_| ());

        let outcome = classify_insert(result)?;
        debug!(lock_id = %lock.id, outcome = ?outcome, "Schedule lock insert");
        Ok(outcome)
    }

    async fn get_schedule_lock(&self, lock_id: Uuid) -> Result<Option<ScheduleLock>> {
        let row: Option<ScheduleLockRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, day, sub_column, start_time, end_time,
                   provider_id, resource_id, created_at, expires_at
            FROM schedule_locks
            WHERE id = ?
            "#,
        )
        .bind(lock_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(ScheduleLockRow::into_lock).transpose()
    }

    async fn list_schedule_locks_in_column(
        &self,
        day: NaiveDate,
        sub_column: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleLock>> {
        let rows: Vec<ScheduleLockRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, day, sub_column, start_time, end_time,
                   provider_id, resource_id, created_at, expires_at
            FROM schedule_locks
            WHERE day = ? AND sub_column = ? AND expires_at > ?
            ORDER BY start_time ASC, created_at ASC
            "#,
        )
        .bind(day.format(DAY_FORMAT).to_string())
        .bind(sub_column)
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(ScheduleLockRow::into_lock).collect()
    }

    async fn delete_schedule_lock(&self, lock_id: Uuid, client_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedule_locks WHERE id = ? AND client_id = ?")
            .bind(lock_id.to_string())
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== Protection locks ==========

    async fn insert_protection_lock(&self, lock: &ProtectionLock) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        match classify_insert(insert_protection_row(&mut *tx, lock).await)? {
            InsertOutcome::Inserted => {
                tx.commit().await.map_err(Error::DatabaseError)?;
                Ok(InsertOutcome::Inserted)
            }
            // Dropping the transaction rolls back the expired-row cleanup too
            InsertOutcome::Conflicted => Ok(InsertOutcome::Conflicted),
        }
    }

    async fn replace_protection_lock(
        &self,
        previous: Uuid,
        lock: &ProtectionLock,
    ) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        let removed = sqlx::query("DELETE FROM protection_locks WHERE id = ? AND client_id = ?")
            .bind(previous.to_string())
            .bind(&lock.client_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        debug!(
            previous = %previous,
            removed = removed.rows_affected(),
            "Replacing protection lock"
        );

        match classify_insert(insert_protection_row(&mut *tx, lock).await)? {
            InsertOutcome::Inserted => {
                tx.commit().await.map_err(Error::DatabaseError)?;
                Ok(InsertOutcome::Inserted)
            }
            InsertOutcome::Conflicted => Ok(InsertOutcome::Conflicted),
        }
    }

    async fn get_protection_lock(&self, entity: ProtectedEntity) -> Result<Option<ProtectionLock>> {
        let row: Option<ProtectionLockRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, lock_type, lock_id, created_at, expires_at
            FROM protection_locks
            WHERE lock_type = ? AND lock_id = ?
            "#,
        )
        .bind(entity.lock_type.as_str())
        .bind(entity.lock_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(ProtectionLockRow::into_lock).transpose()
    }

    async fn delete_protection_lock(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM protection_locks WHERE lock_type = ? AND lock_id = ? AND client_id = ?",
        )
        .bind(entity.lock_type.as_str())
        .bind(entity.lock_id)
        .bind(client_id)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_protection_lock_by_id(&self, lock_id: Uuid, client_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM protection_locks WHERE id = ? AND client_id = ?")
            .bind(lock_id.to_string())
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== Housekeeping ==========

    async fn list_active_schedule_locks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleLock>> {
        let rows: Vec<ScheduleLockRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, day, sub_column, start_time, end_time,
                   provider_id, resource_id, created_at, expires_at
            FROM schedule_locks
            WHERE expires_at > ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(ScheduleLockRow::into_lock).collect()
    }

    async fn list_active_protection_locks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProtectionLock>> {
        let rows: Vec<ProtectionLockRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, lock_type, lock_id, created_at, expires_at
            FROM protection_locks
            WHERE expires_at > ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(ProtectionLockRow::into_lock).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now.timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        let schedule = sqlx::query("DELETE FROM schedule_locks WHERE expires_at <= ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        let protection = sqlx::query("DELETE FROM protection_locks WHERE expires_at <= ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        tx.commit().await.map_err(Error::DatabaseError)?;

        Ok(schedule.rows_affected() + protection.rows_affected())
    }
}

// ========== Row Types ==========

/// Database row for a schedule lock
#[derive(sqlx::FromRow)]
struct ScheduleLockRow {
    id: String,
    client_id: String,
    day: String,
    sub_column: i32,
    start_time: i32,
    end_time: i32,
    provider_id: Option<i64>,
    resource_id: Option<i64>,
    created_at: i64,
    expires_at: i64,
}

impl ScheduleLockRow {
    fn into_lock(self) -> Result<ScheduleLock> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::CorruptRecord(format!("Invalid lock ID: {}", e)))?;
        let date = NaiveDate::parse_from_str(&self.day, DAY_FORMAT)
            .map_err(|e| Error::CorruptRecord(format!("Invalid lock day '{}': {}", self.day, e)))?;

        Ok(ScheduleLock {
            id,
            client_id: self.client_id,
            slot: ScheduleSlot {
                date,
                sub_column: self.sub_column,
                start_time: self.start_time,
                end_time: self.end_time,
                provider_id: self.provider_id,
                resource_id: self.resource_id,
            },
            created_at: millis_to_datetime(self.created_at, "created_at")?,
            expires_at: millis_to_datetime(self.expires_at, "expires_at")?,
        })
    }
}

/// Database row for a protection lock
#[derive(sqlx::FromRow)]
struct ProtectionLockRow {
    id: String,
    client_id: String,
    lock_type: String,
    lock_id: i64,
    created_at: i64,
    expires_at: i64,
}

impl ProtectionLockRow {
    fn into_lock(self) -> Result<ProtectionLock> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::CorruptRecord(format!("Invalid lock ID: {}", e)))?;
        let lock_type = ProtectionType::parse(&self.lock_type).ok_or_else(|| {
            Error::CorruptRecord(format!("Invalid protection type: {}", self.lock_type))
        })?;

        Ok(ProtectionLock {
            id,
            client_id: self.client_id,
            entity: ProtectedEntity::new(lock_type, self.lock_id),
            created_at: millis_to_datetime(self.created_at, "created_at")?,
            expires_at: millis_to_datetime(self.expires_at, "expires_at")?,
        })
    }
}
