//! Repository trait for the lock table
//!
//! The store is the final arbiter between racing writers: `insert_*` must
//! reject a row that conflicts with an active row inside the same write,
//! and report it as `InsertOutcome::Conflicted` rather than an error.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;

use super::types::{InsertOutcome, ProtectedEntity, ProtectionLock, ScheduleLock};

/// Repository trait for lock persistence
#[async_trait]
pub trait LockRepositoryTrait: Send + Sync {
    // ========== Schedule locks ==========

    /// Insert a schedule lock unless an active overlapping lock of another
    /// client exists; `lock.created_at` is the reference instant
    async fn insert_schedule_lock(&self, lock: &ScheduleLock) -> Result<InsertOutcome>;

    /// Get a schedule lock by ID, expired or not
    async fn get_schedule_lock(&self, lock_id: Uuid) -> Result<Option<ScheduleLock>>;

    /// Active schedule locks on one day's sub-column
    async fn list_schedule_locks_in_column(
        &self,
        day: NaiveDate,
        sub_column: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleLock>>;

    /// Delete a schedule lock if owned by `client_id`; true when a row went away
    async fn delete_schedule_lock(&self, lock_id: Uuid, client_id: &str) -> Result<bool>;

    // ========== Protection locks ==========

    /// Insert a protection lock, replacing an expired row for the same entity
    async fn insert_protection_lock(&self, lock: &ProtectionLock) -> Result<InsertOutcome>;

    /// Swap `previous` (owned by the same client) for `lock` in one write
    async fn replace_protection_lock(
        &self,
        previous: Uuid,
        lock: &ProtectionLock,
    ) -> Result<InsertOutcome>;

    /// Get a protection lock row for an entity, expired or not
    async fn get_protection_lock(&self, entity: ProtectedEntity) -> Result<Option<ProtectionLock>>;

    /// Delete the entity's protection lock if owned by `client_id`
    async fn delete_protection_lock(&self, entity: ProtectedEntity, client_id: &str)
    -> Result<bool>;

    /// Delete a protection lock by ID if owned by `client_id`
    async fn delete_protection_lock_by_id(&self, lock_id: Uuid, client_id: &str) -> Result<bool>;

    // ========== Housekeeping ==========

    /// All active schedule locks, soonest expiry first
    async fn list_active_schedule_locks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleLock>>;

    /// All active protection locks, soonest expiry first
    async fn list_active_protection_locks(&self, now: DateTime<Utc>)
    -> Result<Vec<ProtectionLock>>;

    /// Delete rows that expired at or before `now`; returns rows removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
