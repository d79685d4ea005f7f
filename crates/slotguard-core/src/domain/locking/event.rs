//! Locking domain events
//!
//! Events for tracking lock lifecycle: who claimed which slot or entity,
//! when a client worked under an existing lock, and who got turned away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ProtectedEntity, ProtectionLock, ScheduleLock, ScheduleSlot};
use crate::domain::events::DomainEvent;

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A schedule lock was created
    ScheduleLockAcquired,
    /// A client's existing schedule lock covered a new request
    ScheduleLockReused,
    /// A schedule lock was deleted by its owner
    ScheduleLockReleased,
    /// A protection lock was created
    ProtectionLockAcquired,
    /// A client's existing protection lock covered a new request
    ProtectionLockReused,
    /// A protection lock was deleted by its owner
    ProtectionLockReleased,
    /// A request was refused because another client holds a lock
    LockConflict,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduleLockAcquired => "schedule_lock_acquired",
            Self::ScheduleLockReused => "schedule_lock_reused",
            Self::ScheduleLockReleased => "schedule_lock_released",
            Self::ProtectionLockAcquired => "protection_lock_acquired",
            Self::ProtectionLockReused => "protection_lock_reused",
            Self::ProtectionLockReleased => "protection_lock_released",
            Self::LockConflict => "lock_conflict",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locking domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The lock this event is about
    pub aggregate_id: Uuid,
    /// Type of event
    pub event_type: LockEventType,
    /// Event data
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(lock_id: Uuid, event_type: LockEventType, data: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: lock_id,
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn schedule_lock_acquired(lock: &ScheduleLock) -> Self {
        let data = serde_json::json!({
            "client_id": lock.client_id,
            "slot": lock.slot,
            "expires_at": lock.expires_at,
        });
        Self::new(lock.id, LockEventType::ScheduleLockAcquired, Some(data))
    }

    pub fn schedule_lock_reused(lock: &ScheduleLock, requested: &ScheduleSlot) -> Self {
        let data = serde_json::json!({
            "client_id": lock.client_id,
            "requested": requested,
        });
        Self::new(lock.id, LockEventType::ScheduleLockReused, Some(data))
    }

    pub fn schedule_lock_released(lock_id: Uuid, client_id: &str) -> Self {
        let data = serde_json::json!({ "client_id": client_id });
        Self::new(lock_id, LockEventType::ScheduleLockReleased, Some(data))
    }

    pub fn protection_lock_acquired(lock: &ProtectionLock) -> Self {
        let data = serde_json::json!({
            "client_id": lock.client_id,
            "entity": lock.entity,
            "expires_at": lock.expires_at,
        });
        Self::new(lock.id, LockEventType::ProtectionLockAcquired, Some(data))
    }

    pub fn protection_lock_reused(lock: &ProtectionLock) -> Self {
        let data = serde_json::json!({
            "client_id": lock.client_id,
            "entity": lock.entity,
        });
        Self::new(lock.id, LockEventType::ProtectionLockReused, Some(data))
    }

    pub fn protection_lock_released(lock_id: Uuid, client_id: &str) -> Self {
        let data = serde_json::json!({ "client_id": client_id });
        Self::new(lock_id, LockEventType::ProtectionLockReleased, Some(data))
    }

    /// A schedule request blocked by other clients' locks
    ///
    /// The aggregate is the first blocking lock, or nil when the store
    /// refused the write but the holder was already gone on re-query.
    pub fn schedule_conflict(
        requester: &str,
        requested: &ScheduleSlot,
        holders: &[ScheduleLock],
    ) -> Self {
        let aggregate = holders.first().map(|l| l.id).unwrap_or_else(Uuid::nil);
        let data = serde_json::json!({
            "requester": requester,
            "requested": requested,
            "holders": holders
                .iter()
                .map(|l| serde_json::json!({ "lock_id": l.id, "client_id": l.client_id }))
                .collect::<Vec<_>>(),
        });
        Self::new(aggregate, LockEventType::LockConflict, Some(data))
    }

    /// A protection request blocked by another client's lock
    pub fn protection_conflict(requester: &str, entity: ProtectedEntity, holder: &ProtectionLock) -> Self {
        let data = serde_json::json!({
            "requester": requester,
            "entity": entity,
            "holders": [{ "lock_id": holder.id, "client_id": holder.client_id }],
        });
        Self::new(holder.id, LockEventType::LockConflict, Some(data))
    }
}

impl DomainEvent for LockEvent {
    fn event_type(&self) -> &str {
        self.event_type.as_str()
    }

    fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }
}
