//! Conflict detection over the lock table
//!
//! The repository narrows candidates to one day's sub-column; the predicate
//! chains in [`super::filters`] decide the rest. Expired rows are excluded at
//! query time, so no sweeper is needed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::filters::{
    self, CONFLICT_CHAIN, ENTITY_CONFLICT_CHAIN, EntityQuery, OVERLAP_CHAIN, SlotQuery,
};
use super::repository_trait::LockRepositoryTrait;
use super::types::{ProtectedEntity, ProtectionLock, ScheduleLock, ScheduleSlot};
use crate::error::Result;

/// Finds active locks that overlap a slot or guard an entity
#[derive(Clone)]
pub struct ConflictDetector {
    repository: Arc<dyn LockRepositoryTrait>,
}

impl ConflictDetector {
    pub fn new(repository: Arc<dyn LockRepositoryTrait>) -> Self {
        Self { repository }
    }

    /// Every active schedule lock overlapping `slot`, whoever holds it
    pub async fn find_conflicts(
        &self,
        slot: &ScheduleSlot,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleLock>> {
        let query = SlotQuery {
            slot,
            client_id: None,
            now,
        };
        self.scan(OVERLAP_CHAIN, &query).await
    }

    /// Active overlapping locks that block `client_id`
    pub async fn find_conflicts_for(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleLock>> {
        let query = SlotQuery {
            slot,
            client_id: Some(client_id),
            now,
        };
        self.scan(CONFLICT_CHAIN, &query).await
    }

    async fn scan(
        &self,
        chain: &[filters::SlotFilter],
        query: &SlotQuery<'_>,
    ) -> Result<Vec<ScheduleLock>> {
        let candidates = self
            .repository
            .list_schedule_locks_in_column(query.slot.date, query.slot.sub_column, query.now)
            .await?;
        let scanned = candidates.len();

        let conflicts: Vec<ScheduleLock> = candidates
            .into_iter()
            .filter(|lock| filters::passes(chain, lock, query))
            .collect();

        debug!(
            slot = %query.slot,
            scanned,
            conflicts = conflicts.len(),
            "Scanned schedule locks"
        );
        Ok(conflicts)
    }

    /// The active protection lock on `entity`, if any
    ///
    /// With a `client_id`, a lock held by that client is not a conflict.
    pub async fn find_protection_conflict(
        &self,
        entity: ProtectedEntity,
        client_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ProtectionLock>> {
        let query = EntityQuery {
            entity,
            client_id,
            now,
        };
        let existing = self.repository.get_protection_lock(entity).await?;
        Ok(existing.filter(|lock| filters::entity_passes(ENTITY_CONFLICT_CHAIN, lock, &query)))
    }
}
