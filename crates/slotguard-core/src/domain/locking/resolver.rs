//! Usable-lock resolution
//!
//! A client that already holds an active lock covering the region it is
//! about to change works under that lock instead of creating a second one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::filters::{self, ENTITY_USABLE_CHAIN, EntityQuery, SlotQuery, USABLE_CHAIN};
use super::repository_trait::LockRepositoryTrait;
use super::types::{ProtectedEntity, ProtectionLock, ScheduleLock, ScheduleSlot};
use crate::error::Result;

#[derive(Clone)]
pub struct UsableLockResolver {
    repository: Arc<dyn LockRepositoryTrait>,
}

impl UsableLockResolver {
    pub fn new(repository: Arc<dyn LockRepositoryTrait>) -> Self {
        Self { repository }
    }

    /// An active lock of `client_id` whose interval contains `slot`
    ///
    /// When several qualify, the one expiring last is returned.
    pub async fn find_usable(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleLock>> {
        let query = SlotQuery {
            slot,
            client_id: Some(client_id),
            now,
        };

        let usable = self
            .repository
            .list_schedule_locks_in_column(slot.date, slot.sub_column, now)
            .await?
            .into_iter()
            .filter(|lock| filters::passes(USABLE_CHAIN, lock, &query))
            .max_by_key(|lock| lock.expires_at);

        if let Some(lock) = &usable {
            debug!(client_id, lock_id = %lock.id, slot = %slot, "Found usable schedule lock");
        }
        Ok(usable)
    }

    /// The client's own active protection lock on `entity`
    pub async fn find_usable_protection(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ProtectionLock>> {
        let query = EntityQuery {
            entity,
            client_id: Some(client_id),
            now,
        };
        let existing = self.repository.get_protection_lock(entity).await?;
        Ok(existing.filter(|lock| filters::entity_passes(ENTITY_USABLE_CHAIN, lock, &query)))
    }
}
