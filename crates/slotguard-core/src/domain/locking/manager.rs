//! Lock coordinator for schedule and protection locks
//!
//! The coordinator is the single entry point for one mutating operation:
//! - slots are validated before any lock table access
//! - a lock the client already holds is reused when it covers the request
//! - otherwise a lock is created and the store arbitrates racing writers
//! - only locks the operation created are released, on every exit path
//!
//! There is no background task. Leases queued by dropped guards are drained
//! at the start of every public operation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::detector::ConflictDetector;
use super::event::LockEvent;
use super::guard::LockGuard;
use super::repository::SqliteLockRepository;
use super::repository_trait::LockRepositoryTrait;
use super::resolver::UsableLockResolver;
use super::types::{
    InsertOutcome, LeaseKind, LockConfig, LockLease, LockRequest, ProtectedEntity,
    ProtectionLock, ReleaseOutcome, ScheduleLock, ScheduleSlot,
};
use crate::domain::events::EventPublisher;
use crate::error::{Error, Result};

/// Capacity of the dropped-guard release queue
const RELEASE_QUEUE_CAPACITY: usize = 256;

/// Snapshot of every non-expired lock
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActiveLocks {
    pub schedule: Vec<ScheduleLock>,
    pub protection: Vec<ProtectionLock>,
}

impl ActiveLocks {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty() && self.protection.is_empty()
    }

    pub fn len(&self) -> usize {
        self.schedule.len() + self.protection.len()
    }
}

/// Coordinates lock acquisition, reuse, and release
pub struct LockCoordinator {
    repository: Arc<dyn LockRepositoryTrait>,

    config: LockConfig,

    detector: ConflictDetector,

    resolver: UsableLockResolver,

    /// Optional sink for lock lifecycle events
    publisher: Option<Arc<dyn EventPublisher>>,

    /// Channel receiver for leases queued by dropped guards
    release_rx: Arc<Mutex<mpsc::Receiver<LockLease>>>,

    /// Channel sender handed to every guard
    release_tx: mpsc::Sender<LockLease>,
}

fn validate_client(client_id: &str) -> Result<()> {
    if client_id.trim().is_empty() {
        return Err(Error::InvalidInput("client id must not be empty".to_string()));
    }
    Ok(())
}

fn schedule_lease(lock_id: Uuid, client_id: &str, created: bool) -> LockLease {
    LockLease {
        lock_id,
        client_id: client_id.to_string(),
        kind: LeaseKind::Schedule,
        created,
    }
}

fn protection_lease(
    entity: ProtectedEntity,
    lock_id: Uuid,
    client_id: &str,
    created: bool,
) -> LockLease {
    LockLease {
        lock_id,
        client_id: client_id.to_string(),
        kind: LeaseKind::Protection(entity),
        created,
    }
}

fn log_ignored_release(lock: &str, client_id: &str, outcome: ReleaseOutcome) {
    match outcome {
        ReleaseOutcome::NotOwner => {
            warn!(lock = %lock, client_id, "Release ignored, lock is held by another client")
        }
        _ => debug!(lock = %lock, client_id, outcome = %outcome, "Nothing to release"),
    }
}

impl LockCoordinator {
    /// Create a coordinator over any lock repository
    pub fn new(repository: Arc<dyn LockRepositoryTrait>, config: LockConfig) -> Self {
        let (release_tx, release_rx) = mpsc::channel(RELEASE_QUEUE_CAPACITY);

        Self {
            detector: ConflictDetector::new(repository.clone()),
            resolver: UsableLockResolver::new(repository.clone()),
            repository,
            config,
            publisher: None,
            release_rx: Arc::new(Mutex::new(release_rx)),
            release_tx,
        }
    }

    /// Create a coordinator over the SQLite lock table
    pub fn sqlite(pool: SqlitePool, config: LockConfig) -> Self {
        Self::new(Arc::new(SqliteLockRepository::new(pool)), config)
    }

    /// Publish lock events through `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    // ========== Schedule locks ==========

    /// Return a lock covering `slot` for `client_id`, creating one if needed
    ///
    /// `created` on the lease tells the caller whether it must release it.
    pub async fn create_schedule_lock_if_needed(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
    ) -> Result<LockLease> {
        self.process_releases().await;
        validate_client(client_id)?;
        slot.validate()?;

        let now = Utc::now();

        if let Some(existing) = self.resolver.find_usable(slot, client_id, now).await? {
            debug!(client_id, lock_id = %existing.id, slot = %slot, "Reusing schedule lock");
            self.publish(LockEvent::schedule_lock_reused(&existing, slot))
                .await;
            return Ok(schedule_lease(existing.id, client_id, false));
        }

        let blocking = self.detector.find_conflicts_for(slot, client_id, now).await?;
        if !blocking.is_empty() {
            return Err(self.schedule_conflict(slot, client_id, blocking).await);
        }

        let lock = LockRequest::schedule(slot.clone(), client_id, &self.config)
            .into_schedule_lock(now)?;

        match self.repository.insert_schedule_lock(&lock).await? {
            InsertOutcome::Inserted => {
                info!(
                    client_id,
                    lock_id = %lock.id,
                    slot = %slot,
                    expires_at = %lock.expires_at,
                    "Schedule lock acquired"
                );
                self.publish(LockEvent::schedule_lock_acquired(&lock)).await;
                Ok(schedule_lease(lock.id, client_id, true))
            }
            InsertOutcome::Conflicted => {
                // Another client won between the pre-check and the insert
                let winners = self
                    .detector
                    .find_conflicts_for(slot, client_id, Utc::now())
                    .await?;
                Err(self.schedule_conflict(slot, client_id, winners).await)
            }
        }
    }

    /// Acquire (or reuse) a schedule lock and return its ID
    pub async fn acquire_schedule_lock(&self, slot: &ScheduleSlot, client_id: &str) -> Result<Uuid> {
        Ok(self.create_schedule_lock_if_needed(slot, client_id).await?.lock_id)
    }

    /// Release a schedule lock owned by `client_id`
    ///
    /// Never fails for a missing, expired, or foreign lock; the outcome says
    /// which case applied.
    pub async fn release_schedule_lock(
        &self,
        lock_id: Uuid,
        client_id: &str,
    ) -> Result<ReleaseOutcome> {
        self.process_releases().await;
        self.delete_schedule_lock(lock_id, client_id).await
    }

    /// Every active schedule lock overlapping `slot`
    pub async fn find_conflicts(&self, slot: &ScheduleSlot) -> Result<Vec<ScheduleLock>> {
        self.process_releases().await;
        slot.validate()?;
        self.detector.find_conflicts(slot, Utc::now()).await
    }

    async fn delete_schedule_lock(&self, lock_id: Uuid, client_id: &str) -> Result<ReleaseOutcome> {
        if self.repository.delete_schedule_lock(lock_id, client_id).await? {
            info!(client_id, lock_id = %lock_id, "Schedule lock released");
            self.publish(LockEvent::schedule_lock_released(lock_id, client_id))
                .await;
            return Ok(ReleaseOutcome::Released);
        }

        let now = Utc::now();
        let outcome = match self.repository.get_schedule_lock(lock_id).await? {
            Some(lock) if !lock.is_owned_by(client_id) && !lock.is_expired_at(now) => {
                ReleaseOutcome::NotOwner
            }
            _ => ReleaseOutcome::NotHeld,
        };
        log_ignored_release(&lock_id.to_string(), client_id, outcome);
        Ok(outcome)
    }

    async fn schedule_conflict(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
        conflicts: Vec<ScheduleLock>,
    ) -> Error {
        warn!(
            client_id,
            slot = %slot,
            holders = conflicts.len(),
            "Schedule lock conflict"
        );
        self.publish(LockEvent::schedule_conflict(client_id, slot, &conflicts))
            .await;
        Error::ScheduleLockConflict {
            slot: slot.clone(),
            conflicts,
        }
    }

    // ========== Protection locks ==========

    /// Return a protection lock on `entity` for `client_id`, creating one if
    /// needed
    pub async fn create_protection_lock_if_needed(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Result<LockLease> {
        self.process_releases().await;
        validate_client(client_id)?;

        let now = Utc::now();

        if let Some(existing) = self
            .resolver
            .find_usable_protection(entity, client_id, now)
            .await?
        {
            debug!(client_id, lock_id = %existing.id, entity = %entity, "Reusing protection lock");
            self.publish(LockEvent::protection_lock_reused(&existing)).await;
            return Ok(protection_lease(entity, existing.id, client_id, false));
        }

        if let Some(holder) = self
            .detector
            .find_protection_conflict(entity, Some(client_id), now)
            .await?
        {
            return Err(self.protection_conflict(entity, client_id, holder).await);
        }

        let lock = LockRequest::protection(entity, client_id, duration, &self.config)
            .into_protection_lock(now)?;

        match self.repository.insert_protection_lock(&lock).await? {
            InsertOutcome::Inserted => {
                info!(
                    client_id,
                    lock_id = %lock.id,
                    entity = %entity,
                    expires_at = %lock.expires_at,
                    "Protection lock acquired"
                );
                self.publish(LockEvent::protection_lock_acquired(&lock)).await;
                Ok(protection_lease(entity, lock.id, client_id, true))
            }
            InsertOutcome::Conflicted => self.after_lost_protection_race(entity, client_id).await,
        }
    }

    /// Acquire (or reuse) a protection lock and return its ID
    pub async fn acquire_protection_lock(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Result<Uuid> {
        Ok(self
            .create_protection_lock_if_needed(entity, client_id, duration)
            .await?
            .lock_id)
    }

    /// Extend the caller's protection on `entity` by re-creating it
    ///
    /// The refreshed lock has a new ID and a new expiry. An absent or expired
    /// lock is simply created. Leases still naming the previous ID no longer
    /// release anything; refresh a held guard with [`Self::refresh_guard`].
    pub async fn refresh_protection_lock(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Result<Uuid> {
        self.process_releases().await;
        validate_client(client_id)?;

        let now = Utc::now();

        if let Some(holder) = self
            .detector
            .find_protection_conflict(entity, Some(client_id), now)
            .await?
        {
            return Err(self.protection_conflict(entity, client_id, holder).await);
        }

        let renewed = LockRequest::protection(entity, client_id, duration, &self.config)
            .into_protection_lock(now)?;

        let current = self
            .resolver
            .find_usable_protection(entity, client_id, now)
            .await?;
        let outcome = match &current {
            Some(current) => {
                self.repository
                    .replace_protection_lock(current.id, &renewed)
                    .await?
            }
            None => self.repository.insert_protection_lock(&renewed).await?,
        };

        match outcome {
            InsertOutcome::Inserted => {
                info!(
                    client_id,
                    previous = ?current.as_ref().map(|l| l.id),
                    lock_id = %renewed.id,
                    entity = %entity,
                    expires_at = %renewed.expires_at,
                    "Protection lock refreshed"
                );
                self.publish(LockEvent::protection_lock_acquired(&renewed)).await;
                Ok(renewed.id)
            }
            InsertOutcome::Conflicted => Ok(self
                .after_lost_protection_race(entity, client_id)
                .await?
                .lock_id),
        }
    }

    /// Release the caller's protection on `entity`
    pub async fn release_protection_lock(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
    ) -> Result<ReleaseOutcome> {
        self.process_releases().await;

        let now = Utc::now();
        let outcome = match self.repository.get_protection_lock(entity).await? {
            Some(lock) if lock.is_owned_by(client_id) => {
                if self.repository.delete_protection_lock(entity, client_id).await? {
                    info!(client_id, lock_id = %lock.id, entity = %entity, "Protection lock released");
                    self.publish(LockEvent::protection_lock_released(lock.id, client_id))
                        .await;
                    return Ok(ReleaseOutcome::Released);
                }
                ReleaseOutcome::NotHeld
            }
            Some(lock) if !lock.is_expired_at(now) => ReleaseOutcome::NotOwner,
            _ => ReleaseOutcome::NotHeld,
        };

        log_ignored_release(&entity.to_string(), client_id, outcome);
        Ok(outcome)
    }

    /// The active protection lock on `entity`, whoever holds it
    pub async fn find_protection_conflict(
        &self,
        entity: ProtectedEntity,
    ) -> Result<Option<ProtectionLock>> {
        self.process_releases().await;
        self.detector
            .find_protection_conflict(entity, None, Utc::now())
            .await
    }

    /// The store refused an insert; find out who holds the entity now
    async fn after_lost_protection_race(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
    ) -> Result<LockLease> {
        let winner = self
            .detector
            .find_protection_conflict(entity, None, Utc::now())
            .await?;

        match winner {
            // A concurrent request of the same client got there first
            Some(lock) if lock.is_owned_by(client_id) => {
                debug!(client_id, lock_id = %lock.id, entity = %entity, "Reusing protection lock");
                Ok(protection_lease(entity, lock.id, client_id, false))
            }
            Some(lock) => Err(self.protection_conflict(entity, client_id, lock).await),
            None => Err(Error::Storage(format!(
                "protection on {} changed while it was being created",
                entity
            ))),
        }
    }

    async fn protection_conflict(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        holder: ProtectionLock,
    ) -> Error {
        warn!(
            client_id,
            entity = %entity,
            holder = %holder.client_id,
            "Protection lock conflict"
        );
        self.publish(LockEvent::protection_conflict(client_id, entity, &holder))
            .await;
        Error::ProtectionLockConflict(Box::new(holder))
    }

    // ========== Leases and guards ==========

    /// Release a lease from `create_*_if_needed`
    ///
    /// Leases over reused locks are left alone and report `Retained`.
    pub async fn release(&self, lease: &LockLease) -> Result<ReleaseOutcome> {
        self.process_releases().await;
        self.release_lease(lease).await
    }

    async fn release_lease(&self, lease: &LockLease) -> Result<ReleaseOutcome> {
        if !lease.owns_release() {
            debug!(
                client_id = %lease.client_id,
                lock_id = %lease.lock_id,
                "Keeping reused lock"
            );
            return Ok(ReleaseOutcome::Retained);
        }

        match lease.kind {
            LeaseKind::Schedule => {
                self.delete_schedule_lock(lease.lock_id, &lease.client_id)
                    .await
            }
            LeaseKind::Protection(entity) => {
                let removed = self
                    .repository
                    .delete_protection_lock_by_id(lease.lock_id, &lease.client_id)
                    .await?;
                if removed {
                    info!(
                        client_id = %lease.client_id,
                        lock_id = %lease.lock_id,
                        entity = %entity,
                        "Protection lock released"
                    );
                    self.publish(LockEvent::protection_lock_released(
                        lease.lock_id,
                        &lease.client_id,
                    ))
                    .await;
                    return Ok(ReleaseOutcome::Released);
                }
                log_ignored_release(
                    &lease.lock_id.to_string(),
                    &lease.client_id,
                    ReleaseOutcome::NotHeld,
                );
                Ok(ReleaseOutcome::NotHeld)
            }
        }
    }

    /// Acquire a schedule lock wrapped in a guard
    ///
    /// Dropping the guard without [`Self::release_guard`] queues the release
    /// for the next coordinator call.
    pub async fn guard_schedule_lock(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
    ) -> Result<LockGuard> {
        let lease = self.create_schedule_lock_if_needed(slot, client_id).await?;
        Ok(LockGuard::new(lease, self.release_tx.clone()))
    }

    /// Acquire a protection lock wrapped in a guard
    pub async fn guard_protection_lock(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        duration: Option<Duration>,
    ) -> Result<LockGuard> {
        let lease = self
            .create_protection_lock_if_needed(entity, client_id, duration)
            .await?;
        Ok(LockGuard::new(lease, self.release_tx.clone()))
    }

    /// Refresh the protection lock a guard holds
    ///
    /// The guard follows the renewed lock, so releasing or dropping it later
    /// removes the refreshed lock rather than the one it replaced.
    pub async fn refresh_guard(
        &self,
        guard: &mut LockGuard,
        duration: Option<Duration>,
    ) -> Result<Uuid> {
        let entity = match guard.lease().kind {
            LeaseKind::Protection(entity) => entity,
            LeaseKind::Schedule => {
                return Err(Error::InvalidInput(
                    "schedule locks have a fixed lifetime and cannot be refreshed".to_string(),
                ));
            }
        };
        let client_id = guard.lease().client_id.clone();

        let lock_id = self
            .refresh_protection_lock(entity, &client_id, duration)
            .await?;
        guard.refreshed(lock_id);
        Ok(lock_id)
    }

    /// Release a guard now instead of on drop
    pub async fn release_guard(&self, guard: LockGuard) -> Result<ReleaseOutcome> {
        let lease = guard.disarm();
        self.release(&lease).await
    }

    /// Run `operation` under a schedule lock
    ///
    /// A lock created here is released whether the operation succeeds,
    /// fails, or panics. A reused lock is left for its owner.
    pub async fn with_schedule_lock<T, F, Fut>(
        &self,
        slot: &ScheduleSlot,
        client_id: &str,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.guard_schedule_lock(slot, client_id).await?;
        self.run_guarded(guard, operation).await
    }

    /// Run `operation` under a protection lock on `entity`
    pub async fn with_protection_lock<T, F, Fut>(
        &self,
        entity: ProtectedEntity,
        client_id: &str,
        duration: Option<Duration>,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self
            .guard_protection_lock(entity, client_id, duration)
            .await?;
        self.run_guarded(guard, operation).await
    }

    async fn run_guarded<T, F, Fut>(&self, guard: LockGuard, operation: F) -> Result<T>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = guard.lease().clone();
        let outcome = AssertUnwindSafe(async move { operation(lease).await })
            .catch_unwind()
            .await;

        // A failed release leaves the lock to expire; the operation's own
        // result still wins
        if let Err(e) = self.release_guard(guard).await {
            warn!(error = %e, "Failed to release lock after operation");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Release every lease queued by dropped guards
    ///
    /// Returns how many leases were drained. Failures are logged; those
    /// locks expire on their own.
    pub async fn process_releases(&self) -> usize {
        let pending: Vec<LockLease> = {
            let mut rx = self.release_rx.lock().await;
            let mut pending = Vec::new();
            while let Ok(lease) = rx.try_recv() {
                pending.push(lease);
            }
            pending
        };

        for lease in &pending {
            if let Err(e) = self.release_lease(lease).await {
                warn!(lock_id = %lease.lock_id, error = %e, "Failed to release dropped lock");
            }
        }
        pending.len()
    }

    // ========== Housekeeping ==========

    /// All non-expired locks in both tables
    pub async fn list_active_locks(&self) -> Result<ActiveLocks> {
        self.process_releases().await;
        let now = Utc::now();
        Ok(ActiveLocks {
            schedule: self.repository.list_active_schedule_locks(now).await?,
            protection: self.repository.list_active_protection_locks(now).await?,
        })
    }

    /// Delete expired rows; expiry is lazy, so this is only housekeeping
    pub async fn purge_expired(&self) -> Result<u64> {
        self.process_releases().await;
        let removed = self.repository.purge_expired(Utc::now()).await?;
        info!(removed, "Purged expired locks");
        Ok(removed)
    }

    async fn publish(&self, event: LockEvent) {
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&event).await {
                warn!(
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to publish lock event"
                );
            }
        }
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("config", &self.config)
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}
