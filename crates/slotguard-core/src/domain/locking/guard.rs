//! Lock guards for scoped release
//!
//! A guard wraps the lease returned by `create_*_if_needed`. Dropping a guard
//! that still owns its release queues the lease on the coordinator's release
//! channel; the coordinator deletes queued locks at the start of its next
//! operation. Guards over reused locks never release anything.

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{LeaseKind, LockLease};

/// Channel for handing dropped leases back to the coordinator
pub type ReleaseNotifier = mpsc::Sender<LockLease>;

/// Holds a lease until it is released or dropped
#[derive(Debug)]
pub struct LockGuard {
    lease: LockLease,

    /// Channel to notify the coordinator of release
    release_tx: Option<ReleaseNotifier>,

    /// Whether the lease has been handed back explicitly
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(lease: LockLease, release_tx: ReleaseNotifier) -> Self {
        Self {
            lease,
            release_tx: Some(release_tx),
            released: false,
        }
    }

    /// Create a guard without a release notifier (for testing)
    #[cfg(test)]
    pub fn new_test(lease: LockLease) -> Self {
        Self {
            lease,
            release_tx: None,
            released: false,
        }
    }

    /// The lease this guard holds
    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    pub fn lock_id(&self) -> Uuid {
        self.lease.lock_id
    }

    /// Whether this guard's operation created the lock
    pub fn created(&self) -> bool {
        self.lease.created
    }

    /// Point the guard at the lock that replaced its own on refresh
    pub(crate) fn refreshed(&mut self, lock_id: Uuid) {
        self.lease.lock_id = lock_id;
    }

    /// Take the lease out for an explicit release; Drop then does nothing
    pub(crate) fn disarm(mut self) -> LockLease {
        self.released = true;
        self.lease.clone()
    }

    fn queue_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if !self.lease.owns_release() {
            return;
        }
        if let Some(tx) = self.release_tx.take() {
            // Non-blocking send; a full or closed channel leaves the lock to expire
            if tx.try_send(self.lease.clone()).is_err() {
                tracing::warn!(
                    lock_id = %self.lease.lock_id,
                    "Release queue unavailable, lock will expire on its own"
                );
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.queue_release();
    }
}

impl fmt::Display for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lease.kind {
            LeaseKind::Schedule => write!(f, "ScheduleLock[{}]", self.lease.lock_id),
            LeaseKind::Protection(entity) => {
                write!(f, "ProtectionLock[{}:{}]", entity, self.lease.lock_id)
            }
        }
    }
}
