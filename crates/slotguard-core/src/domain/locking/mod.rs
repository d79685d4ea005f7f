//! Schedule and protection locking
//!
//! Advisory, time-bounded locks that keep concurrent clients from committing
//! conflicting changes to the same region of a calendar or the same
//! appointment.
//!
//! # Architecture
//!
//! - **Lock types**: `ScheduleSlot`, `ScheduleLock`, `ProtectionLock`
//! - **Filters**: ordered predicate chains for conflict and reuse matching
//! - **Detector / Resolver**: find conflicting locks and usable own locks
//! - **Coordinator**: `LockCoordinator` for acquire / reuse / release
//! - **Guards**: scoped release of locks an operation created
//!
//! Expiry is evaluated lazily at query time; the lock table's own
//! constraints decide between racing writers.
//!
//! # Example
//!
//! ```ignore
//! use slotguard_core::domain::locking::{LockConfig, LockCoordinator, ScheduleSlot};
//!
//! let coordinator = LockCoordinator::sqlite(db.pool().clone(), LockConfig::default());
//! let slot = ScheduleSlot::for_provider(date, 1, 900, 930, 7);
//!
//! // The lock is released when the closure returns, unless it was reused
//! coordinator
//!     .with_schedule_lock(&slot, "client-a", |_lease| async { book(&slot).await })
//!     .await?;
//! ```

pub mod detector;
pub mod event;
pub mod filters;
pub mod guard;
pub mod manager;
pub mod repository;
pub mod repository_trait;
pub mod resolver;
pub mod types;

// Re-export main types
pub use detector::ConflictDetector;
pub use event::{LockEvent, LockEventType};
pub use guard::LockGuard;
pub use manager::{ActiveLocks, LockCoordinator};
pub use repository::SqliteLockRepository;
pub use repository_trait::LockRepositoryTrait;
pub use resolver::UsableLockResolver;
pub use types::{
    InsertOutcome, LeaseKind, LockConfig, LockLease, LockRequest, LockTarget, MAX_LOCK_TTL,
    ProtectedEntity, ProtectionLock, ProtectionType, ReleaseOutcome, ScheduleLock, ScheduleSlot,
    SlotAxis,
};
