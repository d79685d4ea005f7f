//! Slotguard Core Library
//!
//! This crate provides the core functionality for Slotguard, including:
//! - Schedule locks over provider and resource calendar intervals
//! - Protection locks over individual appointments
//! - Conflict detection and own-lock reuse
//! - Scoped acquisition that releases only what an operation created
//! - Storage (SQLite lock table with store-side arbitration)
//! - Appointment scheduling wrapped in the locking protocol

pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::events::{EventPublisher, InMemoryEventStore};
    pub use crate::domain::locking::{
        LockConfig, LockCoordinator, LockGuard, LockLease, ProtectedEntity, ProtectionLock,
        ReleaseOutcome, ScheduleLock, ScheduleSlot,
    };
    pub use crate::domain::scheduling::{AppointmentScheduler, AppointmentStore};
    pub use crate::error::{Error, Result};
    pub use crate::storage::Database;
}
