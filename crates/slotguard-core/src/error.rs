//! Error types for Slotguard

use thiserror::Error;

use crate::domain::locking::{ProtectionLock, ScheduleLock, ScheduleSlot};

/// Result type alias using Slotguard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Slotguard error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (E100-E199)
    #[error("Invalid schedule slot: {0}")]
    InvalidSlot(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Lock errors (E300-E399)
    #[error("Schedule slot {slot} is locked: {}", describe_holders(.conflicts))]
    ScheduleLockConflict {
        slot: ScheduleSlot,
        conflicts: Vec<ScheduleLock>,
    },

    #[error(
        "{} {} is protected by client '{}' until {}",
        .0.entity.lock_type,
        .0.entity.lock_id,
        .0.client_id,
        .0.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    )]
    ProtectionLockConflict(Box<ProtectionLock>),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Lock storage unavailable: {0}")]
    Storage(String),

    #[error("Corrupted lock record: {0}")]
    CorruptRecord(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Scheduling errors (E700-E799)
    #[error("Appointment {0} not found.")]
    AppointmentNotFound(i64),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_holders(conflicts: &[ScheduleLock]) -> String {
    if conflicts.is_empty() {
        return "held by another client".to_string();
    }
    conflicts
        .iter()
        .map(|lock| {
            format!(
                "locked by '{}' until {}",
                lock.client_id,
                lock.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSlot(_) => "E100",
            Self::InvalidInput(_) => "E101",
            Self::ScheduleLockConflict { .. } => "E300",
            Self::ProtectionLockConflict(_) => "E301",
            Self::DatabaseError(_) => "E400",
            Self::Storage(_) => "E401",
            Self::CorruptRecord(_) => "E402",
            Self::ConfigError(_) => "E600",
            Self::AppointmentNotFound(_) => "E700",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidSlot(_) => {
                Some("Times use HHMM encoding (0000-2400) and start must be before end".to_string())
            }
            Self::ScheduleLockConflict { .. } | Self::ProtectionLockConflict(_) => {
                Some("Retry after the other client releases the lock or it expires".to_string())
            }
            Self::ConfigError(_) => Some("slotguard config list".to_string()),
            _ => None,
        }
    }

    /// Whether the caller can recover by changing the request or retrying later.
    ///
    /// Storage failures abort the whole mutating operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSlot(_)
                | Self::InvalidInput(_)
                | Self::ScheduleLockConflict { .. }
                | Self::ProtectionLockConflict(_)
                | Self::AppointmentNotFound(_)
        )
    }

    /// Whether this error reports a lock held by someone else
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ScheduleLockConflict { .. } | Self::ProtectionLockConflict(_)
        )
    }

    /// HTTP-equivalent status for an endpoint layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidSlot(_) | Self::InvalidInput(_) => 400,
            Self::AppointmentNotFound(_) => 404,
            Self::ScheduleLockConflict { .. } | Self::ProtectionLockConflict(_) => 409,
            _ => 500,
        }
    }
}
