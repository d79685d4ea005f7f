//! Storage layer - SQLite lock table
//!
//! Provides database management and migrations for the lock table.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning, indexes, and the store-side overlap
//!   trigger that arbitrates racing schedule lock writers
//!
//! # Usage
//!
//! ```ignore
//! use slotguard_core::storage::Database;
//!
//! // Create an in-memory database for testing
//! let db = Database::in_memory().await?;
//!
//! // Or open a file-backed lock table
//! let db = Database::open("/var/lib/slotguard/locks.db").await?;
//! ```

pub mod database;
pub mod migrations;

// Re-export commonly used types
pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
