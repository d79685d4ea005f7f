//! Database migrations
//!
//! This module manages SQLite schema migrations for the lock table.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Message raised by the schedule lock overlap trigger
pub const SCHEDULE_CONFLICT_MARKER: &str = "schedule_lock_conflict";

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Lock tables
const MIGRATION_V1: &str = r#"
    -- Advisory claims over a region of one calendar column
    CREATE TABLE IF NOT EXISTS schedule_locks (
        id TEXT PRIMARY KEY NOT NULL,
        client_id TEXT NOT NULL,
        day TEXT NOT NULL,
        sub_column INTEGER NOT NULL,
        start_time INTEGER NOT NULL CHECK (start_time >= 0 AND start_time < 2400),
        end_time INTEGER NOT NULL CHECK (end_time > 0 AND end_time <= 2400),
        provider_id INTEGER,
        resource_id INTEGER,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        CHECK (start_time < end_time),
        CHECK (provider_id IS NOT NULL OR resource_id IS NOT NULL)
    );

    CREATE INDEX IF NOT EXISTS idx_schedule_locks_column ON schedule_locks(day, sub_column);
    CREATE INDEX IF NOT EXISTS idx_schedule_locks_provider ON schedule_locks(day, sub_column, provider_id);
    CREATE INDEX IF NOT EXISTS idx_schedule_locks_resource ON schedule_locks(day, sub_column, resource_id);
    CREATE INDEX IF NOT EXISTS idx_schedule_locks_expires_at ON schedule_locks(expires_at);

    -- Advisory claims over one entity
    CREATE TABLE IF NOT EXISTS protection_locks (
        id TEXT PRIMARY KEY NOT NULL,
        client_id TEXT NOT NULL,
        lock_type TEXT NOT NULL CHECK (lock_type IN ('appointment', 'patient')),
        lock_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_protection_locks_entity ON protection_locks(lock_type, lock_id);
    CREATE INDEX IF NOT EXISTS idx_protection_locks_expires_at ON protection_locks(expires_at);
"#;

/// Migration 2: Store-side overlap enforcement for schedule locks
///
/// The new row's `created_at` is the reference instant for expiry, so the
/// writer's clock decides what counts as expired.
const MIGRATION_V2: &str = r#"
    CREATE TRIGGER IF NOT EXISTS trg_schedule_locks_no_overlap
    BEFORE INSERT ON schedule_locks
    WHEN EXISTS (
        SELECT 1 FROM schedule_locks AS existing
        WHERE existing.day = NEW.day
          AND existing.sub_column = NEW.sub_column
          AND existing.client_id <> NEW.client_id
          AND existing.expires_at > NEW.created_at
          AND existing.start_time < NEW.end_time
          AND NEW.start_time < existing.end_time
          AND (
              (NEW.provider_id IS NOT NULL AND existing.provider_id = NEW.provider_id)
              OR (NEW.resource_id IS NOT NULL AND existing.resource_id = NEW.resource_id)
          )
    )
    BEGIN
        SELECT RAISE(ABORT, 'schedule_lock_conflict');
    END;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Lock tables");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Schedule lock overlap trigger");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
