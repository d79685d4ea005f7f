//! SQLite lock table connection
//!
//! Opens the pool every coordinator shares and brings the schema up to date.

use crate::storage::migrations::{self, MigrationStatus};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on SQLite's database lock before failing
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IN_MEMORY: &str = ":memory:";

/// Lock table connection options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Lock table file, or `:memory:`
    pub path: PathBuf,
    pub max_connections: u32,
    /// Bring the schema up to date on open
    pub auto_migrate: bool,
    /// WAL lets readers see committed locks while a writer is active
    pub journal_mode: SqliteJournalMode,
    pub synchronous: SqliteSynchronous,
    /// Busy timeout for contended writes
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::with_path(default_database_path())
    }
}

impl DatabaseConfig {
    /// Options for a lock table file at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Options for a private in-memory lock table
    ///
    /// An in-memory database exists per connection, so the pool is pinned
    /// to one connection that never idles out.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            journal_mode: SqliteJournalMode::Memory,
            ..Self::with_path(IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Disable automatic migrations
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };

        Ok(options
            .journal_mode(self.journal_mode)
            .synchronous(self.synchronous)
            .busy_timeout(self.busy_timeout))
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().max_connections(self.max_connections);
        if self.is_in_memory() {
            options.idle_timeout(None).max_lifetime(None)
        } else {
            options
        }
    }
}

/// Default lock table location under the platform data directory
pub fn default_database_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("slotguard").join("locks.db"),
        None => PathBuf::from("slotguard-locks.db"),
    }
}

/// Pool over the lock table
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Connect with the given options, creating the file and its directory
    /// when missing
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create lock table directory: {}", parent.display())
                })?;
            }
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open lock table: {}", config.path.display()))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Open the lock table at `path` with default options
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    /// Create an in-memory lock table (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate the lock table")
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read lock table schema version")
    }

    /// Close the pool, checkpointing the WAL of a file-backed table
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
