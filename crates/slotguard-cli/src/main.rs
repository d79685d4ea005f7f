//! Slotguard CLI - schedule and protection locks from the shell

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use slotguard_core::Error;
use slotguard_core::config::Config;
use slotguard_core::domain::locking::{
    LockCoordinator, LockLease, ProtectedEntity, ProtectionLock, ReleaseOutcome, ScheduleLock,
    ScheduleSlot,
};
use slotguard_core::storage::Database;
use tracing::debug;
use uuid::Uuid;

/// Exit status when another client holds the requested lock
const EXIT_CONFLICT: u8 = 2;

#[derive(Parser)]
#[command(name = "slotguard")]
#[command(author, version, about = "Advisory schedule and protection locks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client identity the locks are taken for
    #[arg(long, global = true, default_value = "slotguard-cli")]
    client: String,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Lock table path (overrides storage.database_path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a schedule lock over a slot, reusing one you already hold
    Acquire {
        #[command(flatten)]
        slot: SlotArgs,
    },

    /// Release a schedule lock by ID
    Release {
        /// Lock ID
        lock_id: Uuid,
    },

    /// Protect an appointment
    Protect {
        /// Appointment ID
        #[arg(long)]
        appointment: i64,
        /// Protection lifetime in seconds (clamped to the configured maximum)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Release your protection on an appointment
    Unprotect {
        /// Appointment ID
        #[arg(long)]
        appointment: i64,
    },

    /// Extend your protection on an appointment
    Refresh {
        /// Appointment ID
        #[arg(long)]
        appointment: i64,
        /// Protection lifetime in seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Show who holds a slot or an appointment
    Conflicts {
        /// Appointment ID (instead of a slot)
        #[arg(long, conflicts_with_all = ["date", "start", "end"])]
        appointment: Option<i64>,
        /// Day, YYYY-MM-DD
        #[arg(long, required_unless_present = "appointment")]
        date: Option<NaiveDate>,
        /// Sub-column within the calendar column
        #[arg(long, default_value_t = 0)]
        column: i32,
        /// Start time, HHMM
        #[arg(long, required_unless_present = "appointment")]
        start: Option<i32>,
        /// End time, HHMM (exclusive)
        #[arg(long, required_unless_present = "appointment")]
        end: Option<i32>,
        /// Provider ID
        #[arg(long)]
        provider: Option<i64>,
        /// Resource ID
        #[arg(long)]
        resource: Option<i64>,
    },

    /// List active schedule and protection locks
    Locks,

    /// Delete expired lock rows
    Purge,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct SlotArgs {
    /// Day, YYYY-MM-DD
    #[arg(long)]
    date: NaiveDate,
    /// Sub-column within the calendar column
    #[arg(long, default_value_t = 0)]
    column: i32,
    /// Start time, HHMM
    #[arg(long)]
    start: i32,
    /// End time, HHMM (exclusive)
    #[arg(long)]
    end: i32,
    /// Provider ID
    #[arg(long)]
    provider: Option<i64>,
    /// Resource ID
    #[arg(long)]
    resource: Option<i64>,
}

impl SlotArgs {
    fn to_slot(&self) -> ScheduleSlot {
        ScheduleSlot {
            date: self.date,
            sub_column: self.column,
            start_time: self.start,
            end_time: self.end,
            provider_id: self.provider,
            resource_id: self.resource,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "slotguard=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e, format),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    let command = match cli.command {
        Commands::Config { action } => return cmd_config(action, out),
        command => command,
    };

    let coordinator = open_coordinator(cli.database).await?;
    let client = cli.client.as_str();

    match command {
        Commands::Acquire { slot } => cmd_acquire(&coordinator, &slot.to_slot(), client, out).await,

        Commands::Release { lock_id } => cmd_release(&coordinator, lock_id, client, out).await,

        Commands::Protect {
            appointment,
            duration,
        } => {
            let duration = duration.map(Duration::from_secs);
            cmd_protect(&coordinator, appointment, client, duration, out).await
        }

        Commands::Unprotect { appointment } => {
            cmd_unprotect(&coordinator, appointment, client, out).await
        }

        Commands::Refresh {
            appointment,
            duration,
        } => {
            let duration = duration.map(Duration::from_secs);
            cmd_refresh(&coordinator, appointment, client, duration, out).await
        }

        Commands::Conflicts {
            appointment: Some(appointment),
            ..
        } => cmd_protection_conflict(&coordinator, appointment, out).await,

        Commands::Conflicts {
            appointment: None,
            date,
            column,
            start,
            end,
            provider,
            resource,
        } => {
            let (Some(date), Some(start), Some(end)) = (date, start, end) else {
                return Err(anyhow::anyhow!(
                    "Either --appointment or --date, --start and --end are required"
                ));
            };
            let slot = SlotArgs {
                date,
                column,
                start,
                end,
                provider,
                resource,
            };
            cmd_conflicts(&coordinator, &slot.to_slot(), out).await
        }

        Commands::Locks => cmd_locks(&coordinator, out).await,

        Commands::Purge => cmd_purge(&coordinator, out).await,

        Commands::Config { .. } => Ok(()),
    }
}

/// Open the lock table and build a coordinator from the saved configuration
async fn open_coordinator(database: Option<PathBuf>) -> anyhow::Result<LockCoordinator> {
    let mut config = Config::load()?;
    if let Some(path) = database {
        config.storage.database_path = Some(path);
    }

    let db_config = config.database_config();
    debug!(path = %db_config.path.display(), "Opening lock table");
    let db = Database::new(db_config).await?;

    Ok(LockCoordinator::sqlite(db.pool().clone(), config.lock_config()?))
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self, value: serde_json::Value) {
        println!("{}", value);
    }

    fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn format_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn schedule_holder_line(lock: &ScheduleLock) -> String {
    format!(
        "locked by {} until {} ({}, lock {})",
        lock.client_id,
        format_time(lock.expires_at),
        lock.slot,
        lock.id
    )
}

fn protection_holder_line(lock: &ProtectionLock) -> String {
    format!(
        "locked by {} until {} ({}, lock {})",
        lock.client_id,
        format_time(lock.expires_at),
        lock.entity,
        lock.id
    )
}

fn lease_json(lease: &LockLease) -> serde_json::Value {
    json!({
        "lock_id": lease.lock_id,
        "client_id": lease.client_id,
        "created": lease.created,
    })
}

fn report_error(error: &anyhow::Error, format: OutputFormat) -> ExitCode {
    let core = error.downcast_ref::<Error>();
    let conflict = core.is_some_and(Error::is_conflict);

    if format == OutputFormat::Json {
        let mut body = json!({
            "error": error.to_string(),
            "code": core.map(Error::code).unwrap_or("E9999"),
        });
        match core {
            Some(Error::ScheduleLockConflict { conflicts, .. }) => {
                body["conflicts"] = json!(conflicts);
            }
            Some(Error::ProtectionLockConflict(holder)) => {
                body["conflicts"] = json!([holder]);
            }
            _ => {}
        }
        println!("{}", body);
    } else {
        match core {
            Some(Error::ScheduleLockConflict { slot, conflicts }) => {
                eprintln!("Error: schedule slot {} is locked", slot);
                for lock in conflicts {
                    eprintln!("  {}", schedule_holder_line(lock));
                }
            }
            Some(Error::ProtectionLockConflict(holder)) => {
                eprintln!("Error: {} is protected", holder.entity);
                eprintln!("  {}", protection_holder_line(holder));
            }
            _ => eprintln!("Error: {:#}", error),
        }
        if let Some(suggestion) = core.and_then(Error::suggestion) {
            eprintln!("Hint: {}", suggestion);
        }
    }

    if conflict {
        ExitCode::from(EXIT_CONFLICT)
    } else {
        ExitCode::FAILURE
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_acquire(
    coordinator: &LockCoordinator,
    slot: &ScheduleSlot,
    client: &str,
    out: Output,
) -> anyhow::Result<()> {
    let lease = coordinator.create_schedule_lock_if_needed(slot, client).await?;

    if out.is_json() {
        out.json(lease_json(&lease));
    } else if out.quiet {
        println!("{}", lease.lock_id);
    } else if lease.created {
        println!("Acquired schedule lock {} on {}", lease.lock_id, slot);
    } else {
        println!("Already covered by schedule lock {}", lease.lock_id);
    }
    Ok(())
}

async fn cmd_release(
    coordinator: &LockCoordinator,
    lock_id: Uuid,
    client: &str,
    out: Output,
) -> anyhow::Result<()> {
    let outcome = coordinator.release_schedule_lock(lock_id, client).await?;
    print_release(lock_id.to_string(), outcome, out);
    Ok(())
}

fn print_release(target: String, outcome: ReleaseOutcome, out: Output) {
    if out.is_json() {
        out.json(json!({ "target": target, "outcome": outcome }));
        return;
    }
    if out.quiet {
        return;
    }
    match outcome {
        ReleaseOutcome::Released => println!("Released {}", target),
        ReleaseOutcome::NotHeld => println!("{} is not held; nothing to release", target),
        ReleaseOutcome::NotOwner => println!("{} is held by another client; left alone", target),
        ReleaseOutcome::Retained => println!("{} retained", target),
    }
}

async fn cmd_protect(
    coordinator: &LockCoordinator,
    appointment: i64,
    client: &str,
    duration: Option<Duration>,
    out: Output,
) -> anyhow::Result<()> {
    let entity = ProtectedEntity::appointment(appointment);
    let lease = coordinator
        .create_protection_lock_if_needed(entity, client, duration)
        .await?;

    if out.is_json() {
        out.json(lease_json(&lease));
    } else if out.quiet {
        println!("{}", lease.lock_id);
    } else if lease.created {
        println!("Protected {} with lock {}", entity, lease.lock_id);
    } else {
        println!("{} already protected by your lock {}", entity, lease.lock_id);
    }
    Ok(())
}

async fn cmd_unprotect(
    coordinator: &LockCoordinator,
    appointment: i64,
    client: &str,
    out: Output,
) -> anyhow::Result<()> {
    let entity = ProtectedEntity::appointment(appointment);
    let outcome = coordinator.release_protection_lock(entity, client).await?;
    print_release(entity.to_string(), outcome, out);
    Ok(())
}

async fn cmd_refresh(
    coordinator: &LockCoordinator,
    appointment: i64,
    client: &str,
    duration: Option<Duration>,
    out: Output,
) -> anyhow::Result<()> {
    let entity = ProtectedEntity::appointment(appointment);
    let lock_id = coordinator
        .refresh_protection_lock(entity, client, duration)
        .await?;

    if out.is_json() {
        out.json(json!({ "lock_id": lock_id, "client_id": client }));
    } else if out.quiet {
        println!("{}", lock_id);
    } else {
        println!("Refreshed protection on {} (lock {})", entity, lock_id);
    }
    Ok(())
}

async fn cmd_conflicts(
    coordinator: &LockCoordinator,
    slot: &ScheduleSlot,
    out: Output,
) -> anyhow::Result<()> {
    let conflicts = coordinator.find_conflicts(slot).await?;

    if out.is_json() {
        out.json(json!(conflicts));
    } else if conflicts.is_empty() {
        if !out.quiet {
            println!("{} is free", slot);
        }
    } else {
        for lock in &conflicts {
            println!("{}", schedule_holder_line(lock));
        }
    }
    Ok(())
}

async fn cmd_protection_conflict(
    coordinator: &LockCoordinator,
    appointment: i64,
    out: Output,
) -> anyhow::Result<()> {
    let entity = ProtectedEntity::appointment(appointment);
    let holder = coordinator.find_protection_conflict(entity).await?;

    if out.is_json() {
        out.json(json!(holder));
    } else {
        match holder {
            Some(lock) => println!("{}", protection_holder_line(&lock)),
            None if !out.quiet => println!("{} is not protected", entity),
            None => {}
        }
    }
    Ok(())
}

async fn cmd_locks(coordinator: &LockCoordinator, out: Output) -> anyhow::Result<()> {
    let active = coordinator.list_active_locks().await?;

    if out.is_json() {
        out.json(json!(active));
        return Ok(());
    }

    if active.is_empty() {
        if !out.quiet {
            println!("No active locks.");
        }
        return Ok(());
    }

    if !active.schedule.is_empty() {
        if !out.quiet {
            println!("Schedule locks:");
        }
        for lock in &active.schedule {
            println!(
                "  {} - {} held by {} until {}",
                lock.id,
                lock.slot,
                lock.client_id,
                format_time(lock.expires_at)
            );
        }
    }
    if !active.protection.is_empty() {
        if !out.quiet {
            println!("Protection locks:");
        }
        for lock in &active.protection {
            println!(
                "  {} - {} held by {} until {}",
                lock.id,
                lock.entity,
                lock.client_id,
                format_time(lock.expires_at)
            );
        }
    }
    Ok(())
}

async fn cmd_purge(coordinator: &LockCoordinator, out: Output) -> anyhow::Result<()> {
    let removed = coordinator.purge_expired().await?;

    if out.is_json() {
        out.json(json!({ "removed": removed }));
    } else if !out.quiet {
        println!("Removed {} expired lock(s).", removed);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            if out.is_json() {
                let mut map = serde_json::Map::new();
                map.insert(key, serde_json::Value::String(value));
                out.json(serde_json::Value::Object(map));
            } else {
                println!("{}", value);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.is_json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                out.json(serde_json::Value::Object(map));
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
