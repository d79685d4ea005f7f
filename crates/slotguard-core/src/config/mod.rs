//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::locking::{LockConfig, MAX_LOCK_TTL};
use crate::error::{Error, Result};
use crate::storage::{DatabaseConfig, default_database_path};

/// Slotguard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub locking: LockingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Lifetime of every schedule lock; never chosen by clients
    pub schedule_lock_ttl_secs: u64,
    /// Protection lifetime when the caller passes none
    pub protection_lock_ttl_secs: u64,
    /// Upper bound on caller-chosen protection lifetimes
    pub max_protection_lock_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Lock table location; the platform data directory when unset
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for LockingConfig {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            schedule_lock_ttl_secs: defaults.schedule_lock_ttl.as_secs(),
            protection_lock_ttl_secs: defaults.protection_lock_ttl.as_secs(),
            max_protection_lock_ttl_secs: defaults.max_protection_lock_ttl.as_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SLOTGUARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("slotguard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            // Return default config without creating file
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.lock_config()?;
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be at least 1"));
        }
        Ok(())
    }

    /// The locking section as the coordinator's configuration
    pub fn lock_config(&self) -> Result<LockConfig> {
        let locking = &self.locking;
        if locking.schedule_lock_ttl_secs == 0 {
            return Err(Error::ConfigError(
                "locking.schedule_lock_ttl_secs must be at least 1".to_string(),
            ));
        }
        if locking.max_protection_lock_ttl_secs == 0 {
            return Err(Error::ConfigError(
                "locking.max_protection_lock_ttl_secs must be at least 1".to_string(),
            ));
        }
        for (key, secs) in [
            ("locking.schedule_lock_ttl_secs", locking.schedule_lock_ttl_secs),
            ("locking.protection_lock_ttl_secs", locking.protection_lock_ttl_secs),
            ("locking.max_protection_lock_ttl_secs", locking.max_protection_lock_ttl_secs),
        ] {
            if secs > MAX_LOCK_TTL.as_secs() {
                return Err(Error::ConfigError(format!(
                    "{} ({}) exceeds the limit of {} seconds",
                    key,
                    secs,
                    MAX_LOCK_TTL.as_secs()
                )));
            }
        }
        if locking.protection_lock_ttl_secs > locking.max_protection_lock_ttl_secs {
            return Err(Error::ConfigError(format!(
                "locking.protection_lock_ttl_secs ({}) exceeds locking.max_protection_lock_ttl_secs ({})",
                locking.protection_lock_ttl_secs, locking.max_protection_lock_ttl_secs
            )));
        }

        Ok(LockConfig::default()
            .with_schedule_ttl(Duration::from_secs(locking.schedule_lock_ttl_secs))
            .with_protection_ttl(Duration::from_secs(locking.protection_lock_ttl_secs))
            .with_max_protection_ttl(Duration::from_secs(locking.max_protection_lock_ttl_secs)))
    }

    /// Resolved lock table path
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// The storage section as a pool configuration
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.database_path()).max_connections(self.storage.max_connections)
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Locking settings
            "locking.schedule_lock_ttl_secs" => Ok(self.locking.schedule_lock_ttl_secs.to_string()),
            "locking.protection_lock_ttl_secs" => {
                Ok(self.locking.protection_lock_ttl_secs.to_string())
            }
            "locking.max_protection_lock_ttl_secs" => {
                Ok(self.locking.max_protection_lock_ttl_secs.to_string())
            }

            // Storage settings
            "storage.database_path" => Ok(self.database_path().display().to_string()),
            "storage.max_connections" => Ok(self.storage.max_connections.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `slotguard config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let previous = self.clone();
        let parse_secs = |value: &str| -> anyhow::Result<u64> {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Invalid number of seconds: {}", value))?;
            if secs == 0 {
                return Err(anyhow!("{} must be at least 1 second", key));
            }
            if secs > MAX_LOCK_TTL.as_secs() {
                return Err(anyhow!(
                    "{} exceeds the limit of {} seconds",
                    key,
                    MAX_LOCK_TTL.as_secs()
                ));
            }
            Ok(secs)
        };

        match key {
            // Locking settings
            "locking.schedule_lock_ttl_secs" => {
                self.locking.schedule_lock_ttl_secs = parse_secs(value)?;
            }
            "locking.protection_lock_ttl_secs" => {
                self.locking.protection_lock_ttl_secs = parse_secs(value)?;
            }
            "locking.max_protection_lock_ttl_secs" => {
                self.locking.max_protection_lock_ttl_secs = parse_secs(value)?;
            }

            // Storage settings
            "storage.database_path" => {
                self.storage.database_path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "storage.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("storage.max_connections must be at least 1"));
                }
                self.storage.max_connections = max;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `slotguard config list` to see available keys.",
                    key
                ));
            }
        }

        // Leave the config untouched when the new value breaks an invariant
        if let Err(e) = self.validate() {
            *self = previous;
            return Err(e);
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "locking.schedule_lock_ttl_secs",
            "locking.protection_lock_ttl_secs",
            "locking.max_protection_lock_ttl_secs",
            "storage.database_path",
            "storage.max_connections",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
