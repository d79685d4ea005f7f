//! Lock records, schedule slots, and locking configuration

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Latest valid end time; appointments never cross midnight
pub const END_OF_DAY: i32 = 2400;

/// Check an HHMM-encoded time of day
///
/// `2400` is only accepted when `allow_end_of_day` is set, so a slot can end
/// exactly at midnight but never start there.
pub fn is_valid_hhmm(value: i32, allow_end_of_day: bool) -> bool {
    if allow_end_of_day && value == END_OF_DAY {
        return true;
    }
    let (hours, minutes) = (value / 100, value % 100);
    (0..=23).contains(&hours) && (0..=59).contains(&minutes) && value >= 0
}

/// Half-open `[start, end)` interval intersection
pub fn intervals_intersect(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && b_start < a_end
}

fn format_hhmm(value: i32) -> String {
    format!("{:02}:{:02}", value / 100, value % 100)
}

/// The column family a slot is compared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum SlotAxis {
    /// A provider's calendar column
    Provider(i64),
    /// A resource's (room, device) calendar column
    Resource(i64),
}

impl fmt::Display for SlotAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(id) => write!(f, "provider {}", id),
            Self::Resource(id) => write!(f, "resource {}", id),
        }
    }
}

/// A rectangular region of one calendar day's column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    /// Calendar day the slot lives on
    pub date: NaiveDate,

    /// Sub-column within the provider/resource column
    pub sub_column: i32,

    /// Start time, HHMM encoded
    pub start_time: i32,

    /// End time, HHMM encoded (exclusive)
    pub end_time: i32,

    /// Provider the slot is booked against
    pub provider_id: Option<i64>,

    /// Resource the slot is booked against
    pub resource_id: Option<i64>,
}

impl ScheduleSlot {
    /// Create a slot on a provider's column
    pub fn for_provider(
        date: NaiveDate,
        sub_column: i32,
        start_time: i32,
        end_time: i32,
        provider_id: i64,
    ) -> Self {
        Self {
            date,
            sub_column,
            start_time,
            end_time,
            provider_id: Some(provider_id),
            resource_id: None,
        }
    }

    /// Create a slot on a resource's column
    pub fn for_resource(
        date: NaiveDate,
        sub_column: i32,
        start_time: i32,
        end_time: i32,
        resource_id: i64,
    ) -> Self {
        Self {
            date,
            sub_column,
            start_time,
            end_time,
            provider_id: None,
            resource_id: Some(resource_id),
        }
    }

    /// Attach a resource to a provider slot (both axes populated)
    pub fn with_resource(mut self, resource_id: i64) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// Same column and day, different interval
    pub fn with_times(&self, start_time: i32, end_time: i32) -> Self {
        Self {
            start_time,
            end_time,
            ..self.clone()
        }
    }

    /// The axis used when matching a request against existing locks
    ///
    /// The provider wins when both axes are populated.
    pub fn owning_axis(&self) -> Option<SlotAxis> {
        self.provider_id
            .map(SlotAxis::Provider)
            .or(self.resource_id.map(SlotAxis::Resource))
    }

    /// Validate time bounds and axis before any lock table access
    pub fn validate(&self) -> Result<()> {
        if !is_valid_hhmm(self.start_time, false) {
            return Err(Error::InvalidSlot(format!(
                "start time {:04} is not a valid HHMM time",
                self.start_time
            )));
        }
        if !is_valid_hhmm(self.end_time, true) {
            return Err(Error::InvalidSlot(format!(
                "end time {:04} is not a valid HHMM time",
                self.end_time
            )));
        }
        if self.start_time >= self.end_time {
            return Err(Error::InvalidSlot(format!(
                "start time {:04} must be before end time {:04}",
                self.start_time, self.end_time
            )));
        }
        if self.sub_column < 0 {
            return Err(Error::InvalidSlot(format!(
                "sub-column {} must not be negative",
                self.sub_column
            )));
        }
        if self.owning_axis().is_none() {
            return Err(Error::InvalidSlot(
                "a slot needs a provider or a resource".to_string(),
            ));
        }
        Ok(())
    }

    /// Same provider, or same resource, on whichever axis is populated
    pub fn shares_axis_with(&self, other: &ScheduleSlot) -> bool {
        let same_provider = self.provider_id.is_some() && self.provider_id == other.provider_id;
        let same_resource = self.resource_id.is_some() && self.resource_id == other.resource_id;
        same_provider || same_resource
    }

    /// Whether this slot's interval intersects the other's
    pub fn intersects(&self, other: &ScheduleSlot) -> bool {
        intervals_intersect(
            self.start_time,
            self.end_time,
            other.start_time,
            other.end_time,
        )
    }

    /// Whether this slot's interval contains the other's
    pub fn contains_interval(&self, other: &ScheduleSlot) -> bool {
        self.start_time <= other.start_time && self.end_time >= other.end_time
    }
}

impl fmt::Display for ScheduleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} col {} {}-{}",
            self.date,
            self.sub_column,
            format_hhmm(self.start_time),
            format_hhmm(self.end_time)
        )?;
        match self.owning_axis() {
            Some(axis) => write!(f, " {}", axis),
            None => Ok(()),
        }
    }
}

/// Advisory claim over a schedule slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLock {
    /// Lock ID
    pub id: Uuid,

    /// Client that created the lock
    pub client_id: String,

    /// Region of the calendar covered
    pub slot: ScheduleSlot,

    /// When the lock was created
    pub created_at: DateTime<Utc>,

    /// When the lock stops counting
    pub expires_at: DateTime<Utc>,
}

impl ScheduleLock {
    /// Check expiry against a given instant; a lock expiring exactly now is gone
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if the lock belongs to the given client
    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

/// Kind of entity a protection lock guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionType {
    /// A single appointment record
    Appointment,
    /// A patient's demographic record
    Patient,
}

impl ProtectionType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Patient => "patient",
        }
    }

    /// Parse the stored representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "appointment" => Some(Self::Appointment),
            "patient" => Some(Self::Patient),
            _ => None,
        }
    }
}

impl fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a protected entity: `(type, lockId)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtectedEntity {
    pub lock_type: ProtectionType,
    pub lock_id: i64,
}

impl ProtectedEntity {
    pub fn new(lock_type: ProtectionType, lock_id: i64) -> Self {
        Self { lock_type, lock_id }
    }

    pub fn appointment(appointment_id: i64) -> Self {
        Self::new(ProtectionType::Appointment, appointment_id)
    }
}

impl fmt::Display for ProtectedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.lock_type, self.lock_id)
    }
}

/// Advisory claim over one specific entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionLock {
    /// Lock ID
    pub id: Uuid,

    /// Client that created the lock
    pub client_id: String,

    /// The protected entity
    pub entity: ProtectedEntity,

    /// When the lock was created
    pub created_at: DateTime<Utc>,

    /// When the lock stops counting
    pub expires_at: DateTime<Utc>,
}

impl ProtectionLock {
    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if the lock belongs to the given client
    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

/// What a lock request claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    Slot(ScheduleSlot),
    Entity(ProtectedEntity),
}

/// Input to lock creation; never persisted
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub client_id: String,
    pub target: LockTarget,
    pub duration: Duration,
}

impl LockRequest {
    /// Schedule requests always use the configured fixed duration
    pub fn schedule(slot: ScheduleSlot, client_id: &str, config: &LockConfig) -> Self {
        Self {
            client_id: client_id.to_string(),
            target: LockTarget::Slot(slot),
            duration: config.schedule_lock_ttl,
        }
    }

    /// Protection requests use the caller's duration, clamped by config
    pub fn protection(
        entity: ProtectedEntity,
        client_id: &str,
        requested: Option<Duration>,
        config: &LockConfig,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            target: LockTarget::Entity(entity),
            duration: config.clamp_protection_ttl(requested),
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "lock duration of {}s is too long",
                    self.duration.as_secs()
                ))
            })
    }

    /// Materialize a schedule lock record created at `now`
    pub fn into_schedule_lock(self, now: DateTime<Utc>) -> Result<ScheduleLock> {
        let expires_at = self.expiry_from(now)?;
        match self.target {
            LockTarget::Slot(slot) => Ok(ScheduleLock {
                id: Uuid::new_v4(),
                client_id: self.client_id,
                slot,
                created_at: now,
                expires_at,
            }),
            LockTarget::Entity(entity) => Err(Error::Other(format!(
                "protection request for {entity} cannot create a schedule lock"
            ))),
        }
    }

    /// Materialize a protection lock record created at `now`
    pub fn into_protection_lock(self, now: DateTime<Utc>) -> Result<ProtectionLock> {
        let expires_at = self.expiry_from(now)?;
        match self.target {
            LockTarget::Entity(entity) => Ok(ProtectionLock {
                id: Uuid::new_v4(),
                client_id: self.client_id,
                entity,
                created_at: now,
                expires_at,
            }),
            LockTarget::Slot(slot) => Err(Error::Other(format!(
                "schedule request for {slot} cannot create a protection lock"
            ))),
        }
    }
}

/// What a lease refers to, so it can be released later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Schedule,
    Protection(ProtectedEntity),
}

/// Result of `create_*_if_needed`: the lock to work under, and whether this
/// operation created it (and therefore must release it)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub lock_id: Uuid,
    pub client_id: String,
    pub kind: LeaseKind,
    pub created: bool,
}

impl LockLease {
    /// Only leases that created their lock release it
    pub fn owns_release(&self) -> bool {
        self.created
    }
}

/// Outcome of a release call
///
/// None of these is an error; the distinction is kept for logging and for
/// callers that want to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// The caller's lock was deleted
    Released,
    /// No such lock (already released, or never existed)
    NotHeld,
    /// The lock belongs to another client and was left alone
    NotOwner,
    /// The lease reused a lock it did not create; the lock stays
    Retained,
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => write!(f, "released"),
            Self::NotHeld => write!(f, "not_held"),
            Self::NotOwner => write!(f, "not_owner"),
            Self::Retained => write!(f, "retained"),
        }
    }
}

/// Result of inserting a lock row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The store's own constraint rejected the row
    Conflicted,
}

/// Longest lifetime a configured lock TTL may have (one week)
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for the lock coordinator
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lifetime of every schedule lock
    pub schedule_lock_ttl: Duration,

    /// Protection lifetime when the caller passes none
    pub protection_lock_ttl: Duration,

    /// Upper bound on caller-chosen protection lifetimes
    pub max_protection_lock_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            schedule_lock_ttl: Duration::from_secs(300), // 5 minutes
            protection_lock_ttl: Duration::from_secs(300),
            max_protection_lock_ttl: Duration::from_secs(3600),
        }
    }
}

impl LockConfig {
    /// Set the schedule lock TTL
    pub fn with_schedule_ttl(mut self, ttl: Duration) -> Self {
        self.schedule_lock_ttl = ttl;
        self
    }

    /// Set the default protection lock TTL
    pub fn with_protection_ttl(mut self, ttl: Duration) -> Self {
        self.protection_lock_ttl = ttl;
        self
    }

    /// Set the maximum protection lock TTL
    pub fn with_max_protection_ttl(mut self, ttl: Duration) -> Self {
        self.max_protection_lock_ttl = ttl;
        self
    }

    /// Clamp a caller-supplied protection duration to `[1s, max]`
    pub fn clamp_protection_ttl(&self, requested: Option<Duration>) -> Duration {
        let ttl = requested.unwrap_or(self.protection_lock_ttl);
        ttl.clamp(Duration::from_secs(1), self.max_protection_lock_ttl.max(Duration::from_secs(1)))
    }
}
