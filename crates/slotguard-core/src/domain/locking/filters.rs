//! Ordered predicate chains for conflict and usable-lock matching
//!
//! Each chain is a fixed list evaluated left to right with short-circuit,
//! so the cheap checks (expiry, ownership) run before interval arithmetic and
//! each step can be tested on its own.

use chrono::{DateTime, Utc};

use super::types::{ProtectedEntity, ProtectionLock, ScheduleLock, ScheduleSlot};

/// The request a schedule lock is matched against
#[derive(Debug, Clone, Copy)]
pub struct SlotQuery<'a> {
    pub slot: &'a ScheduleSlot,
    /// Requesting client; `None` for ownership-agnostic queries
    pub client_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// A named predicate over a schedule lock
#[derive(Clone, Copy)]
pub struct SlotFilter {
    pub name: &'static str,
    pub test: fn(&ScheduleLock, &SlotQuery<'_>) -> bool,
}

impl std::fmt::Debug for SlotFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn not_expired(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    !lock.is_expired_at(query.now)
}

fn same_day(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    lock.slot.date == query.slot.date
}

fn same_sub_column(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    lock.slot.sub_column == query.slot.sub_column
}

fn shares_axis(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    lock.slot.shares_axis_with(query.slot)
}

fn intervals_overlap(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    lock.slot.intersects(query.slot)
}

fn owned_by_requester(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    query.client_id.is_some_and(|client| lock.is_owned_by(client))
}

fn held_by_other_client(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    query.client_id.is_none_or(|client| !lock.is_owned_by(client))
}

/// Every axis the request names must be held by the lock
fn matches_requested_axes(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    let requested = query.slot;
    if requested.provider_id.is_none() && requested.resource_id.is_none() {
        return false;
    }
    let provider_held = requested
        .provider_id
        .is_none_or(|id| lock.slot.provider_id == Some(id));
    let resource_held = requested
        .resource_id
        .is_none_or(|id| lock.slot.resource_id == Some(id));
    provider_held && resource_held
}

fn covers_interval(lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    lock.slot.contains_interval(query.slot)
}

/// Active locks overlapping the queried slot, regardless of owner
pub const OVERLAP_CHAIN: &[SlotFilter] = &[
    SlotFilter { name: "not_expired", test: not_expired },
    SlotFilter { name: "same_day", test: same_day },
    SlotFilter { name: "same_sub_column", test: same_sub_column },
    SlotFilter { name: "shares_axis", test: shares_axis },
    SlotFilter { name: "intervals_overlap", test: intervals_overlap },
];

/// Overlapping locks that block the requester
pub const CONFLICT_CHAIN: &[SlotFilter] = &[
    SlotFilter { name: "not_expired", test: not_expired },
    SlotFilter { name: "held_by_other_client", test: held_by_other_client },
    SlotFilter { name: "same_day", test: same_day },
    SlotFilter { name: "same_sub_column", test: same_sub_column },
    SlotFilter { name: "shares_axis", test: shares_axis },
    SlotFilter { name: "intervals_overlap", test: intervals_overlap },
];

/// Locks the requester already holds that fully cover the request
pub const USABLE_CHAIN: &[SlotFilter] = &[
    SlotFilter { name: "not_expired", test: not_expired },
    SlotFilter { name: "owned_by_requester", test: owned_by_requester },
    SlotFilter { name: "same_sub_column", test: same_sub_column },
    SlotFilter { name: "matches_requested_axes", test: matches_requested_axes },
    SlotFilter { name: "same_day", test: same_day },
    SlotFilter { name: "covers_interval", test: covers_interval },
];

/// Evaluate a chain with short-circuit
pub fn passes(chain: &[SlotFilter], lock: &ScheduleLock, query: &SlotQuery<'_>) -> bool {
    chain.iter().all(|filter| (filter.test)(lock, query))
}

/// Name of the first filter that rejects the lock, if any
pub fn first_rejection(
    chain: &[SlotFilter],
    lock: &ScheduleLock,
    query: &SlotQuery<'_>,
) -> Option<&'static str> {
    chain
        .iter()
        .find(|filter| !(filter.test)(lock, query))
        .map(|filter| filter.name)
}

/// The request a protection lock is matched against
#[derive(Debug, Clone, Copy)]
pub struct EntityQuery<'a> {
    pub entity: ProtectedEntity,
    pub client_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// A named predicate over a protection lock
#[derive(Clone, Copy)]
pub struct EntityFilter {
    pub name: &'static str,
    pub test: fn(&ProtectionLock, &EntityQuery<'_>) -> bool,
}

impl std::fmt::Debug for EntityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn entity_not_expired(lock: &ProtectionLock, query: &EntityQuery<'_>) -> bool {
    !lock.is_expired_at(query.now)
}

fn same_entity(lock: &ProtectionLock, query: &EntityQuery<'_>) -> bool {
    lock.entity == query.entity
}

fn entity_owned_by_requester(lock: &ProtectionLock, query: &EntityQuery<'_>) -> bool {
    query.client_id.is_some_and(|client| lock.is_owned_by(client))
}

fn entity_held_by_other_client(lock: &ProtectionLock, query: &EntityQuery<'_>) -> bool {
    query.client_id.is_none_or(|client| !lock.is_owned_by(client))
}

/// Active protection on the same `(type, lockId)` held by someone else
pub const ENTITY_CONFLICT_CHAIN: &[EntityFilter] = &[
    EntityFilter { name: "not_expired", test: entity_not_expired },
    EntityFilter { name: "same_entity", test: same_entity },
    EntityFilter { name: "held_by_other_client", test: entity_held_by_other_client },
];

/// Active protection on the same entity the requester already holds
pub const ENTITY_USABLE_CHAIN: &[EntityFilter] = &[
    EntityFilter { name: "not_expired", test: entity_not_expired },
    EntityFilter { name: "owned_by_requester", test: entity_owned_by_requester },
    EntityFilter { name: "same_entity", test: same_entity },
];

/// Evaluate an entity chain with short-circuit
pub fn entity_passes(
    chain: &[EntityFilter],
    lock: &ProtectionLock,
    query: &EntityQuery<'_>,
) -> bool {
    chain.iter().all(|filter| (filter.test)(lock, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn slot(start: i32, end: i32) -> ScheduleSlot {
        ScheduleSlot::for_provider(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 1, start, end, 7)
    }

    fn lock(client: &str, slot: ScheduleSlot, now: DateTime<Utc>) -> ScheduleLock {
        ScheduleLock {
            id: Uuid::new_v4(),
            client_id: client.to_string(),
            slot,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        }
    }

    #[test]
    fn test_conflict_chain_matches_overlap_from_other_client() {
        let now = Utc::now();
        let held = lock("a", slot(900, 930), now);
        let requested = slot(915, 945);
        let query = SlotQuery { slot: &requested, client_id: Some("b"), now };

        assert!(passes(CONFLICT_CHAIN, &held, &query));
    }

    #[test]
    fn test_conflict_chain_ignores_own_lock() {
        let now = Utc::now();
        let held = lock("a", slot(900, 930), now);
        let requested = slot(915, 945);
        let query = SlotQuery { slot: &requested, client_id: Some("a"), now };

        assert_eq!(
            first_rejection(CONFLICT_CHAIN, &held, &query),
            Some("held_by_other_client")
        );
        assert!(passes(OVERLAP_CHAIN, &held, &query));
    }

    #[test]
    fn test_adjacent_slots_do_not_overlap() {
        let now = Utc::now();
        let held = lock("a", slot(900, 930), now);
        let requested = slot(930, 1000);
        let query = SlotQuery { slot: &requested, client_id: Some("b"), now };

        assert_eq!(
            first_rejection(CONFLICT_CHAIN, &held, &query),
            Some("intervals_overlap")
        );
    }

    #[test]
    fn test_expired_lock_rejected_first() {
        let now = Utc::now();
        let mut held = lock("a", slot(900, 930), now);
        held.expires_at = now;
        let requested = slot(900, 930);
        let query = SlotQuery { slot: &requested, client_id: Some("a"), now };

        assert_eq!(first_rejection(CONFLICT_CHAIN, &held, &query), Some("not_expired"));
        assert_eq!(first_rejection(USABLE_CHAIN, &held, &query), Some("not_expired"));
    }

    #[test]
    fn test_usable_requires_containment() {
        let now = Utc::now();
        let held = lock("a", slot(900, 930), now);

        let narrower = slot(900, 915);
        let query = SlotQuery { slot: &narrower, client_id: Some("a"), now };
        assert!(passes(USABLE_CHAIN, &held, &query));

        let wider = slot(845, 930);
        let query = SlotQuery { slot: &wider, client_id: Some("a"), now };
        assert_eq!(first_rejection(USABLE_CHAIN, &held, &query), Some("covers_interval"));
    }

    #[test]
    fn test_usable_rejects_other_client_and_column() {
        let now = Utc::now();
        let held = lock("a", slot(900, 930), now);

        let requested = slot(900, 930);
        let query = SlotQuery { slot: &requested, client_id: Some("b"), now };
        assert_eq!(first_rejection(USABLE_CHAIN, &held, &query), Some("owned_by_requester"));

        let mut other_column = slot(900, 930);
        other_column.sub_column = 2;
        let query = SlotQuery { slot: &other_column, client_id: Some("a"), now };
        assert_eq!(first_rejection(USABLE_CHAIN, &held, &query), Some("same_sub_column"));
    }

    #[test]
    fn test_usable_requires_every_requested_axis() {
        let now = Utc::now();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let held = lock("a", ScheduleSlot::for_resource(day, 1, 900, 930, 3), now);

        // Resource 3 is held but provider 7 is not
        let requested = ScheduleSlot::for_provider(day, 1, 900, 930, 7).with_resource(3);
        let query = SlotQuery { slot: &requested, client_id: Some("a"), now };
        assert_eq!(
            first_rejection(USABLE_CHAIN, &held, &query),
            Some("matches_requested_axes")
        );

        // The same pair still conflicts for another client through the resource
        let query = SlotQuery { slot: &requested, client_id: Some("b"), now };
        assert!(passes(CONFLICT_CHAIN, &held, &query));
    }

    #[test]
    fn test_provider_lock_does_not_cover_added_resource() {
        let now = Utc::now();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let held = lock("a", ScheduleSlot::for_provider(day, 1, 900, 930, 7), now);

        let requested = ScheduleSlot::for_provider(day, 1, 900, 915, 7).with_resource(3);
        let query = SlotQuery { slot: &requested, client_id: Some("a"), now };
        assert_eq!(
            first_rejection(USABLE_CHAIN, &held, &query),
            Some("matches_requested_axes")
        );

        // A lock on both axes covers a request naming either or both
        let both = lock("a", ScheduleSlot::for_provider(day, 1, 900, 930, 7).with_resource(3), now);
        assert!(passes(USABLE_CHAIN, &both, &query));
        let provider_only = ScheduleSlot::for_provider(day, 1, 900, 915, 7);
        let query = SlotQuery { slot: &provider_only, client_id: Some("a"), now };
        assert!(passes(USABLE_CHAIN, &both, &query));
    }

    #[test]
    fn test_entity_chains() {
        let now = Utc::now();
        let held = ProtectionLock {
            id: Uuid::new_v4(),
            client_id: "a".to_string(),
            entity: ProtectedEntity::appointment(42),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        };

        let by_b = EntityQuery { entity: ProtectedEntity::appointment(42), client_id: Some("b"), now };
        assert!(entity_passes(ENTITY_CONFLICT_CHAIN, &held, &by_b));
        assert!(!entity_passes(ENTITY_USABLE_CHAIN, &held, &by_b));

        let by_a = EntityQuery { entity: ProtectedEntity::appointment(42), client_id: Some("a"), now };
        assert!(!entity_passes(ENTITY_CONFLICT_CHAIN, &held, &by_a));
        assert!(entity_passes(ENTITY_USABLE_CHAIN, &held, &by_a));

        let other = EntityQuery { entity: ProtectedEntity::appointment(43), client_id: Some("b"), now };
        assert!(!entity_passes(ENTITY_CONFLICT_CHAIN, &held, &other));
    }
}
