//! Slotguard Core Integration Tests
//!
//! Exercises the coordinator through the public API against a real SQLite
//! lock table.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::join_all;
use slotguard_core::domain::events::InMemoryEventStore;
use slotguard_core::domain::locking::{
    LockConfig, LockCoordinator, ProtectedEntity, ReleaseOutcome, ScheduleSlot,
};
use slotguard_core::domain::scheduling::{
    AppointmentScheduler, AppointmentStore, InMemoryAppointmentStore,
};
use slotguard_core::storage::Database;
use slotguard_core::{Error, Result};
use tempfile::TempDir;

async fn coordinator_with(config: LockConfig) -> Arc<LockCoordinator> {
    let db = Database::in_memory()
        .await
        .expect("Failed to create test database");
    Arc::new(LockCoordinator::sqlite(db.pool().clone(), config))
}

async fn coordinator() -> Arc<LockCoordinator> {
    coordinator_with(LockConfig::default()).await
}

fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn provider_slot(start: i32, end: i32) -> ScheduleSlot {
    ScheduleSlot::for_provider(may_first(), 1, start, end, 7)
}

#[tokio::test]
async fn test_disjoint_slots_acquired_concurrently() {
    let coordinator = coordinator().await;

    let requests = [(900, 930), (930, 1000), (1000, 1030), (1100, 1200)]
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let coordinator = coordinator.clone();
            async move {
                let client = format!("client-{}", i);
                coordinator
                    .acquire_schedule_lock(&provider_slot(start, end), &client)
                    .await
            }
        });

    let results = join_all(requests).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(coordinator.list_active_locks().await.unwrap().schedule.len(), 4);
}

#[tokio::test]
async fn test_overlapping_slots_exactly_one_wins() {
    let coordinator = coordinator().await;

    let requests = (0..5).map(|i| {
        let coordinator = coordinator.clone();
        async move {
            let client = format!("client-{}", i);
            // Staggered but pairwise-overlapping intervals
            let slot = provider_slot(900 + i * 5, 1000 + i * 5);
            coordinator.acquire_schedule_lock(&slot, &client).await
        }
    });

    let results = join_all(requests).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert_eq!(err.code(), "E300");
    }
    assert_eq!(coordinator.list_active_locks().await.unwrap().schedule.len(), 1);
}

#[tokio::test]
async fn test_second_client_conflict_names_first_clients_lock() {
    let coordinator = coordinator().await;

    let held = coordinator
        .acquire_schedule_lock(&provider_slot(900, 930), "client-a")
        .await
        .unwrap();

    let err = coordinator
        .acquire_schedule_lock(&provider_slot(915, 945), "client-b")
        .await
        .unwrap_err();

    match err {
        Error::ScheduleLockConflict { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, held);
            assert_eq!(conflicts[0].client_id, "client-a");
        }
        other => panic!("expected schedule conflict, got {other:?}"),
    }

    // Contained request by the holder reuses the same lock
    let lease = coordinator
        .create_schedule_lock_if_needed(&provider_slot(900, 915), "client-a")
        .await
        .unwrap();
    assert_eq!(lease.lock_id, held);
    assert!(!lease.created);
    assert_eq!(coordinator.list_active_locks().await.unwrap().schedule.len(), 1);
}

#[tokio::test]
async fn test_adding_a_resource_to_a_held_provider_slot_locks_the_resource() {
    let coordinator = coordinator().await;
    let held = coordinator
        .acquire_schedule_lock(&provider_slot(900, 930), "client-a")
        .await
        .unwrap();

    let with_room = ScheduleSlot::for_provider(may_first(), 1, 900, 915, 7).with_resource(3);
    let lease = coordinator
        .create_schedule_lock_if_needed(&with_room, "client-a")
        .await
        .unwrap();
    assert!(lease.created);
    assert_ne!(lease.lock_id, held);

    let room = ScheduleSlot::for_resource(may_first(), 1, 900, 915, 3);
    let err = coordinator
        .acquire_schedule_lock(&room, "client-b")
        .await
        .unwrap_err();
    match err {
        Error::ScheduleLockConflict { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, lease.lock_id);
        }
        other => panic!("expected schedule conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_other_axes_and_columns_do_not_conflict() {
    let coordinator = coordinator().await;
    coordinator
        .acquire_schedule_lock(&provider_slot(900, 1000), "client-a")
        .await
        .unwrap();

    let other_column = ScheduleSlot::for_provider(may_first(), 2, 900, 1000, 7);
    let other_provider = ScheduleSlot::for_provider(may_first(), 1, 900, 1000, 8);
    let other_day = ScheduleSlot::for_provider(may_first().succ_opt().unwrap(), 1, 900, 1000, 7);
    let resource = ScheduleSlot::for_resource(may_first(), 1, 900, 1000, 7);

    for slot in [other_column, other_provider, other_day, resource] {
        coordinator
            .acquire_schedule_lock(&slot, "client-b")
            .await
            .unwrap_or_else(|e| panic!("{slot} should be free: {e}"));
    }
}

#[tokio::test]
async fn test_expired_lock_excluded_everywhere() {
    let config = LockConfig::default().with_schedule_ttl(Duration::from_millis(50));
    let coordinator = coordinator_with(config).await;

    let stale = coordinator
        .acquire_schedule_lock(&provider_slot(900, 1000), "client-a")
        .await
        .unwrap();
    assert!(
        coordinator
            .acquire_schedule_lock(&provider_slot(900, 1000), "client-b")
            .await
            .is_err()
    );

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(coordinator.find_conflicts(&provider_slot(900, 1000)).await.unwrap().is_empty());

    // The holder's own expired lock is not reused either
    let renewed = coordinator
        .create_schedule_lock_if_needed(&provider_slot(915, 930), "client-a")
        .await
        .unwrap();
    assert!(renewed.created);
    assert_ne!(renewed.lock_id, stale);

    coordinator
        .acquire_schedule_lock(&provider_slot(930, 1000), "client-b")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_release_twice_and_after_expiry_never_errors() {
    let config = LockConfig::default().with_schedule_ttl(Duration::from_millis(50));
    let coordinator = coordinator_with(config).await;

    let first = coordinator
        .acquire_schedule_lock(&provider_slot(900, 930), "client-a")
        .await
        .unwrap();
    assert_eq!(
        coordinator.release_schedule_lock(first, "client-a").await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(
        coordinator.release_schedule_lock(first, "client-a").await.unwrap(),
        ReleaseOutcome::NotHeld
    );

    let second = coordinator
        .acquire_schedule_lock(&provider_slot(1000, 1030), "client-a")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(coordinator.release_schedule_lock(second, "client-a").await.is_ok());
    assert!(coordinator.release_schedule_lock(second, "client-b").await.is_ok());
}

#[tokio::test]
async fn test_foreign_release_leaves_lock_valid() {
    let coordinator = coordinator().await;

    let held = coordinator
        .acquire_schedule_lock(&provider_slot(900, 930), "client-a")
        .await
        .unwrap();

    let outcome = coordinator.release_schedule_lock(held, "client-b").await.unwrap();
    assert_eq!(outcome, ReleaseOutcome::NotOwner);

    let conflicts = coordinator.find_conflicts(&provider_slot(900, 930)).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, held);
    assert!(
        coordinator
            .acquire_schedule_lock(&provider_slot(900, 930), "client-b")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_protection_handoff_between_clients() {
    let coordinator = coordinator().await;
    let entity = ProtectedEntity::appointment(42);

    let held = coordinator
        .acquire_protection_lock(entity, "client-a", None)
        .await
        .unwrap();

    let err = coordinator
        .acquire_protection_lock(entity, "client-b", None)
        .await
        .unwrap_err();
    match err {
        Error::ProtectionLockConflict(holder) => {
            assert_eq!(holder.id, held);
            assert_eq!(holder.client_id, "client-a");
        }
        other => panic!("expected protection conflict, got {other:?}"),
    }

    assert_eq!(
        coordinator.release_protection_lock(entity, "client-a").await.unwrap(),
        ReleaseOutcome::Released
    );

    let taken = coordinator
        .acquire_protection_lock(entity, "client-b", None)
        .await
        .unwrap();
    assert_ne!(taken, held);
}

#[tokio::test]
async fn test_concurrent_protection_exactly_one_wins() {
    let coordinator = coordinator().await;
    let entity = ProtectedEntity::appointment(7);

    let requests = (0..4).map(|i| {
        let coordinator = coordinator.clone();
        async move {
            let client = format!("client-{}", i);
            coordinator.acquire_protection_lock(entity, &client, None).await
        }
    });

    let results = join_all(requests).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(Error::is_conflict));
}

#[tokio::test]
async fn test_scoped_lock_released_on_every_exit() {
    let coordinator = coordinator().await;
    let slot = provider_slot(900, 930);

    let value = coordinator
        .with_schedule_lock(&slot, "client-a", |_| async { Ok::<_, Error>(5) })
        .await
        .unwrap();
    assert_eq!(value, 5);

    let failed: Result<()> = coordinator
        .with_schedule_lock(&slot, "client-a", |_| async {
            Err(Error::Other("booking failed".to_string()))
        })
        .await;
    assert!(failed.is_err());

    assert!(coordinator.list_active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_backed_table_shared_between_coordinators() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("locks.db");

    let first = Database::open(&path).await.unwrap();
    let second = Database::open(&path).await.unwrap();
    let desk_a = LockCoordinator::sqlite(first.pool().clone(), LockConfig::default());
    let desk_b = LockCoordinator::sqlite(second.pool().clone(), LockConfig::default());

    let held = desk_a
        .acquire_schedule_lock(&provider_slot(900, 930), "client-a")
        .await
        .unwrap();

    let err = desk_b
        .acquire_schedule_lock(&provider_slot(915, 945), "client-b")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    desk_a.release_schedule_lock(held, "client-a").await.unwrap();
    desk_b
        .acquire_schedule_lock(&provider_slot(915, 945), "client-b")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_scheduler_records_lock_events() {
    let db = Database::in_memory()
        .await
        .expect("Failed to create test database");
    let events = Arc::new(InMemoryEventStore::new());
    let coordinator = Arc::new(
        LockCoordinator::sqlite(db.pool().clone(), LockConfig::default())
            .with_publisher(events.clone()),
    );
    let store = Arc::new(InMemoryAppointmentStore::new());
    let scheduler = AppointmentScheduler::new(coordinator, store.clone());

    let appointment = scheduler
        .create_appointment("client-a", &provider_slot(900, 930), "checkup")
        .await
        .unwrap();
    scheduler
        .move_appointment("client-a", appointment.id, &provider_slot(1000, 1030))
        .await
        .unwrap();

    assert_eq!(events.events_by_type("schedule_lock_acquired").len(), 2);
    assert_eq!(events.events_by_type("schedule_lock_released").len(), 2);
    assert_eq!(events.events_by_type("protection_lock_acquired").len(), 1);
    assert_eq!(events.events_by_type("protection_lock_released").len(), 1);
    assert_eq!(
        store.get(appointment.id).await.unwrap().unwrap().slot,
        provider_slot(1000, 1030)
    );
}
