//! Create, move, and cancel appointments under locks

use std::sync::Arc;

use tracing::info;

use super::store::{Appointment, AppointmentStore};
use crate::domain::locking::{LockCoordinator, ProtectedEntity, ScheduleSlot};
use crate::error::{Error, Result};

/// Appointment operations for one lock table and one appointment store
pub struct AppointmentScheduler {
    coordinator: Arc<LockCoordinator>,
    store: Arc<dyn AppointmentStore>,
}

impl AppointmentScheduler {
    pub fn new(coordinator: Arc<LockCoordinator>, store: Arc<dyn AppointmentStore>) -> Self {
        Self { coordinator, store }
    }

    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// Book a new appointment on `slot`
    pub async fn create_appointment(
        &self,
        client_id: &str,
        slot: &ScheduleSlot,
        note: &str,
    ) -> Result<Appointment> {
        let store = self.store.as_ref();

        let appointment = self
            .coordinator
            .with_schedule_lock(slot, client_id, |_| async move {
                store.insert(slot, note).await
            })
            .await?;

        info!(client_id, appointment_id = appointment.id, slot = %slot, "Appointment created");
        Ok(appointment)
    }

    /// Move an appointment to `target`
    ///
    /// The appointment is protected for the whole operation and the target
    /// slot is locked while the store is updated.
    pub async fn move_appointment(
        &self,
        client_id: &str,
        appointment_id: i64,
        target: &ScheduleSlot,
    ) -> Result<Appointment> {
        let store = self.store.as_ref();
        let coordinator = self.coordinator.as_ref();
        let entity = ProtectedEntity::appointment(appointment_id);

        let moved = coordinator
            .with_protection_lock(entity, client_id, None, |_| async move {
                let current = store
                    .get(appointment_id)
                    .await?
                    .ok_or(Error::AppointmentNotFound(appointment_id))?;
                if current.slot == *target {
                    return Ok(current);
                }

                coordinator
                    .with_schedule_lock(target, client_id, |_| async move {
                        store.update_slot(appointment_id, target).await
                    })
                    .await
            })
            .await?;

        info!(client_id, appointment_id, slot = %moved.slot, "Appointment moved");
        Ok(moved)
    }

    /// Cancel an appointment
    pub async fn cancel_appointment(&self, client_id: &str, appointment_id: i64) -> Result<()> {
        let store = self.store.as_ref();
        let entity = ProtectedEntity::appointment(appointment_id);

        self.coordinator
            .with_protection_lock(entity, client_id, None, |_| async move {
                if store.delete(appointment_id).await? {
                    Ok(())
                } else {
                    Err(Error::AppointmentNotFound(appointment_id))
                }
            })
            .await?;

        info!(client_id, appointment_id, "Appointment cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::LockConfig;
    use crate::domain::scheduling::InMemoryAppointmentStore;
    use crate::storage::Database;
    use chrono::NaiveDate;

    async fn create_test_scheduler() -> (AppointmentScheduler, Arc<InMemoryAppointmentStore>) {
        let db = Database::in_memory()
            .await
            .expect("Failed to create test database");
        let coordinator = Arc::new(LockCoordinator::sqlite(
            db.pool().clone(),
            LockConfig::default(),
        ));
        let store = Arc::new(InMemoryAppointmentStore::new());
        (AppointmentScheduler::new(coordinator, store.clone()), store)
    }

    fn slot(start: i32, end: i32) -> ScheduleSlot {
        ScheduleSlot::for_provider(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 1, start, end, 7)
    }

    #[tokio::test]
    async fn test_create_appointment_leaves_no_lock() {
        let (scheduler, store) = create_test_scheduler().await;

        let appointment = scheduler
            .create_appointment("client-a", &slot(900, 930), "checkup")
            .await
            .unwrap();

        assert_eq!(appointment.note, "checkup");
        assert_eq!(store.all().await.len(), 1);
        assert!(scheduler.coordinator().list_active_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_blocked_by_other_clients_lock() {
        let (scheduler, store) = create_test_scheduler().await;
        scheduler
            .coordinator()
            .acquire_schedule_lock(&slot(900, 1000), "client-a")
            .await
            .unwrap();

        let err = scheduler
            .create_appointment("client-b", &slot(930, 945), "follow-up")
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_under_own_lock_keeps_it() {
        let (scheduler, _) = create_test_scheduler().await;
        let held = scheduler
            .coordinator()
            .acquire_schedule_lock(&slot(900, 1000), "client-a")
            .await
            .unwrap();

        scheduler
            .create_appointment("client-a", &slot(930, 945), "follow-up")
            .await
            .unwrap();

        let active = scheduler.coordinator().list_active_locks().await.unwrap();
        assert_eq!(active.schedule.len(), 1);
        assert_eq!(active.schedule[0].id, held);
    }

    #[tokio::test]
    async fn test_move_appointment() {
        let (scheduler, store) = create_test_scheduler().await;
        let appointment = scheduler
            .create_appointment("client-a", &slot(900, 930), "checkup")
            .await
            .unwrap();

        let moved = scheduler
            .move_appointment("client-a", appointment.id, &slot(1000, 1030))
            .await
            .unwrap();

        assert_eq!(moved.slot, slot(1000, 1030));
        assert_eq!(store.get(appointment.id).await.unwrap().unwrap().slot, slot(1000, 1030));
        assert!(scheduler.coordinator().list_active_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_blocked_by_protection() {
        let (scheduler, store) = create_test_scheduler().await;
        let appointment = scheduler
            .create_appointment("client-a", &slot(900, 930), "checkup")
            .await
            .unwrap();
        scheduler
            .coordinator()
            .acquire_protection_lock(ProtectedEntity::appointment(appointment.id), "client-a", None)
            .await
            .unwrap();

        let err = scheduler
            .move_appointment("client-b", appointment.id, &slot(1000, 1030))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "E301");
        assert_eq!(store.get(appointment.id).await.unwrap().unwrap().slot, slot(900, 930));
    }

    #[tokio::test]
    async fn test_cancel_missing_appointment_releases_protection() {
        let (scheduler, _) = create_test_scheduler().await;

        let err = scheduler.cancel_appointment("client-a", 99).await.unwrap_err();

        assert!(matches!(err, Error::AppointmentNotFound(99)));
        assert_eq!(err.status_code(), 404);
        assert!(scheduler.coordinator().list_active_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_appointment() {
        let (scheduler, store) = create_test_scheduler().await;
        let appointment = scheduler
            .create_appointment("client-a", &slot(900, 930), "checkup")
            .await
            .unwrap();

        scheduler
            .cancel_appointment("client-b", appointment.id)
            .await
            .unwrap();

        assert!(store.all().await.is_empty());
    }
}
