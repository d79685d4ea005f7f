//! Appointment persistence boundary

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::locking::ScheduleSlot;
use crate::error::{Error, Result};

/// A booked appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub slot: ScheduleSlot,
    pub note: String,
}

/// Where appointments live; the scheduler never touches storage directly
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Persist a new appointment and assign its ID
    async fn insert(&self, slot: &ScheduleSlot, note: &str) -> Result<Appointment>;

    async fn get(&self, id: i64) -> Result<Option<Appointment>>;

    /// Move an existing appointment to `slot`
    async fn update_slot(&self, id: i64, slot: &ScheduleSlot) -> Result<Appointment>;

    /// Delete an appointment; true when it existed
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Process-local appointment store
#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    inner: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    appointments: BTreeMap<i64, Appointment>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All appointments, ordered by ID
    pub async fn all(&self) -> Vec<Appointment> {
        self.inner.read().await.appointments.values().cloned().collect()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, slot: &ScheduleSlot, note: &str) -> Result<Appointment> {
        let mut state = self.inner.write().await;
        state.next_id += 1;
        let appointment = Appointment {
            id: state.next_id,
            slot: slot.clone(),
            note: note.to_string(),
        };
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get(&self, id: i64) -> Result<Option<Appointment>> {
        Ok(self.inner.read().await.appointments.get(&id).cloned())
    }

    async fn update_slot(&self, id: i64, slot: &ScheduleSlot) -> Result<Appointment> {
        let mut state = self.inner.write().await;
        let appointment = state
            .appointments
            .get_mut(&id)
            .ok_or(Error::AppointmentNotFound(id))?;
        appointment.slot = slot.clone();
        Ok(appointment.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.inner.write().await.appointments.remove(&id).is_some())
    }
}
