//! Appointment operations wrapped in the locking protocol
//!
//! Each mutating operation computes the slot or entity it touches, works
//! under a lock for it, and releases only the locks it created. Appointment
//! persistence itself is behind [`AppointmentStore`].

pub mod scheduler;
pub mod store;

pub use scheduler::AppointmentScheduler;
pub use store::{Appointment, AppointmentStore, InMemoryAppointmentStore};
