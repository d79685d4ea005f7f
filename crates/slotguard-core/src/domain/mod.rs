//! Domain layer
//!
//! Locking protocol, the scheduling operations built on it, and the
//! domain events both publish.

pub mod events;
pub mod locking;
pub mod scheduling;
