//! Domain event infrastructure
//!
//! Provides base traits and types for domain events. Lock events give an
//! audit trail of who claimed which part of a calendar, and when.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Base trait for all domain events
///
/// Domain events represent something that happened in the domain.
/// They are immutable facts about the past.
pub trait DomainEvent: Send + Sync {
    /// Get the event type as a string
    fn event_type(&self) -> &str;

    /// Get the aggregate ID this event belongs to
    fn aggregate_id(&self) -> Uuid;

    /// Get the timestamp when this event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Get optional event data as JSON
    fn data(&self) -> Option<&serde_json::Value>;
}

/// Publisher trait for emitting domain events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()>;
}

/// A simple in-memory event store for recording events
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: std::sync::RwLock<Vec<StoredEvent>>,
}

/// A stored event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Aggregate ID this event belongs to
    pub aggregate_id: Uuid,
    /// Event type string
    pub event_type: String,
    /// Event data as JSON
    pub data: Option<serde_json::Value>,
    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Create from a domain event
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            data: event.data().cloned(),
            created_at: event.timestamp(),
        }
    }
}

impl InMemoryEventStore {
    /// Create a new in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event
    pub fn store(&self, event: StoredEvent) -> Result<()> {
        self.events
            .write()
            .map_err(|_| Error::Other("event store lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    /// Get events for an aggregate
    pub fn events_for(&self, aggregate_id: Uuid) -> Vec<StoredEvent> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .collect()
    }

    /// Get events by type
    pub fn events_by_type(&self, event_type: &str) -> Vec<StoredEvent> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Get all events
    pub fn all_events(&self) -> Vec<StoredEvent> {
        self.snapshot()
    }

    fn snapshot(&self) -> Vec<StoredEvent> {
        match self.events.read() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventStore {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()> {
        self.store(StoredEvent::from_event(event))
    }
}
