use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{queries, Database};

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub scenario_id: Option<String>,
    pub seq: i64,
    pub category: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    seq: AtomicI64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Publish a pre-built event onto the bus.
    pub fn publish(&self, event: BusEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("event bus publish with no receivers: {e}");
        }
    }

    /// Convenience: build and publish an event in one call.
    pub fn emit(
        &self,
        category: impl Into<String>,
        event_type: impl Into<String>,
        scenario_id: Option<String>,
        payload: serde_json::Value,
    ) -> BusEvent {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            scenario_id,
            seq,
            category: category.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now().to_rfc3339(),
        };
        self.publish(event.clone());
        event
    }

    /// Get a new receiver for this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit an event and record it in the `events` audit table in one call.
pub fn emit_and_record(
    db: &Database,
    bus: &EventBus,
    category: &str,
    event_type: &str,
    scenario_id: Option<String>,
    payload: serde_json::Value,
) -> Result<BusEvent, crate::db::DbError> {
    let event = bus.emit(category, event_type, scenario_id, payload);
    queries::insert_event(
        db,
        &queries::EventRow {
            id: event.id.clone(),
            seq: event.seq,
            category: event.category.clone(),
            event_type: event.event_type.clone(),
            scenario_id: event.scenario_id.clone(),
            payload_json: event.payload.to_string(),
            created_at: event.created_at.clone(),
        },
    )?;
    Ok(event)
}
