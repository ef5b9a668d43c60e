//! Event bus and the outcome/notification gateway.
//!
//! The bus fans events out to in-process subscribers and records every
//! emission in the `events` audit table. The `NotificationSink` trait is the
//! seam to whatever renders and delivers student-facing notifications;
//! delivery is at-least-once and consumers deduplicate by entry id.

mod event_bus;
mod event_types;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;

pub use event_bus::{emit_and_record, BusEvent, EventBus};
pub use event_types::{
    CATEGORY_BATCH, CATEGORY_NOTIFICATION, CATEGORY_SIMULATION, EVENT_BATCH_STATUS_CHANGED,
    EVENT_JOB_STATUS_CHANGED, EVENT_SCENARIO_CLOSED_FOR_USER,
};

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct SinkError(pub String);

/// Payload of the `scenario-closed-for-user` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub event_kind: String,
    pub entry_id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub net_profit: f64,
}

impl Notification {
    pub fn scenario_closed_for_user(
        entry_id: impl Into<String>,
        scenario_id: impl Into<String>,
        user_id: impl Into<String>,
        net_profit: f64,
    ) -> Self {
        Self {
            event_kind: EVENT_SCENARIO_CLOSED_FOR_USER.to_string(),
            entry_id: entry_id.into(),
            scenario_id: scenario_id.into(),
            user_id: user_id.into(),
            net_profit,
        }
    }
}

/// Downstream edge for completed-simulation events (email rendering, UI
/// refresh). Out of scope beyond this seam.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Default sink: publish on the bus and persist to the audit table.
pub struct BusNotificationSink {
    db: Arc<Database>,
    bus: Arc<EventBus>,
}

impl BusNotificationSink {
    pub fn new(db: Arc<Database>, bus: Arc<EventBus>) -> Self {
        Self { db, bus }
    }
}

#[async_trait]
impl NotificationSink for BusNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let payload = serde_json::to_value(notification)
            .map_err(|e| SinkError(format!("payload serialization: {e}")))?;
        emit_and_record(
            &self.db,
            &self.bus,
            CATEGORY_NOTIFICATION,
            &notification.event_kind,
            Some(notification.scenario_id.clone()),
            payload,
        )
        .map_err(|e| SinkError(e.to_string()))?;
        Ok(())
    }
}
