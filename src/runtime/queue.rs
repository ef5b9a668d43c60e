//! Queue seam between the orchestrator and the worker pools.
//!
//! Payloads carry ids only; durable state lives in the store. The in-process
//! implementation is a channel per topic with delayed delivery handled by
//! scheduled tasks, which is enough for a single replica. Multi-replica
//! deployments swap in a shared broker behind the same trait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SimulationDirect,
    SimulationBatch,
}

impl Topic {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::SimulationDirect => "simulation-direct",
            Topic::SimulationBatch => "simulation-batch",
        }
    }
}

/// Messages on the simulation topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Run one job on the direct path.
    Direct { job_id: String },
    /// Pack every pending job of a scenario into one oracle batch.
    BatchSubmit {
        scenario_id: String,
        classroom_id: String,
        actor_id: String,
    },
    /// Check on a submitted batch.
    BatchPoll {
        batch_id: String,
        oracle_batch_id: String,
    },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed for topic {0}")]
    Closed(&'static str),
}

/// The narrow queue seam the runtime depends on. Workers compete on `next`;
/// each message is delivered to exactly one of them.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, topic: Topic, message: QueueMessage) -> Result<(), QueueError>;

    async fn publish_delayed(
        &self,
        topic: Topic,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError>;

    async fn next(&self, topic: Topic) -> Option<QueueMessage>;
}

struct TopicChannel {
    tx: mpsc::UnboundedSender<QueueMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
}

impl TopicChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

pub struct InMemoryQueue {
    direct: TopicChannel,
    batch: TopicChannel,
    scheduled: Arc<DashMap<u64, tokio::task::JoinHandle<()>>>,
    next_schedule_id: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            direct: TopicChannel::new(),
            batch: TopicChannel::new(),
            scheduled: Arc::new(DashMap::new()),
            next_schedule_id: AtomicU64::new(0),
        }
    }

    fn channel(&self, topic: Topic) -> &TopicChannel {
        match topic {
            Topic::SimulationDirect => &self.direct,
            Topic::SimulationBatch => &self.batch,
        }
    }

    /// Deliveries still waiting on their delay.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Abort every scheduled delivery. Called on shutdown.
    pub fn cancel_scheduled(&self) {
        self.scheduled.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, topic: Topic, message: QueueMessage) -> Result<(), QueueError> {
        self.channel(topic)
            .tx
            .send(message)
            .map_err(|_| QueueError::Closed(topic.as_str()))
    }

    async fn publish_delayed(
        &self,
        topic: Topic,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError> {
        if delay.is_zero() {
            return self.publish(topic, message).await;
        }

        let tx = self.channel(topic).tx.clone();
        let scheduled = Arc::clone(&self.scheduled);
        let schedule_id = self.next_schedule_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(message).is_err() {
                tracing::debug!("delayed delivery dropped: topic channel closed");
            }
            scheduled.remove(&schedule_id);
        });
        self.scheduled.insert(schedule_id, handle);
        Ok(())
    }

    async fn next(&self, topic: Topic) -> Option<QueueMessage> {
        self.channel(topic).rx.lock().await.recv().await
    }
}
