//! Event bus
//!
//! Domain events ride on their own message queue, separate from the job queues. Stage
//! workers publish; the reconciler is the single logical consumer.

pub mod poller;
pub mod purge;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shipyard_domain::DomainEvent;
use tracing::info;

use crate::errors::ShipyardError;
use crate::queue::MessageQueue;

/// Publishing side of the event bus
#[derive(Clone)]
pub struct EventBus {
    queue: Arc<dyn MessageQueue>,
}

impl EventBus {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    pub async fn publish(&self, event: &DomainEvent) -> Result<(), ShipyardError> {
        let body = serde_json::to_string(event)?;
        self.queue.send(&body, Duration::ZERO).await?;
        info!(
            "Published {} for deployment {} of project {}",
            event.kind, event.deployment_id, event.project_id
        );
        Ok(())
    }
}

/// What the consumer did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event changed the deployment record
    Applied,
    /// Duplicate, unknown type or unknown deployment; safe to delete
    Ignored,
    /// Arrived before its prerequisite; leave it for redelivery
    Deferred,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<HandleOutcome, ShipyardError>;
}
