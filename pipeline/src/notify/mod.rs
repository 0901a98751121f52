//! Deployment status notifications
//!
//! The reconciler hands every record it changed to a `StatusNotifier` once the change is
//! stored. Notification failures are logged by the caller and never undo the change.

pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use shipyard_domain::Deployment;
use tokio::sync::Mutex;

use crate::errors::ShipyardError;

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, deployment: &Deployment) -> Result<(), ShipyardError>;
}

/// Drops every notification
pub struct NoopNotifier;

#[async_trait]
impl StatusNotifier for NoopNotifier {
    async fn notify(&self, _deployment: &Deployment) -> Result<(), ShipyardError> {
        Ok(())
    }
}

/// Keeps notifications in memory
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Deployment>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Deployment> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl StatusNotifier for MemoryNotifier {
    async fn notify(&self, deployment: &Deployment) -> Result<(), ShipyardError> {
        self.sent.lock().await.push(deployment.clone());
        Ok(())
    }
}
