//! Deployment records
//!
//! The reconciler is the only writer. Stage workers and the health server read through
//! `StatusView`.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use shipyard_domain::{Deployment, DeploymentStatus};

use crate::errors::ShipyardError;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Create a queued deployment with the project's next number
    async fn create(&self, project_id: &str, owner: &str) -> Result<Deployment, ShipyardError>;

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, ShipyardError>;

    /// Insert or replace a record
    async fn put(&self, deployment: &Deployment) -> Result<(), ShipyardError>;

    /// Deployments of a project, by number
    async fn list(&self, project_id: &str) -> Result<Vec<Deployment>, ShipyardError>;
}

/// Read-only status lookup
#[async_trait]
pub trait StatusView: Send + Sync {
    async fn status(&self, deployment_id: &str) -> Result<Option<DeploymentStatus>, ShipyardError>;
}

#[async_trait]
impl<T: DeploymentStore> StatusView for T {
    async fn status(&self, deployment_id: &str) -> Result<Option<DeploymentStatus>, ShipyardError> {
        Ok(self.get(deployment_id).await?.map(|d| d.status))
    }
}

/// Next number after the highest one in `existing`
pub(crate) fn next_number<'a>(existing: impl Iterator<Item = &'a Deployment>) -> u64 {
    existing.map(|d| d.number).max().unwrap_or(0) + 1
}
