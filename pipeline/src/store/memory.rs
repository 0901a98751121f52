//! In-memory deployment store

use std::collections::HashMap;

use async_trait::async_trait;
use shipyard_domain::Deployment;
use tokio::sync::RwLock;

use crate::errors::ShipyardError;
use crate::store::{next_number, DeploymentStore};

#[derive(Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, project_id: &str, owner: &str) -> Result<Deployment, ShipyardError> {
        let mut deployments = self.deployments.write().await;
        let number = next_number(deployments.values().filter(|d| d.project_id == project_id));
        let deployment = Deployment::queued(project_id, owner, number);
        deployments.insert(deployment.id.clone(), deployment.clone());
        Ok(deployment)
    }

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, ShipyardError> {
        Ok(self.deployments.read().await.get(deployment_id).cloned())
    }

    async fn put(&self, deployment: &Deployment) -> Result<(), ShipyardError> {
        self.deployments
            .write()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn list(&self, project_id: &str) -> Result<Vec<Deployment>, ShipyardError> {
        let mut deployments: Vec<Deployment> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.number);
        Ok(deployments)
    }
}
