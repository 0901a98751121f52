//! File-backed deployment store
//!
//! One JSON document per deployment, `{id}.json`, written with an atomic rename.

use async_trait::async_trait;
use shipyard_domain::Deployment;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::ShipyardError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::store::{next_number, DeploymentStore};

pub struct FileStore {
    dir: Dir,
    // serializes numbering so two creates never share a number
    create_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            create_lock: Mutex::new(()),
        }
    }

    fn record_file(&self, deployment_id: &str) -> Result<File, ShipyardError> {
        if deployment_id.is_empty()
            || !deployment_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ShipyardError::StoreError(format!(
                "invalid deployment id: {:?}",
                deployment_id
            )));
        }
        Ok(self.dir.file(&format!("{}.json", deployment_id)))
    }

    async fn read_all(&self) -> Result<Vec<Deployment>, ShipyardError> {
        let mut deployments = Vec::new();
        for path in self.dir.list_files("json").await? {
            match File::new(&path).read_json::<Deployment>().await {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => warn!("Skipping unreadable deployment record {}: {}", path.display(), e),
            }
        }
        Ok(deployments)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn create(&self, project_id: &str, owner: &str) -> Result<Deployment, ShipyardError> {
        let _guard = self.create_lock.lock().await;

        let existing = self.read_all().await?;
        let number = next_number(existing.iter().filter(|d| d.project_id == project_id));
        let deployment = Deployment::queued(project_id, owner, number);

        self.put(&deployment).await?;
        Ok(deployment)
    }

    async fn get(&self, deployment_id: &str) -> Result<Option<Deployment>, ShipyardError> {
        let file = match self.record_file(deployment_id) {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };
        file.read_json_opt().await
    }

    async fn put(&self, deployment: &Deployment) -> Result<(), ShipyardError> {
        debug!("Writing deployment {} ({})", deployment.id, deployment.status);
        self.record_file(&deployment.id)?.write_json(deployment).await
    }

    async fn list(&self, project_id: &str) -> Result<Vec<Deployment>, ShipyardError> {
        let mut deployments: Vec<Deployment> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|d| d.project_id == project_id)
            .collect();
        deployments.sort_by_key(|d| d.number);
        Ok(deployments)
    }
}
