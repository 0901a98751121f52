//! Deployment trigger
//!
//! Creates the deployment record and hands the project to the clone stage.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use shipyard_domain::{
    BuildPlan, CloneJob, ClonePaths, Deployment, DeploymentError, DeploymentStatus, DomainEvent,
    EventPayload, EventType, JobIds, JobPayload, Project, ProjectType,
};
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::errors::ShipyardError;
use crate::queue::jobs::JobQueues;
use crate::store::DeploymentStore;

const QUEUED_MESSAGE: &str = "Queued for deployment.";

pub struct Trigger {
    store: Arc<dyn DeploymentStore>,
    jobs: Arc<JobQueues>,
    events: EventBus,
    workspace_root: PathBuf,
}

/// Entry directory relative to the checkout, `None` for the repository root
///
/// Absolute paths and `..` components are refused so a checkout never escapes its
/// deployment directory.
pub fn normalize_entry(entry: &str) -> Result<Option<PathBuf>, ShipyardError> {
    let mut normalized = PathBuf::new();
    for component in Path::new(entry.trim()).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            _ => {
                return Err(ShipyardError::InvalidProject(format!(
                    "entry directory {} leaves the repository",
                    entry
                )))
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(normalized))
}

/// Working-tree locations of a deployment under `workspace_root`
pub fn clone_paths(
    workspace_root: &Path,
    project: &Project,
    deployment_id: &str,
) -> Result<ClonePaths, ShipyardError> {
    let base_dir = workspace_root.join(&project.id).join(deployment_id);
    let source_dir = match normalize_entry(&project.entry_directory)? {
        Some(entry) => base_dir.join(entry),
        None => base_dir.clone(),
    };
    let source_dir = source_dir.to_string_lossy().into_owned();

    let (frontend_dir, backend_dir) = match project.kind {
        ProjectType::Frontend => (source_dir, String::new()),
        ProjectType::Backend => (String::new(), source_dir),
    };
    Ok(ClonePaths {
        base_dir: base_dir.to_string_lossy().into_owned(),
        frontend_dir,
        backend_dir,
    })
}

fn build_plan(project: &Project) -> BuildPlan {
    match project.kind {
        ProjectType::Frontend => BuildPlan::Frontend {
            build: project.frontend_build.clone(),
            envs: project.envs.clone(),
            subdomain: project.domains.subdomain.clone(),
            previous_artifact_url: project.current_artifact_url.clone(),
        },
        ProjectType::Backend => BuildPlan::Backend {
            build: project.backend_build.clone(),
            envs: project.envs.clone(),
            subdomain: project.domains.subdomain.clone(),
        },
    }
}

fn validate(project: &Project) -> Result<(), ShipyardError> {
    if project.id.trim().is_empty() {
        return Err(ShipyardError::InvalidProject("project id missing".to_string()));
    }
    if !project
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ShipyardError::InvalidProject(format!(
            "project id {} is not a valid path segment",
            project.id
        )));
    }
    if project.git.repo_url.trim().is_empty() {
        return Err(ShipyardError::InvalidProject(format!(
            "project {} has no repository",
            project.id
        )));
    }
    Ok(())
}

impl Trigger {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        jobs: Arc<JobQueues>,
        events: EventBus,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            store,
            jobs,
            events,
            workspace_root,
        }
    }

    /// Start a deployment of `project` on behalf of `owner`
    pub async fn deploy(
        &self,
        project: &Project,
        owner: &str,
        token: Option<&str>,
    ) -> Result<Deployment, ShipyardError> {
        // 1. Check the project and derive the checkout layout before any write
        validate(project)?;
        normalize_entry(&project.entry_directory)?;

        // 2. Create the record
        let mut deployment = self.store.create(&project.id, owner).await?;
        let paths = clone_paths(&self.workspace_root, project, &deployment.id)?;

        // 3. Hand over to the clone stage
        let job = JobPayload::Clone(CloneJob {
            ids: JobIds::new(&project.id, &deployment.id),
            repo_url: project.git.repo_url.clone(),
            branch: project.git.branch.clone(),
            token: token.map(str::to_string),
            paths,
            build: Some(build_plan(project)),
        });
        if let Err(e) = self.jobs.enqueue(job).await {
            error!(
                "Failed to enqueue clone of deployment {}: {}",
                deployment.id, e
            );
            deployment.status = DeploymentStatus::Failed;
            deployment.finished_at = Some(Utc::now());
            deployment.error = Some(DeploymentError {
                kind: EventType::InternalError,
                message: format!("INTERNAL SERVER ERROR : {}", e),
            });
            self.store.put(&deployment).await?;
            return Err(e);
        }

        // 4. Announce
        let created = DomainEvent::new(
            EventType::Created,
            &project.id,
            &deployment.id,
            EventPayload {
                owner: Some(owner.to_string()),
                msg: Some(QUEUED_MESSAGE.to_string()),
                ..Default::default()
            },
        );
        if let Err(e) = self.events.publish(&created).await {
            warn!("Failed to publish CREATED for deployment {}: {}", deployment.id, e);
        }

        info!(
            "Queued deployment {} (#{}) of project {}",
            deployment.id, deployment.number, project.id
        );
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueue;
    use crate::queue::{MessageQueue, ReceiveOptions};
    use crate::store::memory::MemoryStore;
    use shipyard_domain::{Domains, FrontendBuild, GitSource, StageName};
    use std::time::Duration;

    fn project(entry: &str) -> Project {
        Project {
            id: "p1".to_string(),
            name: "site".to_string(),
            kind: ProjectType::Frontend,
            git: GitSource {
                repo_url: "https://github.com/acme/site.git".to_string(),
                branch: "main".to_string(),
            },
            frontend_build: FrontendBuild {
                install_command: "npm ci".to_string(),
                build_command: "npm run build".to_string(),
                out_dir: "dist".to_string(),
                version: "20".to_string(),
            },
            backend_build: Default::default(),
            envs: vec![],
            entry_directory: entry.to_string(),
            domains: Domains {
                subdomain: "site".to_string(),
            },
            current_artifact_url: Some("https://cdn.example.com/p1/d0/".to_string()),
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        jobs: Arc<JobQueues>,
        events: Arc<MemoryQueue>,
        trigger: Trigger,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryQueue::new("events"));
        let receive = ReceiveOptions {
            wait_time: Duration::ZERO,
            ..Default::default()
        };
        let jobs = JobQueues::build(&receive, |stage| {
            let queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new(stage.as_str()));
            Ok((queue, None))
        })
        .map(Arc::new)
        .unwrap();
        let trigger = Trigger::new(
            store.clone(),
            jobs.clone(),
            EventBus::new(events.clone()),
            PathBuf::from("/srv/shipyard"),
        );
        Fixture {
            store,
            jobs,
            events,
            trigger,
        }
    }

    #[test]
    fn test_normalize_entry() {
        assert_eq!(normalize_entry("./").unwrap(), None);
        assert_eq!(normalize_entry("").unwrap(), None);
        assert_eq!(normalize_entry("./web/").unwrap(), Some(PathBuf::from("web")));
        assert_eq!(
            normalize_entry("apps/web").unwrap(),
            Some(PathBuf::from("apps/web"))
        );
        assert!(normalize_entry("../other").is_err());
        assert!(normalize_entry("/etc").is_err());
    }

    #[tokio::test]
    async fn test_deploy_enqueues_clone_and_announces() {
        let fx = fixture();
        let deployment = fx.trigger.deploy(&project("./web"), "u1", Some("tok")).await.unwrap();

        assert_eq!(deployment.status, DeploymentStatus::Queued);
        assert_eq!(deployment.number, 1);
        assert!(fx.store.get(&deployment.id).await.unwrap().is_some());

        let delivery = fx.jobs.get(StageName::Clone).next().await.unwrap().unwrap();
        let envelope = delivery.envelope.unwrap();
        let JobPayload::Clone(job) = envelope.payload else {
            panic!("expected a clone job");
        };
        assert_eq!(job.token.as_deref(), Some("tok"));
        assert_eq!(job.paths.base_dir, format!("/srv/shipyard/p1/{}", deployment.id));
        assert_eq!(job.paths.frontend_dir, format!("/srv/shipyard/p1/{}/web", deployment.id));
        assert!(job.paths.backend_dir.is_empty());
        match job.build {
            Some(BuildPlan::Frontend {
                previous_artifact_url,
                ..
            }) => assert_eq!(
                previous_artifact_url.as_deref(),
                Some("https://cdn.example.com/p1/d0/")
            ),
            other => panic!("unexpected plan {:?}", other),
        }

        let bodies = fx.events.bodies().await;
        assert_eq!(bodies.len(), 1);
        let created: DomainEvent = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(created.kind, EventType::Created);
        assert_eq!(created.payload.owner.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_numbers_increase_per_project() {
        let fx = fixture();
        let first = fx.trigger.deploy(&project("./"), "u1", None).await.unwrap();
        let second = fx.trigger.deploy(&project("./"), "u1", None).await.unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
    }

    #[tokio::test]
    async fn test_invalid_project_creates_nothing() {
        let fx = fixture();
        let mut escaping = project("../../etc");
        assert!(fx.trigger.deploy(&escaping, "u1", None).await.is_err());

        escaping.entry_directory = "./".to_string();
        escaping.git.repo_url.clear();
        assert!(fx.trigger.deploy(&escaping, "u1", None).await.is_err());

        assert!(fx.store.list("p1").await.unwrap().is_empty());
        assert!(fx.events.is_empty().await);
    }
}
