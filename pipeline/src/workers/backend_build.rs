//! Backend build stage

use std::sync::Arc;

use async_trait::async_trait;
use shipyard_domain::{
    BackendBuildJob, DeployJob, DomainEvent, EnvVar, EventPayload, EventType, JobPayload,
    ServiceDeploy, StageName,
};
use tracing::info;

use crate::cluster::{ClusterApi, RunTaskRequest};
use crate::deploy::env::merge_env;
use crate::deploy::git::authenticated_url;
use crate::errors::PipelineError;
use crate::utils::client_token;
use crate::workers::stage::{rejected, wrong_stage, Outcome, Stage};
use crate::workers::{commit_payload, BuildSettings};

pub struct BackendBuildStage {
    cluster: Arc<dyn ClusterApi>,
    build: BuildSettings,
    registry: String,
}

impl BackendBuildStage {
    pub fn new(cluster: Arc<dyn ClusterApi>, build: BuildSettings, registry: &str) -> Self {
        Self {
            cluster,
            build,
            registry: registry.trim_end_matches('/').to_string(),
        }
    }

    /// Image the build pushes, one tag per deployment
    pub fn image_tag(&self, project_id: &str, deployment_id: &str) -> String {
        format!("{}/{}:{}", self.registry, project_id, deployment_id)
    }

    async fn build(&self, job: &BackendBuildJob) -> Result<Outcome, PipelineError> {
        if let Err(rejection) = job.validate() {
            return rejected(rejection);
        }
        let project_id = job.ids.project_id.as_str();
        let deployment_id = job.ids.deployment_id.as_str();

        let task_definition = self
            .build
            .task_definition(&job.build.version)
            .ok_or_else(|| {
                PipelineError::UpstreamData(format!(
                    "no backend build image for runtime version {}",
                    job.build.version
                ))
            })?;
        let repo_url = authenticated_url(&job.repo_url, job.token.as_deref())
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let image_tag = self.image_tag(project_id, deployment_id);

        let base = vec![
            EnvVar::new("GIT_REPOSITORY__URL", repo_url),
            EnvVar::new("PROJECT_ID", project_id),
            EnvVar::new("DEPLOYMENTID", deployment_id),
            EnvVar::new("BACKENDPATH", job.backend_dir_path.as_str()),
            EnvVar::new("INSTALLCOMMAND", job.build.install_command.as_str()),
            EnvVar::new("IMAGE_TAG", image_tag.as_str()),
        ];
        let request = RunTaskRequest {
            cluster: self.build.cluster.clone(),
            task_definition: task_definition.to_string(),
            container_name: self.build.container_name.clone(),
            network: self.build.network.clone(),
            // user envs reach the service at deploy time, not the image build
            environment: merge_env(base, &[]),
            client_token: client_token(deployment_id, StageName::BackendBuild),
            started_by: "shipyard".to_string(),
        };

        let response = self.cluster.run_task(&request).await?;
        if !response.failures.is_empty() {
            let reasons: Vec<&str> = response.failures.iter().map(|f| f.reason.as_str()).collect();
            return Err(PipelineError::execution(format!(
                "backend build launch failed: {}",
                reasons.join(", ")
            )));
        }
        let task = response
            .tasks
            .first()
            .ok_or_else(|| PipelineError::execution("backend build launch returned no task"))?;
        info!(
            "Backend build task {} launched for deployment {} ({})",
            task.task_arn, deployment_id, image_tag
        );

        let building = DomainEvent::new(
            EventType::BackendBuilding,
            project_id,
            deployment_id,
            commit_payload(job.commit.as_ref()),
        );
        let launched = DomainEvent::new(
            EventType::BackendBuildSuccess,
            project_id,
            deployment_id,
            EventPayload {
                backend_task_arn: Some(task.task_arn.clone()),
                image_tag: Some(image_tag.clone()),
                ..Default::default()
            },
        );
        let next = JobPayload::Deploy(DeployJob::Service(ServiceDeploy {
            deployment_id: deployment_id.to_string(),
            project_id: project_id.to_string(),
            image_tag,
            install_command: job.build.install_command.clone(),
            start_command: job.build.run_command.clone(),
            envs: Some(job.envs.clone()),
            build_task_arn: Some(task.task_arn.clone()),
            subdomain: job.subdomain.clone(),
        }));

        Ok(Outcome::Advance {
            next,
            events: vec![building, launched],
        })
    }
}

#[async_trait]
impl Stage for BackendBuildStage {
    fn name(&self) -> StageName {
        StageName::BackendBuild
    }

    fn failure_event(&self, _job: &JobPayload) -> EventType {
        EventType::BackendBuildFailed
    }

    async fn handle(&self, job: &JobPayload) -> Result<Outcome, PipelineError> {
        match job {
            JobPayload::BackendBuild(job) => self.build(job).await,
            other => Err(wrong_stage(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryCluster;
    use shipyard_domain::{BackendBuild, CommitInfo, JobIds};
    use std::collections::BTreeMap;

    fn stage(cluster: Arc<MemoryCluster>) -> BackendBuildStage {
        BackendBuildStage::new(
            cluster,
            BuildSettings {
                cluster: "builds".to_string(),
                container_name: "builder".to_string(),
                task_definitions: BTreeMap::from([(
                    "20".to_string(),
                    "backend-builder-20".to_string(),
                )]),
                ..Default::default()
            },
            "registry.example.com/apps/",
        )
    }

    fn job() -> BackendBuildJob {
        BackendBuildJob {
            ids: JobIds::new("p1", "d1"),
            repo_url: "https://github.com/acme/api".to_string(),
            backend_dir_path: "/work/p1/d1".to_string(),
            build: BackendBuild {
                install_command: "npm ci".to_string(),
                run_command: "node server.js".to_string(),
                version: "20".to_string(),
            },
            envs: vec![EnvVar::new("DATABASE_URL", "postgres://db")],
            commit: Some(CommitInfo {
                hash: "abc123".to_string(),
                message: "Add health route".to_string(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_launch_advances_to_service_deploy() {
        let cluster = Arc::new(MemoryCluster::new());
        let outcome = stage(cluster)
            .handle(&JobPayload::BackendBuild(job()))
            .await
            .unwrap();

        let Outcome::Advance { next, events } = outcome else {
            panic!("expected advance");
        };
        let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(kinds, vec![EventType::BackendBuilding, EventType::BackendBuildSuccess]);
        assert_eq!(events[0].payload.commit_hash.as_deref(), Some("abc123"));

        let JobPayload::Deploy(DeployJob::Service(deploy)) = next else {
            panic!("expected service deploy");
        };
        assert_eq!(deploy.image_tag, "registry.example.com/apps/p1:d1");
        assert_eq!(deploy.start_command, "node server.js");
        assert_eq!(deploy.envs.unwrap().len(), 1);
        assert_eq!(
            deploy.build_task_arn,
            events[1].payload.backend_task_arn
        );
    }

    #[tokio::test]
    async fn test_missing_run_command_launches_nothing() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut job = job();
        job.build.run_command.clear();

        let err = stage(cluster.clone())
            .handle(&JobPayload::BackendBuild(job))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::UpstreamData("runCommand missing".to_string()));
        assert!(cluster.calls().await.is_empty());
    }
}
