//! Frontend build stage
//!
//! Launches the static-site build as a one-off cluster task and hands the artifact
//! location to the deploy stage. The stage records the launch; it never waits for the
//! build to finish.

use std::sync::Arc;

use async_trait::async_trait;
use shipyard_domain::{
    DeployJob, DomainEvent, EnvVar, EventPayload, EventType, FrontendBuildJob, JobPayload,
    StageName, StaticDeploy,
};
use tracing::info;

use crate::cluster::{ClusterApi, RunTaskRequest};
use crate::deploy::env::merge_env;
use crate::deploy::git::authenticated_url;
use crate::errors::PipelineError;
use crate::utils::client_token;
use crate::workers::stage::{rejected, wrong_stage, Outcome, Stage};
use crate::workers::{commit_payload, BuildSettings};

pub struct FrontendBuildStage {
    cluster: Arc<dyn ClusterApi>,
    build: BuildSettings,
    artifact_base_url: String,
}

impl FrontendBuildStage {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        build: BuildSettings,
        artifact_base_url: &str,
    ) -> Self {
        Self {
            cluster,
            build,
            artifact_base_url: artifact_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Where the build uploads the site
    pub fn artifact_url(&self, project_id: &str, deployment_id: &str) -> String {
        format!("{}/{}/{}/", self.artifact_base_url, project_id, deployment_id)
    }

    async fn build(&self, job: &FrontendBuildJob) -> Result<Outcome, PipelineError> {
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
                    "no frontend build image for runtime version {}",
                    job.build.version
                ))
            })?;
        let repo_url = authenticated_url(&job.repo_url, job.token.as_deref())
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        let base = vec![
            EnvVar::new("GIT_REPOSITORY__URL", repo_url),
            EnvVar::new("PROJECT_ID", project_id),
            EnvVar::new("DEPLOYMENTID", deployment_id),
            EnvVar::new("FRONTENDPATH", job.frontend_dir_path.as_str()),
            EnvVar::new("FRONTENDOUTPUTDIR", job.build.out_dir.as_str()),
            EnvVar::new("INSTALLCOMMAND", job.build.install_command.as_str()),
            EnvVar::new("BUILDCOMMAND", job.build.build_command.as_str()),
        ];
        let request = RunTaskRequest {
            cluster: self.build.cluster.clone(),
            task_definition: task_definition.to_string(),
            container_name: self.build.container_name.clone(),
            network: self.build.network.clone(),
            environment: merge_env(base, &job.envs),
            client_token: client_token(deployment_id, StageName::FrontendBuild),
            started_by: "shipyard".to_string(),
        };

        let response = self.cluster.run_task(&request).await?;
        if !response.failures.is_empty() {
            let reasons: Vec<&str> = response.failures.iter().map(|f| f.reason.as_str()).collect();
            return Err(PipelineError::execution(format!(
                "frontend build launch failed: {}",
                reasons.join(", ")
            )));
        }
        let task = response.tasks.first().ok_or_else(|| {
            PipelineError::execution("frontend build launch returned no task")
        })?;
        info!(
            "Frontend build task {} launched for deployment {}",
            task.task_arn, deployment_id
        );

        let artifact_url = self.artifact_url(project_id, deployment_id);
        let queued = DomainEvent::new(
            EventType::FrontendBuildQueued,
            project_id,
            deployment_id,
            EventPayload {
                frontend_task_arn: Some(task.task_arn.clone()),
                artifact_url: Some(artifact_url.clone()),
                ..commit_payload(job.commit.as_ref())
            },
        );
        let next = JobPayload::Deploy(DeployJob::Static(StaticDeploy {
            ids: job.ids.clone(),
            artifact_url,
            build_task_arn: Some(task.task_arn.clone()),
            previous_artifact_url: job.previous_artifact_url.clone(),
            subdomain: job.subdomain.clone(),
        }));

        Ok(Outcome::Advance {
            next,
            events: vec![queued],
        })
    }
}

#[async_trait]
impl Stage for FrontendBuildStage {
    fn name(&self) -> StageName {
        StageName::FrontendBuild
    }

    fn failure_event(&self, _job: &JobPayload) -> EventType {
        EventType::FrontendBuildFailed
    }

    async fn handle(&self, job: &JobPayload) -> Result<Outcome, PipelineError> {
        match job {
            JobPayload::FrontendBuild(job) => self.build(job).await,
            other => Err(wrong_stage(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{ClusterCall, MemoryCluster};
    use shipyard_domain::{FrontendBuild, JobIds};
    use std::collections::BTreeMap;

    fn settings() -> BuildSettings {
        BuildSettings {
            cluster: "builds".to_string(),
            container_name: "builder".to_string(),
            task_definitions: BTreeMap::from([(
                "20".to_string(),
                "frontend-builder-20".to_string(),
            )]),
            ..Default::default()
        }
    }

    fn job() -> FrontendBuildJob {
        FrontendBuildJob {
            ids: JobIds::new("p1", "d1"),
            repo_url: "https://github.com/acme/site".to_string(),
            frontend_dir_path: "/work/p1/d1".to_string(),
            build: FrontendBuild {
                install_command: "npm i".to_string(),
                build_command: "npm run build".to_string(),
                out_dir: "dist".to_string(),
                version: "20".to_string(),
            },
            envs: vec![EnvVar::new("PORT", "1"), EnvVar::new("VITE_API", "https://api")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_launch_advances_to_static_deploy() {
        let cluster = Arc::new(MemoryCluster::new());
        let stage =
            FrontendBuildStage::new(cluster.clone(), settings(), "https://cdn.example.com/");

        let outcome = stage.handle(&JobPayload::FrontendBuild(job())).await.unwrap();
        let Outcome::Advance { next, events } = outcome else {
            panic!("expected advance");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::FrontendBuildQueued);
        let task_arn = events[0].payload.frontend_task_arn.clone().unwrap();
        assert!(!task_arn.is_empty());

        let JobPayload::Deploy(DeployJob::Static(deploy)) = next else {
            panic!("expected static deploy");
        };
        assert_eq!(deploy.artifact_url, "https://cdn.example.com/p1/d1/");
        assert_eq!(deploy.build_task_arn.as_deref(), Some(task_arn.as_str()));

        let calls = cluster.calls().await;
        assert_eq!(
            calls,
            vec![ClusterCall::RunTask {
                task_definition: "frontend-builder-20".to_string(),
                client_token: client_token("d1", StageName::FrontendBuild),
            }]
        );
    }

    #[tokio::test]
    async fn test_redelivery_reuses_the_launched_task() {
        let cluster = Arc::new(MemoryCluster::new());
        let stage = FrontendBuildStage::new(cluster.clone(), settings(), "https://cdn");
        let payload = JobPayload::FrontendBuild(job());

        let first = stage.handle(&payload).await.unwrap();
        let second = stage.handle(&payload).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_launch_failure_is_retryable() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_launches("RESOURCE:MEMORY").await;
        let stage = FrontendBuildStage::new(cluster, settings(), "https://cdn");

        let err = stage
            .handle(&JobPayload::FrontendBuild(job()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("RESOURCE:MEMORY"));
    }

    #[tokio::test]
    async fn test_unknown_runtime_version_is_upstream_data() {
        let cluster = Arc::new(MemoryCluster::new());
        let stage = FrontendBuildStage::new(cluster.clone(), settings(), "https://cdn");
        let mut job = job();
        job.build.version = "14".to_string();

        assert!(matches!(
            stage.handle(&JobPayload::FrontendBuild(job)).await,
            Err(PipelineError::UpstreamData(_))
        ));
        assert!(cluster.calls().await.is_empty());
    }
}
