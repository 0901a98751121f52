//! Clone stage
//!
//! Checks the repository out into the deployment's working tree and schedules the build
//! the job's plan asks for.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use shipyard_domain::{
    BackendBuildJob, BuildPlan, CloneJob, EventType, FrontendBuildJob, JobPayload, StageName,
};
use tracing::info;

use crate::deploy::source::SourceFetcher;
use crate::errors::PipelineError;
use crate::workers::stage::{rejected, wrong_stage, Outcome, Stage};

const DEFAULT_BRANCH: &str = "main";

pub struct CloneStage {
    source: Arc<dyn SourceFetcher>,
}

impl CloneStage {
    pub fn new(source: Arc<dyn SourceFetcher>) -> Self {
        Self { source }
    }

    async fn check_out(&self, job: &CloneJob) -> Result<Outcome, PipelineError> {
        if let Err(rejection) = job.validate() {
            return rejected(rejection);
        }
        let Some(plan) = &job.build else {
            return Ok(Outcome::Skip(format!(
                "deployment {} has nothing to build",
                job.ids.deployment_id
            )));
        };

        let branch = if job.branch.trim().is_empty() {
            DEFAULT_BRANCH
        } else {
            job.branch.as_str()
        };
        let commit = self
            .source
            .fetch(&job.repo_url, branch, job.token.as_deref(), Path::new(&job.paths.base_dir))
            .await
            .map_err(|e| PipelineError::execution(e.to_string()))?;
        info!(
            "Checked out {} at {} for deployment {}",
            job.repo_url, commit.hash, job.ids.deployment_id
        );

        let or_base = |dir: &str| {
            if dir.is_empty() {
                job.paths.base_dir.clone()
            } else {
                dir.to_string()
            }
        };

        let next = match plan {
            BuildPlan::Frontend {
                build,
                envs,
                subdomain,
                previous_artifact_url,
            } => JobPayload::FrontendBuild(FrontendBuildJob {
                ids: job.ids.clone(),
                repo_url: job.repo_url.clone(),
                token: job.token.clone(),
                frontend_dir_path: or_base(&job.paths.frontend_dir),
                build: build.clone(),
                envs: envs.clone(),
                commit: Some(commit),
                subdomain: subdomain.clone(),
                previous_artifact_url: previous_artifact_url.clone(),
            }),
            BuildPlan::Backend {
                build,
                envs,
                subdomain,
            } => JobPayload::BackendBuild(BackendBuildJob {
                ids: job.ids.clone(),
                repo_url: job.repo_url.clone(),
                token: job.token.clone(),
                backend_dir_path: or_base(&job.paths.backend_dir),
                build: build.clone(),
                envs: envs.clone(),
                commit: Some(commit),
                subdomain: subdomain.clone(),
            }),
        };

        Ok(Outcome::Advance {
            next,
            events: Vec::new(),
        })
    }
}

#[async_trait]
impl Stage for CloneStage {
    fn name(&self) -> StageName {
        StageName::Clone
    }

    fn failure_event(&self, _job: &JobPayload) -> EventType {
        EventType::InternalError
    }

    async fn handle(&self, job: &JobPayload) -> Result<Outcome, PipelineError> {
        match job {
            JobPayload::Clone(job) => self.check_out(job).await,
            other => Err(wrong_stage(self.name(), other)),
        }
    }
}
