//! Job payloads handed from one pipeline stage to the next

use serde::{Deserialize, Serialize};

use crate::project::{BackendBuild, EnvVar, FrontendBuild};

/// Pipeline stage a job belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Clone,
    FrontendBuild,
    BackendBuild,
    Deploy,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Clone => "clone",
            StageName::FrontendBuild => "frontend-build",
            StageName::BackendBuild => "backend-build",
            StageName::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a payload was refused before any side effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Malformed job, reported with source INTERNAL
    Validation,
    /// Project data missing, reported with source DATABASE
    UpstreamData,
    /// Dropped without an event
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl JobRejection {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Validation,
            reason: reason.into(),
        }
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::UpstreamData,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Skip,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for JobRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

fn require(
    value: &str,
    field: &str,
    reject: fn(String) -> JobRejection,
) -> Result<(), JobRejection> {
    if value.trim().is_empty() {
        return Err(reject(format!("{} missing", field)));
    }
    Ok(())
}

/// Identity shared by every job of a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobIds {
    pub project_id: String,
    pub deployment_id: String,
}

impl JobIds {
    pub fn new(project_id: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            deployment_id: deployment_id.into(),
        }
    }

    fn validate(&self) -> Result<(), JobRejection> {
        require(&self.project_id, "projectId", JobRejection::validation)?;
        require(&self.deployment_id, "deploymentId", JobRejection::validation)
    }
}

/// Commit the clone stage checked out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
}

/// Working-tree locations for one deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClonePaths {
    pub base_dir: String,
    pub frontend_dir: String,
    pub backend_dir: String,
}

/// What the clone stage schedules once sources are in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildPlan {
    Frontend {
        #[serde(default)]
        build: FrontendBuild,
        #[serde(default)]
        envs: Vec<EnvVar>,
        #[serde(default)]
        subdomain: String,
        #[serde(default, rename = "previousArtifactUrl")]
        previous_artifact_url: Option<String>,
    },
    Backend {
        #[serde(default)]
        build: BackendBuild,
        #[serde(default)]
        envs: Vec<EnvVar>,
        #[serde(default)]
        subdomain: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneJob {
    #[serde(flatten)]
    pub ids: JobIds,
    pub repo_url: String,
    pub branch: String,
    /// Access token for private repositories
    pub token: Option<String>,
    pub paths: ClonePaths,
    pub build: Option<BuildPlan>,
}

impl CloneJob {
    /// A clone job without identity or source is dropped quietly
    pub fn validate(&self) -> Result<(), JobRejection> {
        require(&self.ids.project_id, "projectId", JobRejection::skip)?;
        require(&self.ids.deployment_id, "deploymentId", JobRejection::skip)?;
        require(&self.repo_url, "repoUrl", JobRejection::skip)?;
        require(&self.paths.base_dir, "paths.baseDir", JobRejection::skip)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendBuildJob {
    #[serde(flatten)]
    pub ids: JobIds,
    pub repo_url: String,
    pub token: Option<String>,
    pub frontend_dir_path: String,
    pub build: FrontendBuild,
    pub envs: Vec<EnvVar>,
    pub commit: Option<CommitInfo>,
    pub subdomain: String,
    pub previous_artifact_url: Option<String>,
}

impl FrontendBuildJob {
    pub fn validate(&self) -> Result<(), JobRejection> {
        self.ids.validate()?;
        require(&self.repo_url, "repoUrl", JobRejection::validation)?;
        require(&self.frontend_dir_path, "frontendDirPath", JobRejection::validation)?;
        require(&self.build.install_command, "installCommand", JobRejection::upstream)?;
        require(&self.build.build_command, "buildCommand", JobRejection::upstream)?;
        require(&self.build.out_dir, "outDir", JobRejection::upstream)?;
        require(&self.build.version, "version", JobRejection::upstream)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendBuildJob {
    #[serde(flatten)]
    pub ids: JobIds,
    pub repo_url: String,
    pub token: Option<String>,
    pub backend_dir_path: String,
    pub build: BackendBuild,
    pub envs: Vec<EnvVar>,
    pub commit: Option<CommitInfo>,
    pub subdomain: String,
}

impl BackendBuildJob {
    pub fn validate(&self) -> Result<(), JobRejection> {
        self.ids.validate()?;
        require(&self.repo_url, "repoUrl", JobRejection::validation)?;
        require(&self.backend_dir_path, "backendDirPath", JobRejection::validation)?;
        require(&self.build.install_command, "installCommand", JobRejection::upstream)?;
        require(&self.build.run_command, "runCommand", JobRejection::upstream)?;
        require(&self.build.version, "version", JobRejection::upstream)
    }
}

/// Long-running service rollout of a built image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDeploy {
    pub deployment_id: String,
    pub project_id: String,
    pub image_tag: String,
    pub install_command: String,
    pub start_command: String,
    /// `None` means the project record had no env list at all
    pub envs: Option<Vec<EnvVar>>,
    pub build_task_arn: Option<String>,
    pub subdomain: String,
}

impl ServiceDeploy {
    pub fn validate(&self) -> Result<(), JobRejection> {
        require(&self.deployment_id, "deploymentId", JobRejection::validation)?;
        require(&self.project_id, "projectId", JobRejection::validation)?;
        if self.envs.is_none() {
            return Err(JobRejection::upstream("envs missing"));
        }
        require(&self.install_command, "installCommand", JobRejection::upstream)?;
        require(&self.start_command, "startCommand", JobRejection::upstream)?;
        require(&self.image_tag, "imageTag", JobRejection::validation)
    }
}

/// Publication of a built static site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticDeploy {
    #[serde(flatten)]
    pub ids: JobIds,
    pub artifact_url: String,
    pub build_task_arn: Option<String>,
    pub previous_artifact_url: Option<String>,
    pub subdomain: String,
}

impl StaticDeploy {
    pub fn validate(&self) -> Result<(), JobRejection> {
        self.ids.validate()?;
        require(&self.artifact_url, "artifactUrl", JobRejection::validation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum DeployJob {
    Service(ServiceDeploy),
    Static(StaticDeploy),
}

impl DeployJob {
    pub fn validate(&self) -> Result<(), JobRejection> {
        match self {
            DeployJob::Service(job) => job.validate(),
            DeployJob::Static(job) => job.validate(),
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            DeployJob::Service(job) => &job.project_id,
            DeployJob::Static(job) => &job.ids.project_id,
        }
    }

    pub fn deployment_id(&self) -> &str {
        match self {
            DeployJob::Service(job) => &job.deployment_id,
            DeployJob::Static(job) => &job.ids.deployment_id,
        }
    }
}

/// Payload of a queued job, tagged by stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    Clone(CloneJob),
    FrontendBuild(FrontendBuildJob),
    BackendBuild(BackendBuildJob),
    Deploy(DeployJob),
}

impl JobPayload {
    pub fn stage(&self) -> StageName {
        match self {
            JobPayload::Clone(_) => StageName::Clone,
            JobPayload::FrontendBuild(_) => StageName::FrontendBuild,
            JobPayload::BackendBuild(_) => StageName::BackendBuild,
            JobPayload::Deploy(_) => StageName::Deploy,
        }
    }

    /// (projectId, deploymentId), possibly empty on malformed jobs
    pub fn ids(&self) -> (&str, &str) {
        match self {
            JobPayload::Clone(job) => (&job.ids.project_id, &job.ids.deployment_id),
            JobPayload::FrontendBuild(job) => (&job.ids.project_id, &job.ids.deployment_id),
            JobPayload::BackendBuild(job) => (&job.ids.project_id, &job.ids.deployment_id),
            JobPayload::Deploy(job) => (job.project_id(), job.deployment_id()),
        }
    }
}
