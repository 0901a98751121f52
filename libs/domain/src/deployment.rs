//! Deployment record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventType;

/// Deployment status as exposed to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    /// `deployed` and `failed` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details attached to a failed deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentError {
    /// Event type that failed the deployment
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Human-readable message
    pub message: String,
}

/// One deploy attempt of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,

    /// Owning project
    pub project_id: String,

    /// User that triggered the deployment
    pub owner: String,

    /// Monotonic per project, assigned at creation
    pub number: u64,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub commit_hash: Option<String>,

    #[serde(default)]
    pub commit_message: Option<String>,

    #[serde(default)]
    pub frontend_task_arn: Option<String>,

    #[serde(default)]
    pub backend_task_arn: Option<String>,

    /// Image the backend build pushes
    #[serde(default)]
    pub image_tag: Option<String>,

    #[serde(default)]
    pub artifact_url: Option<String>,

    #[serde(default)]
    pub roll_back_artifact_url: Option<String>,

    /// Reachable address once deployed
    #[serde(default)]
    pub public_url: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<DeploymentError>,
}

impl Deployment {
    /// Create a queued deployment with a fresh id
    pub fn queued(project_id: &str, owner: &str, number: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            owner: owner.to_string(),
            number,
            status: DeploymentStatus::Queued,
            commit_hash: None,
            commit_message: None,
            frontend_task_arn: None,
            backend_task_arn: None,
            image_tag: None,
            artifact_url: None,
            roll_back_artifact_url: None,
            public_url: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}
