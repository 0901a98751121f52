//! Shared models for the shipyard deployment pipeline
//!
//! Everything that crosses a process boundary lives here: the deployment record,
//! the project configuration the pipeline reads, the per-stage job payloads and the
//! domain events workers publish back to the reconciler.

pub mod deployment;
pub mod events;
pub mod jobs;
pub mod project;

pub use deployment::{Deployment, DeploymentError, DeploymentStatus};
pub use events::{DomainEvent, ErrorSource, EventPayload, EventType};
pub use jobs::{
    BackendBuildJob, BuildPlan, CloneJob, ClonePaths, CommitInfo, DeployJob, FrontendBuildJob,
    JobIds, JobPayload, JobRejection, RejectionKind, ServiceDeploy, StageName, StaticDeploy,
};
pub use project::{BackendBuild, Domains, EnvVar, FrontendBuild, GitSource, Project, ProjectType};
