//! Compute cluster scheduler
//!
//! The pipeline talks to the scheduler through `ClusterApi`: launching one-off build
//! tasks, registering task definitions, managing long-running services and inspecting
//! tasks and their network interfaces.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipyard_domain::EnvVar;

use crate::errors::ShipyardError;

/// Service status reported once a service has been deleted
pub const INACTIVE_STATUS: &str = "INACTIVE";

/// Task status once it has stopped
pub const STOPPED_STATUS: &str = "STOPPED";

/// Attachment detail holding the network interface id
pub const NETWORK_INTERFACE_DETAIL: &str = "networkInterfaceId";

/// Subnets and security groups tasks are placed into
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition: String,
    pub container_name: String,
    pub network: NetworkConfig,
    pub environment: Vec<EnvVar>,

    /// Idempotency token; the same token returns the same task
    pub client_token: String,

    pub started_by: String,
}

/// A task the scheduler refused to place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchFailure {
    #[serde(default)]
    pub arn: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    #[serde(default)]
    pub tasks: Vec<TaskDescription>,
    #[serde(default)]
    pub failures: Vec<LaunchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub port: u16,
    pub environment: Vec<EnvVar>,
    pub log_group: String,
    pub log_stream_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionRequest {
    pub family: String,
    pub execution_role_arn: String,
    pub cpu: String,
    pub memory: String,
    pub container: ContainerSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    pub service_name: String,
    pub status: String,
    #[serde(default)]
    pub task_definition: Option<String>,
}

impl ServiceDescription {
    /// Present and not deleted
    pub fn is_active(&self) -> bool {
        !self.status.eq_ignore_ascii_case(INACTIVE_STATUS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub cluster: String,
    pub service_name: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    pub cluster: String,
    pub service_name: String,
    pub task_definition: String,
    pub force_new_deployment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDetail {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub details: Vec<AttachmentDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescription {
    pub task_arn: String,

    #[serde(default)]
    pub task_definition_arn: Option<String>,

    #[serde(default)]
    pub last_status: String,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,

    /// Exit code of the essential container once stopped
    #[serde(default)]
    pub exit_code: Option<i32>,

    #[serde(default)]
    pub stopped_reason: Option<String>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TaskDescription {
    pub fn is_stopped(&self) -> bool {
        self.last_status.eq_ignore_ascii_case(STOPPED_STATUS)
    }

    /// Id of the first attached network interface
    pub fn network_interface_id(&self) -> Option<&str> {
        self.attachments
            .iter()
            .flat_map(|a| a.details.iter())
            .find(|d| d.name == NETWORK_INTERFACE_DETAIL)
            .map(|d| d.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub id: String,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, ShipyardError>;

    /// Register a new revision and return its ARN
    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<String, ShipyardError>;

    async fn describe_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<Option<ServiceDescription>, ShipyardError>;

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError>;

    async fn update_service(
        &self,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError>;

    /// ARNs of the service's current tasks
    async fn list_tasks(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<Vec<String>, ShipyardError>;

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<TaskDescription>, ShipyardError>;

    async fn describe_network_interface(
        &self,
        interface_id: &str,
    ) -> Result<Option<NetworkInterface>, ShipyardError>;
}
