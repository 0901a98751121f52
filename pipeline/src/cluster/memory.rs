//! In-process cluster scheduler
//!
//! Scriptable stand-in for the real scheduler. Every call is recorded so callers can
//! assert on exactly what the pipeline asked the cluster to do.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::cluster::{
    Attachment, AttachmentDetail, ClusterApi, CreateServiceRequest, LaunchFailure,
    NetworkInterface, RunTaskRequest, RunTaskResponse, ServiceDescription, TaskDefinitionRequest,
    TaskDescription, UpdateServiceRequest, NETWORK_INTERFACE_DETAIL, STOPPED_STATUS,
};
use crate::errors::ShipyardError;
use crate::utils::generate_uuid;

/// A call the scheduler received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    RunTask { task_definition: String, client_token: String },
    RegisterTaskDefinition { family: String },
    DescribeService { service_name: String },
    CreateService { service_name: String, task_definition: String },
    UpdateService { service_name: String, task_definition: String, force: bool },
    ListTasks { service_name: String },
    DescribeTasks { task_arns: Vec<String> },
    DescribeNetworkInterface { interface_id: String },
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<ClusterCall>,
    services: HashMap<String, ServiceDescription>,
    revisions: HashMap<String, u32>,
    tasks: HashMap<String, TaskDescription>,
    launched_by_token: HashMap<String, String>,
    launch_failure: Option<String>,
    build_exit_code: i32,
    service_task_script: HashMap<String, Vec<Vec<String>>>,
    list_calls: HashMap<String, usize>,
    interfaces: HashMap<String, NetworkInterface>,
}

#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Make every `run_task` report a placement failure
    pub async fn fail_launches(&self, reason: &str) {
        self.inner.lock().await.launch_failure = Some(reason.to_string());
    }

    /// Exit code reported by launched build tasks
    pub async fn set_build_exit_code(&self, exit_code: i32) {
        self.inner.lock().await.build_exit_code = exit_code;
    }

    /// Register an existing service
    pub async fn insert_service(&self, service: ServiceDescription) {
        self.inner
            .lock()
            .await
            .services
            .insert(service.service_name.clone(), service);
    }

    pub async fn insert_task(&self, task: TaskDescription) {
        self.inner
            .lock()
            .await
            .tasks
            .insert(task.task_arn.clone(), task);
    }

    pub async fn insert_interface(&self, interface: NetworkInterface) {
        self.inner
            .lock()
            .await
            .interfaces
            .insert(interface.id.clone(), interface);
    }

    /// Task ARNs returned by successive `list_tasks` calls for a service
    ///
    /// The n-th call returns the n-th entry; the last entry repeats once the script runs
    /// out.
    pub async fn script_service_tasks(&self, service_name: &str, script: Vec<Vec<String>>) {
        self.inner
            .lock()
            .await
            .service_task_script
            .insert(service_name.to_string(), script);
    }

    /// Build a running task attached to a network interface
    pub fn running_task(
        task_arn: &str,
        task_definition_arn: Option<&str>,
        started_at: Option<chrono::DateTime<Utc>>,
        interface_id: &str,
    ) -> TaskDescription {
        TaskDescription {
            task_arn: task_arn.to_string(),
            task_definition_arn: task_definition_arn.map(str::to_string),
            last_status: if started_at.is_some() { "RUNNING" } else { "PENDING" }.to_string(),
            started_at,
            stopped_at: None,
            exit_code: None,
            stopped_reason: None,
            attachments: vec![Attachment {
                kind: "ElasticNetworkInterface".to_string(),
                details: vec![AttachmentDetail {
                    name: NETWORK_INTERFACE_DETAIL.to_string(),
                    value: interface_id.to_string(),
                }],
            }],
        }
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::RunTask {
            task_definition: request.task_definition.clone(),
            client_token: request.client_token.clone(),
        });

        if let Some(reason) = inner.launch_failure.clone() {
            return Ok(RunTaskResponse {
                tasks: Vec::new(),
                failures: vec![LaunchFailure { arn: None, reason }],
            });
        }

        if let Some(task) = inner
            .launched_by_token
            .get(&request.client_token)
            .and_then(|arn| inner.tasks.get(arn))
        {
            return Ok(RunTaskResponse {
                tasks: vec![task.clone()],
                failures: Vec::new(),
            });
        }

        // build tasks finish instantly
        let now = Utc::now();
        let task = TaskDescription {
            task_arn: format!("arn:memory:task/{}/{}", request.cluster, generate_uuid()),
            task_definition_arn: Some(request.task_definition.clone()),
            last_status: STOPPED_STATUS.to_string(),
            started_at: Some(now),
            stopped_at: Some(now),
            exit_code: Some(inner.build_exit_code),
            stopped_reason: Some("Essential container in task exited".to_string()),
            attachments: Vec::new(),
        };
        inner
            .launched_by_token
            .insert(request.client_token.clone(), task.task_arn.clone());
        inner.tasks.insert(task.task_arn.clone(), task.clone());

        Ok(RunTaskResponse {
            tasks: vec![task],
            failures: Vec::new(),
        })
    }

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<String, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::RegisterTaskDefinition {
            family: request.family.clone(),
        });
        let revision = inner.revisions.entry(request.family.clone()).or_insert(0);
        *revision += 1;
        Ok(format!(
            "arn:memory:task-definition/{}:{}",
            request.family, revision
        ))
    }

    async fn describe_service(
        &self,
        _cluster: &str,
        service_name: &str,
    ) -> Result<Option<ServiceDescription>, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::DescribeService {
            service_name: service_name.to_string(),
        });
        Ok(inner.services.get(service_name).cloned())
    }

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::CreateService {
            service_name: request.service_name.clone(),
            task_definition: request.task_definition.clone(),
        });
        if inner
            .services
            .get(&request.service_name)
            .is_some_and(|s| s.is_active())
        {
            return Err(ShipyardError::ClusterError(format!(
                "service {} already exists",
                request.service_name
            )));
        }
        let service = ServiceDescription {
            service_name: request.service_name.clone(),
            status: "ACTIVE".to_string(),
            task_definition: Some(request.task_definition.clone()),
        };
        inner
            .services
            .insert(service.service_name.clone(), service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::UpdateService {
            service_name: request.service_name.clone(),
            task_definition: request.task_definition.clone(),
            force: request.force_new_deployment,
        });
        let service = inner
            .services
            .get_mut(&request.service_name)
            .ok_or_else(|| {
                ShipyardError::ClusterError(format!("service {} not found", request.service_name))
            })?;
        service.task_definition = Some(request.task_definition.clone());
        Ok(service.clone())
    }

    async fn list_tasks(
        &self,
        _cluster: &str,
        service_name: &str,
    ) -> Result<Vec<String>, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::ListTasks {
            service_name: service_name.to_string(),
        });

        let call = {
            let count = inner.list_calls.entry(service_name.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let arns = inner
            .service_task_script
            .get(service_name)
            .and_then(|script| script.get(call - 1).or_else(|| script.last()))
            .cloned()
            .unwrap_or_default();
        Ok(arns)
    }

    async fn describe_tasks(
        &self,
        _cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<TaskDescription>, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::DescribeTasks {
            task_arns: task_arns.to_vec(),
        });
        Ok(task_arns
            .iter()
            .filter_map(|arn| inner.tasks.get(arn).cloned())
            .collect())
    }

    async fn describe_network_interface(
        &self,
        interface_id: &str,
    ) -> Result<Option<NetworkInterface>, ShipyardError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(ClusterCall::DescribeNetworkInterface {
            interface_id: interface_id.to_string(),
        });
        Ok(inner.interfaces.get(interface_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NetworkConfig;

    fn run_request(token: &str) -> RunTaskRequest {
        RunTaskRequest {
            cluster: "builds".to_string(),
            task_definition: "frontend-builder-20".to_string(),
            container_name: "builder".to_string(),
            network: NetworkConfig::default(),
            environment: Vec::new(),
            client_token: token.to_string(),
            started_by: "shipyard".to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_client_token_returns_same_task() {
        let cluster = MemoryCluster::new();
        let first = cluster.run_task(&run_request("t1")).await.unwrap();
        let second = cluster.run_task(&run_request("t1")).await.unwrap();
        let third = cluster.run_task(&run_request("t2")).await.unwrap();

        assert_eq!(first.tasks[0].task_arn, second.tasks[0].task_arn);
        assert_ne!(first.tasks[0].task_arn, third.tasks[0].task_arn);
    }

    #[tokio::test]
    async fn test_task_definition_revisions_increase() {
        let cluster = MemoryCluster::new();
        let request = TaskDefinitionRequest {
            family: "backend-p1".to_string(),
            execution_role_arn: "role".to_string(),
            cpu: "256".to_string(),
            memory: "512".to_string(),
            container: crate::cluster::ContainerSpec {
                name: "backend".to_string(),
                image: "registry/p1:d1".to_string(),
                port: 80,
                environment: Vec::new(),
                log_group: "/ecs/backend".to_string(),
                log_stream_prefix: "ecs".to_string(),
            },
        };
        assert!(cluster
            .register_task_definition(&request)
            .await
            .unwrap()
            .ends_with("backend-p1:1"));
        assert!(cluster
            .register_task_definition(&request)
            .await
            .unwrap()
            .ends_with("backend-p1:2"));
    }

    #[tokio::test]
    async fn test_list_tasks_follows_script() {
        let cluster = MemoryCluster::new();
        cluster
            .script_service_tasks("svc", vec![vec![], vec!["t1".to_string()]])
            .await;
        assert!(cluster.list_tasks("c", "svc").await.unwrap().is_empty());
        assert_eq!(cluster.list_tasks("c", "svc").await.unwrap(), vec!["t1"]);
        assert_eq!(cluster.list_tasks("c", "svc").await.unwrap(), vec!["t1"]);
    }
}
