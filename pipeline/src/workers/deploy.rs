//! Deploy stage
//!
//! Waits for the build task, then either rolls the image out as a long-running service or
//! publishes the built static site. Both end in `DEPLOYMENT_METADATA_RECEIVED`.

use std::sync::Arc;

use async_trait::async_trait;
use shipyard_domain::{
    DeployJob, DomainEvent, EventPayload, EventType, JobPayload, ServiceDeploy, StageName,
    StaticDeploy,
};
use tracing::info;

use crate::cluster::{
    ClusterApi, ContainerSpec, CreateServiceRequest, NetworkConfig, TaskDefinitionRequest,
    UpdateServiceRequest,
};
use crate::deploy::env::{merge_env, service_base_env};
use crate::deploy::lifecycle::{resolve_endpoint, wait_for_build};
use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use crate::workers::stage::{rejected, wrong_stage, Outcome, Stage};

/// Where services run and how they are shaped
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Cluster the build tasks ran on
    pub build_cluster: String,

    /// Cluster long-running services run on
    pub service_cluster: String,

    pub network: NetworkConfig,
    pub execution_role_arn: String,
    pub cpu: String,
    pub memory: String,
    pub container_port: u16,
    pub log_group: String,

    /// Domain public subdomains live under
    pub public_domain: String,

    /// Bound on waiting for a build task to stop
    pub build_wait: RetryPolicy,

    /// Bound on waiting for a started service task
    pub resolve: RetryPolicy,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            build_cluster: String::new(),
            service_cluster: String::new(),
            network: NetworkConfig::default(),
            execution_role_arn: String::new(),
            cpu: "256".to_string(),
            memory: "512".to_string(),
            container_port: 80,
            log_group: "/ecs/backend".to_string(),
            public_domain: String::new(),
            build_wait: RetryPolicy::new(120, std::time::Duration::from_secs(10)),
            resolve: RetryPolicy::default(),
        }
    }
}

impl DeploySettings {
    fn subdomain_url(&self, subdomain: &str) -> Option<String> {
        if subdomain.is_empty() || self.public_domain.is_empty() {
            return None;
        }
        Some(format!("https://{}.{}", subdomain, self.public_domain))
    }
}

pub fn task_family(project_id: &str) -> String {
    format!("backend-{}", project_id)
}

pub fn service_name(project_id: &str) -> String {
    format!("backend-service-{}", project_id)
}

pub struct DeployStage {
    cluster: Arc<dyn ClusterApi>,
    settings: DeploySettings,
}

impl DeployStage {
    pub fn new(cluster: Arc<dyn ClusterApi>, settings: DeploySettings) -> Self {
        Self { cluster, settings }
    }

    async fn await_build(&self, task_arn: Option<&str>) -> Result<(), PipelineError> {
        let Some(task_arn) = task_arn else {
            return Ok(());
        };
        wait_for_build(
            self.cluster.as_ref(),
            &self.settings.build_cluster,
            task_arn,
            &self.settings.build_wait,
            tokio::time::sleep,
        )
        .await?;
        Ok(())
    }

    async fn deploy_service(&self, job: &ServiceDeploy) -> Result<Outcome, PipelineError> {
        if let Err(rejection) = job.validate() {
            return rejected(rejection);
        }
        let cluster = self.cluster.as_ref();
        let settings = &self.settings;

        // 1. Build must have pushed the image
        self.await_build(job.build_task_arn.as_deref()).await?;

        // 2. Fresh task definition revision
        let public_url = settings.subdomain_url(&job.subdomain).unwrap_or_default();
        let environment = merge_env(
            service_base_env(&job.start_command, &public_url, settings.container_port),
            job.envs.as_deref().unwrap_or_default(),
        );
        let task_definition_arn = cluster
            .register_task_definition(&TaskDefinitionRequest {
                family: task_family(&job.project_id),
                execution_role_arn: settings.execution_role_arn.clone(),
                cpu: settings.cpu.clone(),
                memory: settings.memory.clone(),
                container: ContainerSpec {
                    name: "backend".to_string(),
                    image: job.image_tag.clone(),
                    port: settings.container_port,
                    environment,
                    log_group: settings.log_group.clone(),
                    log_stream_prefix: "ecs".to_string(),
                },
            })
            .await?;
        info!("Registered task definition {}", task_definition_arn);

        // 3. Create or update the service
        let service_name = service_name(&job.project_id);
        let existing = cluster
            .describe_service(&settings.service_cluster, &service_name)
            .await?;
        match existing {
            Some(service) if service.is_active() => {
                info!("Updating service {} with forced replacement", service_name);
                cluster
                    .update_service(&UpdateServiceRequest {
                        cluster: settings.service_cluster.clone(),
                        service_name: service_name.clone(),
                        task_definition: task_definition_arn.clone(),
                        force_new_deployment: true,
                    })
                    .await?;
            }
            _ => {
                info!("Creating service {}", service_name);
                cluster
                    .create_service(&CreateServiceRequest {
                        cluster: settings.service_cluster.clone(),
                        service_name: service_name.clone(),
                        task_definition: task_definition_arn.clone(),
                        desired_count: 1,
                        network: settings.network.clone(),
                    })
                    .await?;
            }
        }

        // 4. Resolve the new task's address
        let endpoint = resolve_endpoint(
            cluster,
            &settings.service_cluster,
            &service_name,
            Some(task_definition_arn.as_str()),
            &settings.resolve,
            tokio::time::sleep,
        )
        .await?;
        info!(
            "Deployment {} is reachable at {}",
            job.deployment_id, endpoint.address
        );

        Ok(Outcome::Terminal(DomainEvent::new(
            EventType::DeploymentMetadataReceived,
            &job.project_id,
            &job.deployment_id,
            EventPayload {
                public_ip: Some(endpoint.address),
                task_definition_arn: Some(task_definition_arn),
                service_name: Some(service_name),
                image_tag: Some(job.image_tag.clone()),
                ..Default::default()
            },
        )))
    }

    async fn deploy_static(&self, job: &StaticDeploy) -> Result<Outcome, PipelineError> {
        if let Err(rejection) = job.validate() {
            return rejected(rejection);
        }

        self.await_build(job.build_task_arn.as_deref()).await?;

        let public_url = self
            .settings
            .subdomain_url(&job.subdomain)
            .unwrap_or_else(|| job.artifact_url.clone());
        info!(
            "Deployment {} published at {}",
            job.ids.deployment_id, public_url
        );

        Ok(Outcome::Terminal(DomainEvent::new(
            EventType::DeploymentMetadataReceived,
            &job.ids.project_id,
            &job.ids.deployment_id,
            EventPayload {
                artifact_url: Some(job.artifact_url.clone()),
                previous_artifact_url: job.previous_artifact_url.clone(),
                public_url: Some(public_url),
                ..Default::default()
            },
        )))
    }
}

#[async_trait]
impl Stage for DeployStage {
    fn name(&self) -> StageName {
        StageName::Deploy
    }

    fn failure_event(&self, job: &JobPayload) -> EventType {
        match job {
            JobPayload::Deploy(DeployJob::Static(_)) => EventType::FrontendBuildFailed,
            _ => EventType::BackendBuildFailed,
        }
    }

    async fn handle(&self, job: &JobPayload) -> Result<Outcome, PipelineError> {
        match job {
            JobPayload::Deploy(DeployJob::Service(job)) => self.deploy_service(job).await,
            JobPayload::Deploy(DeployJob::Static(job)) => self.deploy_static(job).await,
            other => Err(wrong_stage(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{ClusterCall, MemoryCluster};
    use crate::cluster::{NetworkInterface, RunTaskRequest, ServiceDescription};
    use chrono::Utc;
    use shipyard_domain::{EnvVar, JobIds};
    use std::time::Duration;

    fn settings() -> DeploySettings {
        DeploySettings {
            build_cluster: "builds".to_string(),
            service_cluster: "apps".to_string(),
            execution_role_arn: "arn:role/exec".to_string(),
            public_domain: "apps.example.com".to_string(),
            build_wait: RetryPolicy::new(3, Duration::from_secs(1)),
            resolve: RetryPolicy::new(20, Duration::from_secs(5)),
            ..Default::default()
        }
    }

    fn service_job() -> ServiceDeploy {
        ServiceDeploy {
            deployment_id: "d1".to_string(),
            project_id: "p1".to_string(),
            image_tag: "registry/p1:d1".to_string(),
            install_command: "npm ci".to_string(),
            start_command: "node server.js".to_string(),
            envs: Some(vec![
                EnvVar::new("port", "3000"),
                EnvVar::new("DATABASE_URL", "postgres://db"),
            ]),
            build_task_arn: None,
            subdomain: "api".to_string(),
        }
    }

    async fn running_cluster() -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster
            .insert_task(MemoryCluster::running_task("t-new", None, Some(Utc::now()), "eni-1"))
            .await;
        cluster
            .insert_interface(NetworkInterface {
                id: "eni-1".to_string(),
                public_ip: Some("54.1.2.3".to_string()),
                private_ip: None,
            })
            .await;
        cluster
            .script_service_tasks(&service_name("p1"), vec![vec![], vec!["t-new".to_string()]])
            .await;
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_deploy_creates_service() {
        let cluster = running_cluster().await;
        let stage = DeployStage::new(cluster.clone(), settings());

        let outcome = stage
            .handle(&JobPayload::Deploy(DeployJob::Service(service_job())))
            .await
            .unwrap();
        let Outcome::Terminal(event) = outcome else {
            panic!("expected terminal outcome");
        };
        assert_eq!(event.kind, EventType::DeploymentMetadataReceived);
        assert_eq!(event.payload.public_ip.as_deref(), Some("54.1.2.3"));
        assert_eq!(event.payload.service_name.as_deref(), Some("backend-service-p1"));

        let calls = cluster.calls().await;
        assert!(calls
            .iter()
            .any(|c| matches!(c, ClusterCall::CreateService { .. })));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, ClusterCall::UpdateService { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_service_is_created_again() {
        let cluster = running_cluster().await;
        cluster
            .insert_service(ServiceDescription {
                service_name: service_name("p1"),
                status: "INACTIVE".to_string(),
                task_definition: None,
            })
            .await;
        let stage = DeployStage::new(cluster.clone(), settings());

        stage
            .handle(&JobPayload::Deploy(DeployJob::Service(service_job())))
            .await
            .unwrap();
        assert!(cluster
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, ClusterCall::CreateService { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_build_stops_before_the_rollout() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_build_exit_code(2).await;
        let launched = cluster
            .run_task(&RunTaskRequest {
                cluster: "builds".to_string(),
                task_definition: "backend-builder-20".to_string(),
                container_name: "builder".to_string(),
                network: NetworkConfig::default(),
                environment: Vec::new(),
                client_token: "token".to_string(),
                started_by: "test".to_string(),
            })
            .await
            .unwrap();
        let mut job = service_job();
        job.build_task_arn = Some(launched.tasks[0].task_arn.clone());

        let stage = DeployStage::new(cluster.clone(), settings());
        let payload = JobPayload::Deploy(DeployJob::Service(job));
        let err = stage.handle(&payload).await.unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(stage.failure_event(&payload), EventType::BackendBuildFailed);
        assert!(!cluster
            .calls()
            .await
            .iter()
            .any(|c| matches!(c, ClusterCall::RegisterTaskDefinition { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_deploy_reports_urls() {
        let cluster = Arc::new(MemoryCluster::new());
        let stage = DeployStage::new(cluster.clone(), settings());
        let job = StaticDeploy {
            ids: JobIds::new("p1", "d2"),
            artifact_url: "https://cdn/p1/d2/".to_string(),
            build_task_arn: None,
            previous_artifact_url: Some("https://cdn/p1/d1/".to_string()),
            subdomain: "site".to_string(),
        };

        let outcome = stage
            .handle(&JobPayload::Deploy(DeployJob::Static(job)))
            .await
            .unwrap();
        let Outcome::Terminal(event) = outcome else {
            panic!("expected terminal outcome");
        };
        assert_eq!(event.payload.public_url.as_deref(), Some("https://site.apps.example.com"));
        assert_eq!(
            event.payload.previous_artifact_url.as_deref(),
            Some("https://cdn/p1/d1/")
        );
        assert!(cluster.calls().await.is_empty());
    }
}
