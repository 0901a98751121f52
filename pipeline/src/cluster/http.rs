//! HTTP client for a cluster controller
//!
//! Talks JSON to a controller that fronts the scheduler API. Every request carries the
//! configured bearer token.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::cluster::{
    ClusterApi, CreateServiceRequest, NetworkInterface, RunTaskRequest, RunTaskResponse,
    ServiceDescription, TaskDefinitionRequest, TaskDescription, UpdateServiceRequest,
};
use crate::errors::ShipyardError;

pub struct HttpCluster {
    client: Client,
    base_url: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredTaskDefinition {
    task_definition_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskArns {
    #[serde(default)]
    task_arns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Tasks {
    #[serde(default)]
    tasks: Vec<TaskDescription>,
}

impl HttpCluster {
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, ShipyardError> {
        if base_url.is_empty() {
            return Err(ShipyardError::ConfigError(
                "cluster endpoint is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.client.request(method, &url).header(
            header::AUTHORIZATION,
            format!("Bearer {}", self.token.expose_secret()),
        )
    }

    /// Send and decode; `Ok(None)` on 404
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<Option<T>, ShipyardError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Cluster {} failed: {} - {}", action, status, body);
            return Err(ShipyardError::ClusterError(format!(
                "{} failed: {}: {}",
                action, status, body
            )));
        }

        let body = response.json().await?;
        Ok(Some(body))
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<T, ShipyardError> {
        self.send(request, action).await?.ok_or_else(|| {
            ShipyardError::ClusterError(format!("{} failed: resource not found", action))
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        action: &str,
    ) -> Result<T, ShipyardError> {
        let request = self.request(reqwest::Method::POST, path).json(body);
        self.send_required(request, action).await
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, ShipyardError> {
        self.post("/tasks/run", request, "RunTask").await
    }

    async fn register_task_definition(
        &self,
        request: &TaskDefinitionRequest,
    ) -> Result<String, ShipyardError> {
        let registered: RegisteredTaskDefinition = self
            .post("/task-definitions", request, "RegisterTaskDefinition")
            .await?;
        Ok(registered.task_definition_arn)
    }

    async fn describe_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<Option<ServiceDescription>, ShipyardError> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/clusters/{}/services/{}", cluster, service_name),
        );
        self.send(request, "DescribeServices").await
    }

    async fn create_service(
        &self,
        request: &CreateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError> {
        self.post(
            &format!("/clusters/{}/services", request.cluster),
            request,
            "CreateService",
        )
        .await
    }

    async fn update_service(
        &self,
        request: &UpdateServiceRequest,
    ) -> Result<ServiceDescription, ShipyardError> {
        let http_request = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/clusters/{}/services/{}",
                    request.cluster, request.service_name
                ),
            )
            .json(request);
        self.send_required(http_request, "UpdateService").await
    }

    async fn list_tasks(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<Vec<String>, ShipyardError> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/clusters/{}/services/{}/tasks", cluster, service_name),
        );
        Ok(self
            .send::<TaskArns>(request, "ListTasks")
            .await?
            .map(|t| t.task_arns)
            .unwrap_or_default())
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<TaskDescription>, ShipyardError> {
        if task_arns.is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Tasks = self
            .post(
                &format!("/clusters/{}/tasks/describe", cluster),
                &json!({ "tasks": task_arns }),
                "DescribeTasks",
            )
            .await?;
        Ok(tasks.tasks)
    }

    async fn describe_network_interface(
        &self,
        interface_id: &str,
    ) -> Result<Option<NetworkInterface>, ShipyardError> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/network-interfaces/{}", interface_id),
        );
        self.send(request, "DescribeNetworkInterfaces").await
    }
}
