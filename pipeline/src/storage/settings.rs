//! Settings file management
//!
//! Settings are read from a JSON file, every field defaulted, then overridden by
//! `SHIPYARD_*` environment variables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use shipyard_domain::StageName;

use crate::app::options::Role;
use crate::cluster::NetworkConfig;
use crate::errors::ShipyardError;
use crate::logs::{LogLevel, LogOptions};
use crate::notify::mqtt::MqttAddress;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/shipyard/settings.json";

/// Pipeline settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub workspace: WorkspaceSettings,

    #[serde(default)]
    pub notifier: NotifierSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn to_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.level.clone(),
            json_format: self.json,
            log_dir: self.dir.clone(),
            ..Default::default()
        }
    }
}

/// Which implementation backs a component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Sqs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    #[default]
    Memory,
    Http,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

/// Queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub backend: QueueBackend,

    /// SQS endpoint; derived from the region when empty
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub region: String,

    /// Queue URL per stage
    #[serde(default)]
    pub stages: StageQueueUrls,

    #[serde(default)]
    pub dead_letter_url: Option<String>,

    #[serde(default)]
    pub event_queue_url: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Deliveries after which an event nobody can apply is dropped
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    #[serde(default = "default_true")]
    pub purge_events_on_startup: bool,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u32 {
    5
}

fn default_wait_time_secs() -> u64 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_max_receive_count() -> u32 {
    10
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            endpoint: String::new(),
            region: String::new(),
            stages: StageQueueUrls::default(),
            dead_letter_url: None,
            event_queue_url: String::new(),
            batch_size: default_batch_size(),
            wait_time_secs: default_wait_time_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
            purge_events_on_startup: true,
        }
    }
}

impl QueueSettings {
    pub fn sqs_endpoint(&self) -> String {
        if !self.endpoint.is_empty() || self.region.is_empty() {
            return self.endpoint.clone();
        }
        format!("https://sqs.{}.amazonaws.com", self.region)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageQueueUrls {
    pub clone: String,
    pub frontend_build: String,
    pub backend_build: String,
    pub deploy: String,
}

impl StageQueueUrls {
    pub fn get(&self, stage: StageName) -> &str {
        match stage {
            StageName::Clone => &self.clone,
            StageName::FrontendBuild => &self.frontend_build,
            StageName::BackendBuild => &self.backend_build,
            StageName::Deploy => &self.deploy,
        }
    }
}

/// Cluster settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    #[serde(default)]
    pub backend: ClusterBackend,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub api_token: Option<SecretString>,

    /// Cluster build tasks run on
    #[serde(default)]
    pub name: String,

    /// Cluster services run on; the build cluster when empty
    #[serde(default)]
    pub service_cluster: String,

    #[serde(default)]
    pub subnets: Vec<String>,

    #[serde(default)]
    pub security_groups: Vec<String>,

    #[serde(default = "default_true")]
    pub assign_public_ip: bool,

    #[serde(default)]
    pub execution_role_arn: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::default(),
            endpoint: String::new(),
            api_token: None,
            name: String::new(),
            service_cluster: String::new(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            assign_public_ip: true,
            execution_role_arn: String::new(),
        }
    }
}

impl ClusterSettings {
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            subnets: self.subnets.clone(),
            security_groups: self.security_groups.clone(),
            assign_public_ip: self.assign_public_ip,
        }
    }

    pub fn service_cluster(&self) -> &str {
        if self.service_cluster.is_empty() {
            &self.name
        } else {
            &self.service_cluster
        }
    }
}

/// Build task images
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    /// Container receiving the build environment
    #[serde(default = "default_build_container")]
    pub container_name: String,

    /// Frontend build task definition per runtime version
    #[serde(default)]
    pub frontend_task_definitions: BTreeMap<String, String>,

    /// Backend build task definition per runtime version
    #[serde(default)]
    pub backend_task_definitions: BTreeMap<String, String>,

    /// Registry backend images are pushed to
    #[serde(default)]
    pub registry: String,

    /// Base URL frontend artifacts are published under
    #[serde(default)]
    pub artifact_base_url: String,
}

fn default_build_container() -> String {
    "builder".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            container_name: default_build_container(),
            frontend_task_definitions: BTreeMap::new(),
            backend_task_definitions: BTreeMap::new(),
            registry: String::new(),
            artifact_base_url: String::new(),
        }
    }
}

/// Service shape and public routing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySettings {
    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default = "default_log_group")]
    pub log_group: String,

    #[serde(default)]
    pub public_domain: String,
}

fn default_cpu() -> String {
    "256".to_string()
}

fn default_memory() -> String {
    "512".to_string()
}

fn default_container_port() -> u16 {
    80
}

fn default_log_group() -> String {
    "/ecs/backend".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            container_port: default_container_port(),
            log_group: default_log_group(),
            public_domain: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/shipyard/deployments")
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: default_store_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSettings {
    /// Root clones are checked out under
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,

    #[serde(default = "default_git_bin")]
    pub git_bin: String,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/var/lib/shipyard/workspace")
}

fn default_git_bin() -> String {
    "git".to_string()
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            git_bin: default_git_bin(),
        }
    }
}

/// Status notifier settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub broker: MqttAddress,

    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "shipyard-reconciler".to_string()
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: MqttAddress::default(),
            client_id: default_client_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Override fields from `SHIPYARD_*` variables found by `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ShipyardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(level) = var("SHIPYARD_LOG_LEVEL") {
            self.log.level = level.parse().map_err(ShipyardError::ConfigError)?;
        }
        if let Some(endpoint) = var("SHIPYARD_QUEUE_ENDPOINT") {
            self.queue.endpoint = endpoint;
        }
        if let Some(url) = var("SHIPYARD_EVENT_QUEUE_URL") {
            self.queue.event_queue_url = url;
        }
        if let Some(region) = var("SHIPYARD_REGION") {
            self.queue.region = region;
        }
        if let Some(cluster) = var("SHIPYARD_CLUSTER") {
            self.cluster.name = cluster;
        }
        if let Some(cluster) = var("SHIPYARD_SERVICE_CLUSTER") {
            self.cluster.service_cluster = cluster;
        }
        if let Some(endpoint) = var("SHIPYARD_CLUSTER_ENDPOINT") {
            self.cluster.endpoint = endpoint;
        }
        if let Some(token) = var("SHIPYARD_CLUSTER_TOKEN") {
            self.cluster.api_token = Some(SecretString::from(token));
        }
        if let Some(subnets) = var("SHIPYARD_SUBNETS") {
            self.cluster.subnets = split_list(&subnets);
        }
        if let Some(groups) = var("SHIPYARD_SECURITY_GROUPS") {
            self.cluster.security_groups = split_list(&groups);
        }
        if let Some(role) = var("SHIPYARD_EXECUTION_ROLE_ARN") {
            self.cluster.execution_role_arn = role;
        }
        if let Some(registry) = var("SHIPYARD_REGISTRY") {
            self.build.registry = registry;
        }
        if let Some(url) = var("SHIPYARD_ARTIFACT_BASE_URL") {
            self.build.artifact_base_url = url;
        }
        if let Some(domain) = var("SHIPYARD_PUBLIC_DOMAIN") {
            self.deploy.public_domain = domain;
        }
        Ok(())
    }

    /// Check that everything `roles` needs is configured
    pub fn validate(&self, roles: &BTreeSet<Role>) -> Result<(), ShipyardError> {
        let mut missing = Vec::new();

        if roles.iter().any(Role::uses_cluster) {
            if self.cluster.name.is_empty() {
                missing.push("cluster.name");
            }
            if self.cluster.subnets.is_empty() {
                missing.push("cluster.subnets");
            }
            if self.cluster.security_groups.is_empty() {
                missing.push("cluster.security_groups");
            }
            if self.cluster.backend == ClusterBackend::Http && self.cluster.endpoint.is_empty() {
                missing.push("cluster.endpoint");
            }
        }
        if roles.contains(&Role::Deploy) && self.cluster.execution_role_arn.is_empty() {
            missing.push("cluster.execution_role_arn");
        }
        if roles.contains(&Role::FrontendBuild) && self.build.artifact_base_url.is_empty() {
            missing.push("build.artifactBaseUrl");
        }
        if roles.contains(&Role::BackendBuild) && self.build.registry.is_empty() {
            missing.push("build.registry");
        }

        if self.queue.backend == QueueBackend::Sqs {
            if self.queue.sqs_endpoint().is_empty() {
                missing.push("queue.endpoint");
            }
            if self.queue.event_queue_url.is_empty() {
                missing.push("queue.event_queue_url");
            }
            // Producers need the next stage's queue too, so every stage queue is required
            for (stage, field) in [
                (StageName::Clone, "queue.stages.clone"),
                (StageName::FrontendBuild, "queue.stages.frontendBuild"),
                (StageName::BackendBuild, "queue.stages.backendBuild"),
                (StageName::Deploy, "queue.stages.deploy"),
            ] {
                if self.queue.stages.get(stage).is_empty() {
                    missing.push(field);
                }
            }
        }

        if roles.contains(&Role::Reconciler)
            && self.notifier.enabled
            && self.notifier.broker.host.is_empty()
        {
            missing.push("notifier.broker.host");
        }

        if missing.is_empty() {
            return Ok(());
        }
        Err(ShipyardError::ConfigError(format!(
            "missing settings: {}",
            missing.join(", ")
        )))
    }
}
