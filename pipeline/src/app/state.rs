//! Application state
//!
//! Builds the backends the settings select and the stages that run on them.

use std::sync::Arc;

use secrecy::SecretString;
use shipyard_domain::StageName;
use tracing::info;

use crate::bus::EventBus;
use crate::cluster::http::HttpCluster;
use crate::cluster::memory::MemoryCluster;
use crate::cluster::ClusterApi;
use crate::deploy::git::GitFetcher;
use crate::deploy::source::SourceFetcher;
use crate::errors::ShipyardError;
use crate::filesys::dir::Dir;
use crate::queue::jobs::JobQueues;
use crate::queue::memory::MemoryQueue;
use crate::queue::sqs::SqsQueue;
use crate::queue::{MessageQueue, ReceiveOptions};
use crate::storage::settings::{ClusterBackend, QueueBackend, Settings, StoreBackend};
use crate::store::file::FileStore;
use crate::store::memory::MemoryStore;
use crate::store::{DeploymentStore, StatusView};
use crate::trigger::Trigger;
use crate::workers::backend_build::BackendBuildStage;
use crate::workers::clone::CloneStage;
use crate::workers::deploy::{DeploySettings, DeployStage};
use crate::workers::frontend_build::FrontendBuildStage;
use crate::workers::stage::{Stage, StageContext};
use crate::workers::BuildSettings;

/// Shared handles of a running process
pub struct AppState {
    pub store: Arc<dyn DeploymentStore>,
    pub status: Arc<dyn StatusView>,
    pub jobs: Arc<JobQueues>,
    pub events: EventBus,
    pub cluster: Arc<dyn ClusterApi>,
    pub source: Arc<dyn SourceFetcher>,
    pub trigger: Arc<Trigger>,
}

impl AppState {
    /// Initialize application state
    pub fn init(settings: &Settings, receive: &ReceiveOptions) -> Result<Self, ShipyardError> {
        info!("Initializing application state...");

        let (store, status) = init_store(settings);
        let (jobs, events) = init_queues(settings, receive)?;
        let cluster = init_cluster(settings)?;
        let source: Arc<dyn SourceFetcher> =
            Arc::new(GitFetcher::new(&settings.workspace.git_bin));

        let trigger = Arc::new(Trigger::new(
            store.clone(),
            jobs.clone(),
            events.clone(),
            settings.workspace.root.clone(),
        ));

        Ok(Self {
            store,
            status,
            jobs,
            events,
            cluster,
            source,
            trigger,
        })
    }

    pub fn stage_context(&self) -> StageContext {
        StageContext {
            jobs: self.jobs.clone(),
            events: self.events.clone(),
            status: self.status.clone(),
        }
    }

    /// The worker of `stage`, wired to this state's backends
    pub fn stage(&self, stage: StageName, settings: &Settings) -> Arc<dyn Stage> {
        let network = settings.cluster.network();
        match stage {
            StageName::Clone => Arc::new(CloneStage::new(self.source.clone())),
            StageName::FrontendBuild => Arc::new(FrontendBuildStage::new(
                self.cluster.clone(),
                BuildSettings {
                    cluster: settings.cluster.name.clone(),
                    network,
                    container_name: settings.build.container_name.clone(),
                    task_definitions: settings.build.frontend_task_definitions.clone(),
                },
                &settings.build.artifact_base_url,
            )),
            StageName::BackendBuild => Arc::new(BackendBuildStage::new(
                self.cluster.clone(),
                BuildSettings {
                    cluster: settings.cluster.name.clone(),
                    network,
                    container_name: settings.build.container_name.clone(),
                    task_definitions: settings.build.backend_task_definitions.clone(),
                },
                &settings.build.registry,
            )),
            StageName::Deploy => Arc::new(DeployStage::new(
                self.cluster.clone(),
                DeploySettings {
                    build_cluster: settings.cluster.name.clone(),
                    service_cluster: settings.cluster.service_cluster().to_string(),
                    network,
                    execution_role_arn: settings.cluster.execution_role_arn.clone(),
                    cpu: settings.deploy.cpu.clone(),
                    memory: settings.deploy.memory.clone(),
                    container_port: settings.deploy.container_port,
                    log_group: settings.deploy.log_group.clone(),
                    public_domain: settings.deploy.public_domain.clone(),
                    ..Default::default()
                },
            )),
        }
    }
}

fn init_store(settings: &Settings) -> (Arc<dyn DeploymentStore>, Arc<dyn StatusView>) {
    match settings.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn DeploymentStore>, store as Arc<dyn StatusView>)
        }
        StoreBackend::File => {
            info!("Deployment records in {}", settings.store.dir.display());
            let store = Arc::new(FileStore::new(Dir::new(settings.store.dir.clone())));
            (store.clone() as Arc<dyn DeploymentStore>, store as Arc<dyn StatusView>)
        }
    }
}

fn init_queues(
    settings: &Settings,
    receive: &ReceiveOptions,
) -> Result<(Arc<JobQueues>, EventBus), ShipyardError> {
    match settings.queue.backend {
        QueueBackend::Memory => {
            let dead_letter: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new("dead-letter"));
            let jobs = JobQueues::build(receive, |stage| {
                let queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new(stage.as_str()));
                Ok((queue, Some(dead_letter.clone())))
            })?;
            let events = EventBus::new(Arc::new(MemoryQueue::new("events")));
            Ok((Arc::new(jobs), events))
        }
        QueueBackend::Sqs => {
            let endpoint = settings.queue.sqs_endpoint();
            let dead_letter: Option<Arc<dyn MessageQueue>> = match &settings.queue.dead_letter_url {
                Some(url) if !url.is_empty() => Some(Arc::new(SqsQueue::new(&endpoint, url)?)),
                _ => None,
            };
            let jobs = JobQueues::build(receive, |stage| {
                let queue: Arc<dyn MessageQueue> =
                    Arc::new(SqsQueue::new(&endpoint, settings.queue.stages.get(stage))?);
                Ok((queue, dead_letter.clone()))
            })?;

            let events = EventBus::new(Arc::new(SqsQueue::new(
                &endpoint,
                &settings.queue.event_queue_url,
            )?));
            Ok((Arc::new(jobs), events))
        }
    }
}

fn init_cluster(settings: &Settings) -> Result<Arc<dyn ClusterApi>, ShipyardError> {
    match settings.cluster.backend {
        ClusterBackend::Memory => Ok(Arc::new(MemoryCluster::new())),
        ClusterBackend::Http => {
            let token = settings
                .cluster
                .api_token
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new()));
            Ok(Arc::new(HttpCluster::new(&settings.cluster.endpoint, token)?))
        }
    }
}
