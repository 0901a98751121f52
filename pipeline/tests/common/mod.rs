#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shipyard::bus::{poller, EventBus};
use shipyard::cluster::memory::MemoryCluster;
use shipyard::deploy::source::MemorySource;
use shipyard::notify::MemoryNotifier;
use shipyard::queue::jobs::JobQueues;
use shipyard::queue::memory::MemoryQueue;
use shipyard::queue::{MessageQueue, ReceiveOptions};
use shipyard::reconcile::Reconciler;
use shipyard::retry::RetryPolicy;
use shipyard::store::memory::MemoryStore;
use shipyard::trigger::Trigger;
use shipyard::workers::backend_build::BackendBuildStage;
use shipyard::workers::clone::CloneStage;
use shipyard::workers::deploy::{DeploySettings, DeployStage};
use shipyard::workers::frontend_build::FrontendBuildStage;
use shipyard::workers::stage::{self, Processed, Stage, StageContext};
use shipyard::workers::BuildSettings;
use shipyard_domain::{
    BackendBuild, CommitInfo, DomainEvent, Domains, EnvVar, FrontendBuild, GitSource, Project,
    ProjectType,
};

pub const REPO_URL: &str = "https://github.com/acme/app.git";

pub fn receive_options() -> ReceiveOptions {
    ReceiveOptions {
        max_messages: 10,
        wait_time: Duration::ZERO,
        visibility_timeout: Duration::from_secs(60),
    }
}

pub fn frontend_project() -> Project {
    Project {
        id: "p1".to_string(),
        name: "site".to_string(),
        kind: ProjectType::Frontend,
        git: GitSource {
            repo_url: REPO_URL.to_string(),
            branch: "main".to_string(),
        },
        frontend_build: FrontendBuild {
            install_command: "npm i".to_string(),
            build_command: "npm run build".to_string(),
            out_dir: "dist".to_string(),
            version: "20".to_string(),
        },
        backend_build: Default::default(),
        envs: vec![EnvVar::new("VITE_API", "https://api.example.com")],
        entry_directory: "./".to_string(),
        domains: Domains {
            subdomain: "site".to_string(),
        },
        current_artifact_url: None,
    }
}

pub fn backend_project() -> Project {
    Project {
        id: "p2".to_string(),
        name: "api".to_string(),
        kind: ProjectType::Backend,
        git: GitSource {
            repo_url: REPO_URL.to_string(),
            branch: "main".to_string(),
        },
        frontend_build: Default::default(),
        backend_build: BackendBuild {
            install_command: "npm ci".to_string(),
            run_command: "node server.js".to_string(),
            version: "20".to_string(),
        },
        envs: vec![
            EnvVar::new("DATABASE_URL", "postgres://db"),
            EnvVar::new("PORT", "1234"),
        ],
        entry_directory: "./server".to_string(),
        domains: Domains {
            subdomain: "api".to_string(),
        },
        current_artifact_url: None,
    }
}

/// The whole pipeline wired to in-memory backends
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<MemoryCluster>,
    pub source: Arc<MemorySource>,
    pub events: Arc<MemoryQueue>,
    pub dead_letter: Arc<MemoryQueue>,
    pub notifier: Arc<MemoryNotifier>,
    pub ctx: StageContext,
    pub stages: Vec<Arc<dyn Stage>>,
    pub reconciler: Reconciler,
    pub trigger: Trigger,
    pub poller: poller::Options,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(MemoryCluster::new());
        let source = Arc::new(MemorySource::new());
        source
            .insert_repo(
                REPO_URL,
                CommitInfo {
                    hash: "abc123".to_string(),
                    message: "Initial commit".to_string(),
                },
            )
            .await;

        let events = Arc::new(MemoryQueue::new("events"));
        let dead_letter = Arc::new(MemoryQueue::new("dead-letter"));
        let jobs = JobQueues::build(&receive_options(), |stage| {
            let queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::new(stage.as_str()));
            let dead_letter: Arc<dyn MessageQueue> = dead_letter.clone();
            Ok((queue, Some(dead_letter)))
        })
        .map(Arc::new)
        .unwrap();
        let bus = EventBus::new(events.clone());

        let build = |image: &str| BuildSettings {
            cluster: "builds".to_string(),
            container_name: "builder".to_string(),
            task_definitions: BTreeMap::from([("20".to_string(), image.to_string())]),
            ..Default::default()
        };
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(CloneStage::new(source.clone())),
            Arc::new(FrontendBuildStage::new(
                cluster.clone(),
                build("frontend-builder-20"),
                "https://cdn.example.com",
            )),
            Arc::new(BackendBuildStage::new(
                cluster.clone(),
                build("backend-builder-20"),
                "registry.example.com",
            )),
            Arc::new(DeployStage::new(
                cluster.clone(),
                DeploySettings {
                    build_cluster: "builds".to_string(),
                    service_cluster: "apps".to_string(),
                    execution_role_arn: "arn:role/exec".to_string(),
                    public_domain: "apps.example.com".to_string(),
                    build_wait: RetryPolicy::new(3, Duration::from_secs(1)),
                    resolve: RetryPolicy::new(20, Duration::from_secs(5)),
                    ..Default::default()
                },
            )),
        ];

        let notifier = Arc::new(MemoryNotifier::new());
        let reconciler = Reconciler::new(store.clone(), notifier.clone());
        let trigger = Trigger::new(
            store.clone(),
            jobs.clone(),
            bus.clone(),
            PathBuf::from("/srv/shipyard"),
        );

        let poller = poller::Options {
            receive: receive_options(),
            max_receive_count: 3,
            purge_on_startup: false,
            receive_retry: RetryPolicy::new(1, Duration::from_secs(1)),
            ..Default::default()
        };

        Self {
            store: store.clone(),
            cluster,
            source,
            events,
            dead_letter,
            notifier,
            ctx: StageContext {
                jobs,
                events: bus,
                status: store,
            },
            stages,
            reconciler,
            trigger,
            poller,
        }
    }

    /// Work every visible job on every stage once, in pipeline order
    pub async fn run_stages(&self) -> Vec<Processed> {
        let mut settled = Vec::new();
        for worker in &self.stages {
            let queue = self.ctx.jobs.get(worker.name());
            while let Some(delivery) = queue.next().await.unwrap() {
                settled.push(stage::process(worker.as_ref(), &self.ctx, &delivery).await.unwrap());
            }
        }
        settled
    }

    /// Apply every visible event to the deployment records
    pub async fn reconcile(&self) -> poller::PollStats {
        poller::poll_once(
            &self.poller,
            self.events.as_ref(),
            &self.reconciler,
            tokio::time::sleep,
        )
        .await
        .unwrap()
    }

    /// Run stages and the reconciler until nothing visible is left
    pub async fn drain(&self) -> Vec<Processed> {
        let mut settled = Vec::new();
        loop {
            let processed = self.run_stages().await;
            let stats = self.reconcile().await;
            if processed.is_empty() && stats.received == 0 {
                return settled;
            }
            settled.extend(processed);
        }
    }

    /// Events still on the bus, in publish order
    pub async fn pending_events(&self) -> Vec<DomainEvent> {
        self.events
            .bodies()
            .await
            .iter()
            .map(|body| serde_json::from_str(body).unwrap())
            .collect()
    }
}
