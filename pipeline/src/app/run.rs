//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use shipyard_domain::StageName;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions, Role};
use crate::app::state::AppState;
use crate::bus::poller;
use crate::errors::ShipyardError;
use crate::notify::mqtt::{self, MqttNotifier};
use crate::notify::{NoopNotifier, StatusNotifier};
use crate::reconcile::Reconciler;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::stage;

/// Run the pipeline roles selected in `options` until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ShipyardError> {
    info!("Initializing shipyard {}...", version);

    // Refuse to start half-configured
    options.settings.validate(&options.roles)?;

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start shipyard: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    let roles: Vec<&str> = options.roles.iter().map(|r| r.as_str()).collect();
    info!("Shipyard running with roles: {}", roles.join(", "));

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ShipyardError> {
    let app_state = Arc::new(AppState::init(
        &options.settings,
        &options.event_poller.receive,
    )?);

    for role in &options.roles {
        if let Some(stage) = role.stage() {
            init_stage_worker(
                stage,
                options,
                app_state.clone(),
                shutdown_manager,
                shutdown_tx.subscribe(),
            )?;
        }
    }

    if options.runs(Role::Reconciler) {
        let notifier = init_notifier(options, shutdown_manager, shutdown_tx.subscribe())?;
        init_event_poller(
            options.event_poller.clone(),
            app_state.clone(),
            notifier,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

fn init_stage_worker(
    stage_name: StageName,
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ShipyardError> {
    info!("Initializing {} worker...", stage_name);

    let worker = app_state.stage(stage_name, &options.settings);
    let ctx = app_state.stage_context();
    let worker_options = options.stage_worker.clone();

    let handle = tokio::spawn(async move {
        stage::run(
            &worker_options,
            worker.as_ref(),
            &ctx,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_stage_worker_handle(stage_name, handle)
}

fn init_notifier(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<Arc<dyn StatusNotifier>, ShipyardError> {
    let settings = &options.settings.notifier;
    if !settings.enabled {
        info!("Status notifications disabled");
        return Ok(Arc::new(NoopNotifier));
    }

    info!(
        "Initializing MQTT notifier for {}:{}...",
        settings.broker.host, settings.broker.port
    );
    let (notifier, eventloop) = MqttNotifier::connect(&settings.broker, &settings.client_id)?;
    let mqtt_options: mqtt::Options = options.notifier.clone();

    let handle = tokio::spawn(async move {
        mqtt::drive(
            &mqtt_options,
            eventloop,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_notifier_handle(handle)?;
    Ok(Arc::new(notifier))
}

fn init_event_poller(
    options: poller::Options,
    app_state: Arc<AppState>,
    notifier: Arc<dyn StatusNotifier>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ShipyardError> {
    info!("Initializing event poller...");

    let queue = app_state.events.queue();
    let reconciler = Reconciler::new(app_state.store.clone(), notifier);

    let handle = tokio::spawn(async move {
        poller::run(
            &options,
            queue.as_ref(),
            &reconciler,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_event_poller_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ShipyardError> {
    info!("Initializing health server...");

    let server_state = ServerState::new(app_state.store.clone(), app_state.trigger.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), ShipyardError>>>,
    stage_worker_handles: Vec<(StageName, JoinHandle<()>)>,
    event_poller_handle: Option<JoinHandle<()>>,
    notifier_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            stage_worker_handles: Vec::new(),
            event_poller_handle: None,
            notifier_handle: None,
        }
    }

    pub fn with_stage_worker_handle(
        &mut self,
        stage: StageName,
        handle: JoinHandle<()>,
    ) -> Result<(), ShipyardError> {
        if self.stage_worker_handles.iter().any(|(s, _)| *s == stage) {
            return Err(ShipyardError::ShutdownError(format!(
                "{}_handle already set",
                stage
            )));
        }
        self.stage_worker_handles.push((stage, handle));
        Ok(())
    }

    pub fn with_event_poller_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), ShipyardError> {
        if self.event_poller_handle.is_some() {
            return Err(ShipyardError::ShutdownError("event_poller_handle already set".to_string()));
        }
        self.event_poller_handle = Some(handle);
        Ok(())
    }

    pub fn with_notifier_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ShipyardError> {
        if self.notifier_handle.is_some() {
            return Err(ShipyardError::ShutdownError("notifier_handle already set".to_string()));
        }
        self.notifier_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ShipyardError>>,
    ) -> Result<(), ShipyardError> {
        if self.server_handle.is_some() {
            return Err(ShipyardError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ShipyardError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ShipyardError> {
        info!("Shutting down shipyard...");

        // 1. Health server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ShipyardError::ShutdownError(e.to_string()))??;
        }

        // 2. Stage workers, each finishing the job in hand
        for (stage, handle) in self.stage_worker_handles.drain(..) {
            handle.await.map_err(|e| {
                ShipyardError::ShutdownError(format!("{} worker: {}", stage, e))
            })?;
        }

        // 3. Event poller
        if let Some(handle) = self.event_poller_handle.take() {
            handle.await.map_err(|e| ShipyardError::ShutdownError(e.to_string()))?;
        }

        // 4. Notifier, after the last status change was handed to it
        if let Some(handle) = self.notifier_handle.take() {
            handle.await.map_err(|e| ShipyardError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::options::parse_roles;
    use std::time::Duration;

    fn quiet_options(roles: &str) -> AppOptions {
        let mut options = AppOptions {
            roles: parse_roles(roles).unwrap(),
            enable_server: false,
            ..Default::default()
        };
        options.event_poller.receive.wait_time = Duration::from_millis(10);
        options
    }

    #[tokio::test]
    async fn test_runs_until_shutdown_signal() {
        let options = quiet_options("clone,reconciler");
        assert!(options.runs(Role::Reconciler));
        let result = run("test".to_string(), options, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_cluster_settings_abort_startup() {
        let options = quiet_options("deploy");
        let result = run("test".to_string(), options, async {}).await;
        assert!(matches!(result, Err(ShipyardError::ConfigError(_))));
    }
}
