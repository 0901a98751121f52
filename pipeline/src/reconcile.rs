//! Deployment status reconciler
//!
//! Consumes domain events and applies them to the deployment record, one event at a time.
//! The record only moves forward; events for unknown deployments, duplicates and events
//! arriving after a terminal status are consumed without effect.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shipyard_domain::{Deployment, DeploymentError, DeploymentStatus, DomainEvent, ErrorSource};
use tracing::{debug, error, info, warn};

use crate::bus::{EventHandler, HandleOutcome};
use crate::deploy::fsm::{DeploymentFsm, Step};
use crate::errors::ShipyardError;
use crate::notify::StatusNotifier;
use crate::store::DeploymentStore;

const UNKNOWN_ERROR: &str = "Unknown error";

pub struct Reconciler {
    store: Arc<dyn DeploymentStore>,
    notifier: Arc<dyn StatusNotifier>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DeploymentStore>, notifier: Arc<dyn StatusNotifier>) -> Self {
        Self { store, notifier }
    }
}

/// User-facing failure message
pub fn failure_message(event: &DomainEvent) -> String {
    let msg = event
        .payload
        .msg
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(UNKNOWN_ERROR);
    match event.payload.source {
        Some(ErrorSource::Internal) => format!("INTERNAL SERVER ERROR : {}", msg),
        _ => msg.to_string(),
    }
}

fn set(field: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
        *field = Some(value.clone());
    }
}

/// Copy the event's fields onto the record and move it to `status`
pub fn apply(deployment: &mut Deployment, event: &DomainEvent, status: DeploymentStatus) {
    let payload = &event.payload;

    set(&mut deployment.commit_hash, &payload.commit_hash);
    set(&mut deployment.commit_message, &payload.commit_message);
    set(&mut deployment.frontend_task_arn, &payload.frontend_task_arn);
    set(&mut deployment.backend_task_arn, &payload.backend_task_arn);
    set(&mut deployment.image_tag, &payload.image_tag);
    set(&mut deployment.artifact_url, &payload.artifact_url);
    set(&mut deployment.roll_back_artifact_url, &payload.previous_artifact_url);

    let public_url = payload.public_url.clone().or_else(|| {
        payload
            .public_ip
            .as_ref()
            .map(|ip| format!("http://{}", ip))
    });
    set(&mut deployment.public_url, &public_url);

    if status == DeploymentStatus::Failed {
        deployment.error = Some(DeploymentError {
            kind: event.kind.clone(),
            message: failure_message(event),
        });
    }
    if status.is_terminal() {
        deployment.finished_at = Some(Utc::now());
    }
    deployment.status = status;
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &DomainEvent) -> Result<HandleOutcome, ShipyardError> {
        let Some(mut deployment) = self.store.get(&event.deployment_id).await? else {
            warn!(
                "Ignoring {} for unknown deployment {}",
                event.kind, event.deployment_id
            );
            return Ok(HandleOutcome::Ignored);
        };
        if deployment.project_id != event.project_id {
            warn!(
                "Ignoring {} for deployment {}: project {} does not own it",
                event.kind, event.deployment_id, event.project_id
            );
            return Ok(HandleOutcome::Ignored);
        }

        let previous = deployment.status;
        let mut fsm = DeploymentFsm::new(previous);
        let next = match fsm.process(&event.kind) {
            Step::Apply(next) => next,
            Step::NoOp => {
                debug!(
                    "{} is a no-op for deployment {} ({})",
                    event.kind, deployment.id, previous
                );
                return Ok(HandleOutcome::Ignored);
            }
            Step::Deferred => {
                info!(
                    "Deferring {} for deployment {} until it is building",
                    event.kind, deployment.id
                );
                return Ok(HandleOutcome::Deferred);
            }
        };

        apply(&mut deployment, event, next);
        self.store.put(&deployment).await?;

        if next != previous {
            info!(
                "Deployment {} of project {}: {} -> {} ({})",
                deployment.id, deployment.project_id, previous, next, event.kind
            );
            if let Err(e) = self.notifier.notify(&deployment).await {
                error!("Failed to notify status of deployment {}: {}", deployment.id, e);
            }
        }
        Ok(HandleOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::store::memory::MemoryStore;
    use shipyard_domain::{EventPayload, EventType};

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<MemoryNotifier>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let reconciler = Reconciler::new(store.clone(), notifier.clone());
        Fixture {
            store,
            notifier,
            reconciler,
        }
    }

    fn event(kind: EventType, deployment: &Deployment, payload: EventPayload) -> DomainEvent {
        DomainEvent::new(kind, &deployment.project_id, &deployment.id, payload)
    }

    #[tokio::test]
    async fn test_backend_happy_path() {
        let fx = fixture();
        let deployment = fx.store.create("p1", "u1").await.unwrap();

        let building = event(
            EventType::BackendBuilding,
            &deployment,
            EventPayload {
                commit_hash: Some("abc123".to_string()),
                ..Default::default()
            },
        );
        let metadata = event(
            EventType::DeploymentMetadataReceived,
            &deployment,
            EventPayload {
                public_ip: Some("54.1.2.3".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(fx.reconciler.handle(&building).await.unwrap(), HandleOutcome::Applied);
        assert_eq!(fx.reconciler.handle(&metadata).await.unwrap(), HandleOutcome::Applied);

        let stored = fx.store.get(&deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Deployed);
        assert_eq!(stored.commit_hash.as_deref(), Some("abc123"));
        assert_eq!(stored.public_url.as_deref(), Some("http://54.1.2.3"));
        assert!(stored.finished_at.is_some());

        let sent: Vec<_> = fx.notifier.sent().await.iter().map(|d| d.status).collect();
        assert_eq!(sent, vec![DeploymentStatus::Building, DeploymentStatus::Deployed]);
    }

    #[tokio::test]
    async fn test_duplicate_success_is_a_no_op() {
        let fx = fixture();
        let deployment = fx.store.create("p1", "u1").await.unwrap();
        let building = event(EventType::FrontendBuildQueued, &deployment, EventPayload::default());
        let metadata = event(
            EventType::DeploymentMetadataReceived,
            &deployment,
            EventPayload {
                public_url: Some("https://site.example.com".to_string()),
                ..Default::default()
            },
        );

        fx.reconciler.handle(&building).await.unwrap();
        fx.reconciler.handle(&metadata).await.unwrap();
        let first = fx.store.get(&deployment.id).await.unwrap().unwrap();

        assert_eq!(fx.reconciler.handle(&metadata).await.unwrap(), HandleOutcome::Ignored);
        assert_eq!(fx.store.get(&deployment.id).await.unwrap().unwrap(), first);
        assert_eq!(fx.notifier.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_messages() {
        let fx = fixture();
        let internal = fx.store.create("p1", "u1").await.unwrap();
        let build = fx.store.create("p1", "u1").await.unwrap();

        fx.reconciler
            .handle(&event(
                EventType::InternalError,
                &internal,
                EventPayload::failure("startCommand missing", ErrorSource::Internal),
            ))
            .await
            .unwrap();
        fx.reconciler
            .handle(&event(
                EventType::BackendBuildFailed,
                &build,
                EventPayload::failure("exit code 1", ErrorSource::Build),
            ))
            .await
            .unwrap();

        let internal = fx.store.get(&internal.id).await.unwrap().unwrap();
        let error = internal.error.unwrap();
        assert_eq!(error.kind, EventType::InternalError);
        assert_eq!(error.message, "INTERNAL SERVER ERROR : startCommand missing");

        let build = fx.store.get(&build.id).await.unwrap().unwrap();
        assert_eq!(build.status, DeploymentStatus::Failed);
        assert_eq!(build.error.unwrap().message, "exit code 1");
        assert!(build.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_is_absorbing() {
        let fx = fixture();
        let deployment = fx.store.create("p1", "u1").await.unwrap();
        fx.reconciler
            .handle(&event(EventType::FrontendBuildFailed, &deployment, EventPayload::default()))
            .await
            .unwrap();

        for kind in [
            EventType::FrontendBuildQueued,
            EventType::DeploymentMetadataReceived,
            EventType::InternalError,
        ] {
            fx.reconciler
                .handle(&event(kind, &deployment, EventPayload::default()))
                .await
                .unwrap();
        }

        let stored = fx.store.get(&deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert_eq!(stored.error.unwrap().message, UNKNOWN_ERROR);
    }

    #[tokio::test]
    async fn test_early_metadata_is_deferred() {
        let fx = fixture();
        let deployment = fx.store.create("p1", "u1").await.unwrap();
        let metadata = event(
            EventType::DeploymentMetadataReceived,
            &deployment,
            EventPayload::default(),
        );

        assert_eq!(fx.reconciler.handle(&metadata).await.unwrap(), HandleOutcome::Deferred);
        let stored = fx.store.get(&deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Queued);
    }

    #[tokio::test]
    async fn test_foreign_and_unknown_deployments_are_ignored() {
        let fx = fixture();
        let deployment = fx.store.create("p1", "u1").await.unwrap();
        let foreign = DomainEvent::new(
            EventType::InternalError,
            "p2",
            &deployment.id,
            EventPayload::default(),
        );
        let unknown =
            DomainEvent::new(EventType::InternalError, "p1", "nope", EventPayload::default());

        assert_eq!(fx.reconciler.handle(&foreign).await.unwrap(), HandleOutcome::Ignored);
        assert_eq!(fx.reconciler.handle(&unknown).await.unwrap(), HandleOutcome::Ignored);
        let stored = fx.store.get(&deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Queued);
    }
}
