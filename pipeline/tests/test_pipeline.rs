mod common;

use std::time::Duration;

use chrono::Utc;
use common::{backend_project, frontend_project, Harness, REPO_URL};
use shipyard::cluster::memory::{ClusterCall, MemoryCluster};
use shipyard::cluster::{NetworkInterface, ServiceDescription};
use shipyard::store::DeploymentStore;
use shipyard::workers::deploy::service_name;
use shipyard::workers::stage::Processed;
use shipyard_domain::{
    DeployJob, DeploymentStatus, ErrorSource, EventType, FrontendBuild, FrontendBuildJob, JobIds,
    JobPayload, ServiceDeploy,
};

#[tokio::test]
async fn test_frontend_build_job_is_queued_once() {
    let h = Harness::new().await;
    h.ctx
        .jobs
        .enqueue(JobPayload::FrontendBuild(FrontendBuildJob {
            ids: JobIds::new("p1", "d1"),
            repo_url: REPO_URL.to_string(),
            frontend_dir_path: "/srv/shipyard/p1/d1".to_string(),
            build: FrontendBuild {
                install_command: "npm i".to_string(),
                build_command: "npm run build".to_string(),
                out_dir: "dist".to_string(),
                version: "20".to_string(),
            },
            ..Default::default()
        }))
        .await
        .unwrap();

    let settled = h.run_stages().await;
    assert_eq!(settled, vec![Processed::Advanced, Processed::Completed]);

    let events = h.pending_events().await;
    let queued: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventType::FrontendBuildQueued)
        .collect();
    assert_eq!(queued.len(), 1);
    assert!(queued[0]
        .payload
        .frontend_task_arn
        .as_deref()
        .is_some_and(|arn| !arn.is_empty()));
    assert!(!events.iter().any(|e| e.kind == EventType::FrontendBuildFailed));
}

#[tokio::test]
async fn test_frontend_deployment_end_to_end() {
    let h = Harness::new().await;
    let deployment = h
        .trigger
        .deploy(&frontend_project(), "u1", Some("ghp_token"))
        .await
        .unwrap();

    h.drain().await;

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Deployed);
    assert_eq!(record.commit_hash.as_deref(), Some("abc123"));
    assert_eq!(
        record.artifact_url,
        Some(format!("https://cdn.example.com/p1/{}/", deployment.id))
    );
    assert_eq!(record.public_url.as_deref(), Some("https://site.apps.example.com"));
    assert!(record.frontend_task_arn.is_some());
    assert!(record.finished_at.is_some());
    assert!(record.error.is_none());

    let statuses: Vec<_> = h.notifier.sent().await.iter().map(|d| d.status).collect();
    assert_eq!(statuses, vec![DeploymentStatus::Building, DeploymentStatus::Deployed]);

    let fetches = h.source.calls().await;
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].branch, "main");
}

#[tokio::test(start_paused = true)]
async fn test_existing_service_is_updated_never_created() {
    let h = Harness::new().await;
    let service = service_name("p2");
    h.cluster
        .insert_service(ServiceDescription {
            service_name: service.clone(),
            status: "ACTIVE".to_string(),
            task_definition: Some("arn:memory:task-definition/backend-p2:7".to_string()),
        })
        .await;
    h.cluster
        .insert_task(MemoryCluster::running_task("t-new", None, Some(Utc::now()), "eni-1"))
        .await;
    h.cluster
        .insert_interface(NetworkInterface {
            id: "eni-1".to_string(),
            public_ip: Some("54.1.2.3".to_string()),
            private_ip: None,
        })
        .await;
    h.cluster
        .script_service_tasks(&service, vec![vec![], vec!["t-new".to_string()]])
        .await;

    let deployment = h.trigger.deploy(&backend_project(), "u1", None).await.unwrap();
    h.drain().await;

    let calls = h.cluster.calls().await;
    assert!(calls.iter().any(|c| matches!(
        c,
        ClusterCall::UpdateService { service_name, force: true, .. } if *service_name == service
    )));
    assert!(!calls
        .iter()
        .any(|c| matches!(c, ClusterCall::CreateService { .. })));

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Deployed);
    assert_eq!(record.public_url.as_deref(), Some("http://54.1.2.3"));
    assert_eq!(
        record.image_tag,
        Some(format!("registry.example.com/p2:{}", deployment.id))
    );
    assert!(record.backend_task_arn.is_some());
}

#[tokio::test]
async fn test_deploy_without_start_command_fails_before_the_cluster() {
    let h = Harness::new().await;
    h.ctx
        .jobs
        .enqueue(JobPayload::Deploy(DeployJob::Service(ServiceDeploy {
            deployment_id: "d1".to_string(),
            project_id: "p1".to_string(),
            image_tag: "registry.example.com/p1:d1".to_string(),
            install_command: "npm ci".to_string(),
            start_command: String::new(),
            envs: Some(vec![]),
            build_task_arn: None,
            subdomain: "api".to_string(),
        })))
        .await
        .unwrap();

    let settled = h.run_stages().await;
    assert_eq!(settled, vec![Processed::Failed]);

    let events = h.pending_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventType::InternalError);
    assert_eq!(events[0].deployment_id, "d1");
    assert_eq!(events[0].payload.msg.as_deref(), Some("startCommand missing"));
    assert_eq!(events[0].payload.source, Some(ErrorSource::Database));

    assert!(h.cluster.calls().await.is_empty());
    assert_eq!(h.dead_letter.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_launch_failures_are_retried_then_fail_the_deployment() {
    let h = Harness::new().await;
    h.cluster.fail_launches("RESOURCE:MEMORY").await;
    let deployment = h.trigger.deploy(&frontend_project(), "u1", None).await.unwrap();

    let first = h.drain().await;
    assert!(first.contains(&Processed::Retrying));
    assert_eq!(
        h.store.get(&deployment.id).await.unwrap().unwrap().status,
        DeploymentStatus::Queued
    );

    tokio::time::advance(Duration::from_secs(60)).await;
    let second = h.drain().await;
    assert_eq!(second, vec![Processed::Failed]);

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    let error = record.error.unwrap();
    assert_eq!(error.kind, EventType::FrontendBuildFailed);
    assert_eq!(error.message, "frontend build launch failed: RESOURCE:MEMORY");

    let launches = h
        .cluster
        .calls()
        .await
        .iter()
        .filter(|c| matches!(c, ClusterCall::RunTask { .. }))
        .count();
    assert_eq!(launches, 2);
    assert_eq!(h.dead_letter.len().await, 1);
}

#[tokio::test]
async fn test_unknown_repository_fails_with_internal_error() {
    let h = Harness::new().await;
    let mut project = frontend_project();
    project.git.repo_url = "https://github.com/acme/missing.git".to_string();
    let deployment = h.trigger.deploy(&project, "u1", None).await.unwrap();

    h.drain().await;

    let record = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    let error = record.error.unwrap();
    assert_eq!(error.kind, EventType::InternalError);
    assert!(h.cluster.calls().await.is_empty());
}
