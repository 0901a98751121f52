//! Task lifecycle polling
//!
//! Resolves a just-launched service task to a network address, and waits for one-off
//! build tasks to finish. Both are bounded: the scheduler may not have placed the task
//! yet, stale tasks from an earlier deployment may still be draining, and describe calls
//! may transiently come back empty.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::{ClusterApi, TaskDescription};
use crate::errors::PipelineError;
use crate::retry::{bounded, Attempt, RetryError, RetryPolicy};

/// Address of a running service task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub task_arn: String,
    pub interface_id: String,
    pub address: String,
    /// `false` when only a private address was available
    pub is_public: bool,
}

/// Most recently started task, optionally restricted to one task definition
pub fn newest_started<'a>(
    tasks: &'a [TaskDescription],
    task_definition_arn: Option<&str>,
) -> Option<&'a TaskDescription> {
    tasks
        .iter()
        .filter(|t| t.started_at.is_some())
        .filter(|t| match (task_definition_arn, t.task_definition_arn.as_deref()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        })
        .max_by_key(|t| t.started_at)
}

/// Poll the service until a started task shows up, then resolve its address
pub async fn resolve_endpoint<S, F>(
    cluster: &dyn ClusterApi,
    cluster_name: &str,
    service_name: &str,
    task_definition_arn: Option<&str>,
    policy: &RetryPolicy,
    sleep_fn: S,
) -> Result<Endpoint, PipelineError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Waiting for a started task of service {}...", service_name);

    let task = bounded(policy, sleep_fn, move |attempt| async move {
        let arns = match cluster.list_tasks(cluster_name, service_name).await {
            Ok(arns) if arns.is_empty() => return Attempt::Retry("no tasks listed".to_string()),
            Ok(arns) => arns,
            Err(e) => return Attempt::Retry(format!("list tasks failed: {}", e)),
        };

        let tasks = match cluster.describe_tasks(cluster_name, &arns).await {
            Ok(tasks) => tasks,
            Err(e) => return Attempt::Retry(format!("describe tasks failed: {}", e)),
        };

        match newest_started(&tasks, task_definition_arn) {
            Some(task) => {
                info!(
                    "Task {} of service {} started (attempt {})",
                    task.task_arn, service_name, attempt
                );
                Attempt::Done(task.clone())
            }
            None => Attempt::Retry(format!("{} task(s) listed, none started", tasks.len())),
        }
    })
    .await
    .map_err(|e: RetryError<PipelineError>| match e {
        RetryError::Exhausted {
            attempts,
            last_reason,
        } => PipelineError::ResolutionTimeout(format!(
            "service {} had no started task after {} attempts: {}",
            service_name, attempts, last_reason
        )),
        RetryError::Aborted(err) => err,
    })?;

    let interface_id = task
        .network_interface_id()
        .ok_or_else(|| {
            PipelineError::execution(format!(
                "task {} has no network interface attached",
                task.task_arn
            ))
        })?
        .to_string();

    let interface = cluster
        .describe_network_interface(&interface_id)
        .await?
        .ok_or_else(|| {
            PipelineError::execution(format!("network interface {} not found", interface_id))
        })?;

    let (address, is_public) = match (interface.public_ip, interface.private_ip) {
        (Some(ip), _) => (ip, true),
        (None, Some(ip)) => {
            warn!(
                "Network interface {} has no public address, using private address {}",
                interface_id, ip
            );
            (ip, false)
        }
        (None, None) => {
            return Err(PipelineError::execution(format!(
                "network interface {} has no address",
                interface_id
            )))
        }
    };

    Ok(Endpoint {
        task_arn: task.task_arn,
        interface_id,
        address,
        is_public,
    })
}

/// Wait for a build task to stop with exit code 0
pub async fn wait_for_build<S, F>(
    cluster: &dyn ClusterApi,
    cluster_name: &str,
    task_arn: &str,
    policy: &RetryPolicy,
    sleep_fn: S,
) -> Result<TaskDescription, PipelineError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Waiting for build task {} to finish...", task_arn);
    let arns = vec![task_arn.to_string()];
    let arns = &arns;

    bounded(policy, sleep_fn, move |_| async move {
        let task = match cluster.describe_tasks(cluster_name, arns).await {
            Ok(mut tasks) if !tasks.is_empty() => tasks.remove(0),
            Ok(_) => return Attempt::Retry("build task not visible yet".to_string()),
            Err(e) => return Attempt::Retry(format!("describe tasks failed: {}", e)),
        };

        if !task.is_stopped() {
            return Attempt::Retry(format!("build task is {}", task.last_status));
        }

        match task.exit_code {
            Some(0) => Attempt::Done(task),
            Some(code) => Attempt::Abort(PipelineError::fatal(format!(
                "build task {} exited with code {}: {}",
                task.task_arn,
                code,
                task.stopped_reason.as_deref().unwrap_or("no reason given")
            ))),
            None => Attempt::Abort(PipelineError::fatal(format!(
                "build task {} stopped without an exit code: {}",
                task.task_arn,
                task.stopped_reason.as_deref().unwrap_or("no reason given")
            ))),
        }
    })
    .await
    .map_err(|e| match e {
        RetryError::Exhausted {
            attempts,
            last_reason,
        } => PipelineError::ResolutionTimeout(format!(
            "build task {} did not finish after {} attempts: {}",
            task_arn, attempts, last_reason
        )),
        RetryError::Aborted(err) => err,
    })
}
