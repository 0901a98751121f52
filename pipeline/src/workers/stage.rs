//! Stage worker harness
//!
//! A stage is a function from a job to an outcome. The harness owns everything around it:
//! pulling deliveries, skipping deployments that already finished, keeping the delivery
//! hidden while the stage runs, catching panics, publishing events, enqueueing the next
//! stage and deciding between ack, retry and dead-letter. Exactly one failure event is
//! published per job that fails for good.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use shipyard_domain::{DomainEvent, EventType, JobPayload, JobRejection, RejectionKind, StageName};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::errors::{PipelineError, ShipyardError};
use crate::queue::jobs::{Delivery, JobQueues, NackOutcome};
use crate::store::StatusView;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// What a stage decided for one job
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Publish `events`, then hand `next` to the next stage
    Advance {
        next: JobPayload,
        events: Vec<DomainEvent>,
    },

    /// Publish the final event of the pipeline
    Terminal(DomainEvent),

    /// Nothing to do
    Skip(String),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Event published when `job` fails in execution or times out
    fn failure_event(&self, job: &JobPayload) -> EventType;

    async fn handle(&self, job: &JobPayload) -> Result<Outcome, PipelineError>;
}

/// Turn a payload rejection into the stage result
pub fn rejected(rejection: JobRejection) -> Result<Outcome, PipelineError> {
    match rejection.kind {
        RejectionKind::Skip => Ok(Outcome::Skip(rejection.reason)),
        _ => Err(rejection.into()),
    }
}

/// Error for a payload routed to the wrong stage
pub fn wrong_stage(stage: StageName, job: &JobPayload) -> PipelineError {
    PipelineError::Validation(format!("{} stage received a {} job", stage, job.stage()))
}

/// Collaborators shared by every stage harness
#[derive(Clone)]
pub struct StageContext {
    pub jobs: Arc<JobQueues>,
    pub events: EventBus,
    pub status: Arc<dyn StatusView>,
}

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Advanced,
    Completed,
    Skipped,
    /// The deployment already reached a terminal status
    AlreadyFinished,
    Retrying,
    /// Failed for good; the failure event was published
    Failed,
    /// Unreadable or misrouted; dead-lettered without an event
    Malformed,
}

/// Stage worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Cooldown after the queue itself failed
    pub error_cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            error_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }
}

/// Run a stage worker until shutdown
///
/// One job at a time. A job already being handled is finished before shutdown is
/// observed.
pub async fn run<S, F>(
    options: &Options,
    stage: &dyn Stage,
    ctx: &StageContext,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let queue = ctx.jobs.get(stage.name());
    info!("{} worker starting...", stage.name());

    let mut failures: u32 = 0;
    loop {
        let next = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("{} worker shutting down...", stage.name());
                return;
            }
            next = queue.next() => next,
        };

        let result = match next {
            Ok(Some(delivery)) => process(stage, ctx, &delivery).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(processed)) => {
                failures = 0;
                debug!("{} delivery settled: {:?}", stage.name(), processed);
            }
            Ok(None) => failures = 0,
            Err(e) => {
                let wait = calc_exp_backoff(&options.error_cooldown, failures);
                failures = failures.saturating_add(1);
                error!("{} worker error: {}, retrying in {:?}", stage.name(), e, wait);
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("{} worker shutting down...", stage.name());
                        return;
                    }
                    _ = sleep_fn(wait) => {}
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle one delivery and settle it on the queue
///
/// An `Err` means the queue or the bus failed; the delivery is left in flight and comes
/// back once its visibility timeout lapses.
pub async fn process(
    stage: &dyn Stage,
    ctx: &StageContext,
    delivery: &Delivery,
) -> Result<Processed, ShipyardError> {
    let queue = ctx.jobs.get(stage.name());

    // 1. Envelope
    let envelope = match &delivery.envelope {
        Ok(envelope) if envelope.payload.stage() == stage.name() => envelope,
        Ok(envelope) => {
            error!(
                "{} worker received a {} job {}",
                stage.name(),
                envelope.payload.stage(),
                envelope.id
            );
            queue.dead_letter(delivery).await?;
            return Ok(Processed::Malformed);
        }
        Err(e) => {
            error!(
                "Malformed {} job delivery {}: {}",
                stage.name(),
                delivery.message.message_id,
                e
            );
            queue.dead_letter(delivery).await?;
            return Ok(Processed::Malformed);
        }
    };
    let job = &envelope.payload;
    let (project_id, deployment_id) = job.ids();

    // 2. Finished deployments are never touched again
    if !deployment_id.is_empty() {
        match ctx.status.status(deployment_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                info!(
                    "Deployment {} is already {}, skipping {} job {}",
                    deployment_id,
                    status,
                    stage.name(),
                    envelope.id
                );
                queue.ack(delivery).await?;
                return Ok(Processed::AlreadyFinished);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to look up deployment {}: {}", deployment_id, e),
        }
    }

    // 3. Handle
    info!(
        "Processing {} job {} for deployment {} (attempt {})",
        stage.name(),
        envelope.id,
        deployment_id,
        delivery.attempt()
    );
    let handled = tokio::select! {
        handled = AssertUnwindSafe(stage.handle(job)).catch_unwind() => handled,
        never = queue.keep_alive(delivery) => match never {},
    };
    let result = match handled {
        Ok(result) => result,
        Err(panic) => Err(PipelineError::Unexpected(format!(
            "{} stage panicked: {}",
            stage.name(),
            panic_message(panic)
        ))),
    };

    // 4. Settle
    match result {
        Ok(Outcome::Advance { next, events }) => {
            for event in &events {
                ctx.events.publish(event).await?;
            }
            ctx.jobs.enqueue(next).await?;
            queue.ack(delivery).await?;
            Ok(Processed::Advanced)
        }
        Ok(Outcome::Terminal(event)) => {
            ctx.events.publish(&event).await?;
            queue.ack(delivery).await?;
            Ok(Processed::Completed)
        }
        Ok(Outcome::Skip(reason)) => {
            info!("Skipping {} job {}: {}", stage.name(), envelope.id, reason);
            queue.ack(delivery).await?;
            Ok(Processed::Skipped)
        }
        Err(err) if err.is_retryable() && !delivery.is_final_attempt() => {
            warn!("{} job {} failed: {}", stage.name(), envelope.id, err);
            match queue.nack(delivery).await? {
                NackOutcome::Retrying { .. } => Ok(Processed::Retrying),
                NackOutcome::DeadLettered => Ok(Processed::Failed),
            }
        }
        Err(err) => {
            error!(
                "{} job {} for deployment {} failed for good ({:?}): {}",
                stage.name(),
                envelope.id,
                deployment_id,
                err.source(),
                err
            );
            if deployment_id.is_empty() {
                warn!("Job {} carries no deployment id, no failure event published", envelope.id);
            } else {
                let event = err.to_event(stage.failure_event(job), project_id, deployment_id);
                ctx.events.publish(&event).await?;
            }
            queue.dead_letter(delivery).await?;
            Ok(Processed::Failed)
        }
    }
}
