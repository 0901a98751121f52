//! Per-stage job queues
//!
//! Jobs travel inside a `JobEnvelope`. The attempt number of a delivery is the message's
//! receive count, so redeliveries after a crash count against the attempt cap the same
//! way explicit retries do.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipyard_domain::{JobPayload, StageName};
use tracing::{debug, error, info, warn};

use crate::errors::ShipyardError;
use crate::queue::{MessageQueue, ReceiveOptions, ReceivedMessage};
use crate::utils::{calc_exp_backoff, generate_uuid, CooldownOptions};

/// Backoff applied between attempts of a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    Fixed {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
}

impl BackoffPolicy {
    /// Ceiling for any single backoff delay
    pub const MAX_DELAY: Duration = Duration::from_secs(15 * 60);

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay_ms } => {
                Duration::from_millis(*delay_ms).min(Self::MAX_DELAY)
            }
            BackoffPolicy::Exponential { delay_ms } => calc_exp_backoff(
                &CooldownOptions {
                    base_delay: Duration::from_millis(*delay_ms),
                    max_delay: Self::MAX_DELAY,
                    multiplier: 2.0,
                },
                attempt.saturating_sub(1),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total deliveries allowed, the first one included
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl JobOptions {
    /// Attempt caps by stage criticality
    pub fn for_stage(stage: StageName) -> Self {
        let attempts = match stage {
            StageName::Clone => 1,
            StageName::FrontendBuild => 2,
            StageName::BackendBuild => 3,
            StageName::Deploy => 3,
        };
        Self {
            attempts,
            backoff: BackoffPolicy::Exponential { delay_ms: 5_000 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: String,
    pub stage: StageName,
    pub options: JobOptions,
    pub enqueued_at: DateTime<Utc>,
    pub payload: JobPayload,
}

/// One delivery of a job
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: ReceivedMessage,

    /// Parsed envelope, or the parse error for a malformed body
    pub envelope: Result<JobEnvelope, String>,
}

impl Delivery {
    /// 1-based attempt number of this delivery
    pub fn attempt(&self) -> u32 {
        self.message.receive_count.max(1)
    }

    fn max_attempts(&self) -> u32 {
        self.envelope
            .as_ref()
            .map(|e| e.options.attempts.max(1))
            .unwrap_or(1)
    }

    /// Whether a nack of this delivery would dead-letter it
    pub fn is_final_attempt(&self) -> bool {
        self.attempt() >= self.max_attempts()
    }
}

/// What `nack` did with a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Retrying { attempt: u32, delay: Duration },
    DeadLettered,
}

/// Job queue of a single stage
pub struct JobQueue {
    stage: StageName,
    queue: Arc<dyn MessageQueue>,
    dead_letter: Option<Arc<dyn MessageQueue>>,
    receive: ReceiveOptions,
}

impl JobQueue {
    pub fn new(
        stage: StageName,
        queue: Arc<dyn MessageQueue>,
        dead_letter: Option<Arc<dyn MessageQueue>>,
        receive: ReceiveOptions,
    ) -> Self {
        Self {
            stage,
            queue,
            dead_letter,
            receive: ReceiveOptions {
                max_messages: 1,
                ..receive
            },
        }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    pub async fn enqueue(
        &self,
        payload: JobPayload,
        options: JobOptions,
    ) -> Result<String, ShipyardError> {
        if payload.stage() != self.stage {
            return Err(ShipyardError::QueueError(format!(
                "{} job cannot be enqueued on the {} queue",
                payload.stage(),
                self.stage
            )));
        }

        let envelope = JobEnvelope {
            id: generate_uuid(),
            stage: self.stage,
            options,
            enqueued_at: Utc::now(),
            payload,
        };
        let body = serde_json::to_string(&envelope)?;
        self.queue.send(&body, Duration::ZERO).await?;

        let (project_id, deployment_id) = envelope.payload.ids();
        info!(
            "Enqueued {} job {} for deployment {} of project {}",
            self.stage, envelope.id, deployment_id, project_id
        );
        Ok(envelope.id)
    }

    /// Next delivery, waiting up to the receive wait time
    pub async fn next(&self) -> Result<Option<Delivery>, ShipyardError> {
        let mut messages = self.queue.receive(&self.receive).await?;
        let Some(message) = messages.pop() else {
            return Ok(None);
        };

        let envelope =
            serde_json::from_str::<JobEnvelope>(&message.body).map_err(|e| e.to_string());
        debug!(
            "Received {} job delivery {} (attempt {})",
            self.stage, message.message_id, message.receive_count
        );
        Ok(Some(Delivery { message, envelope }))
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<(), ShipyardError> {
        self.queue.delete(&delivery.message.receipt_handle).await
    }

    /// Keep `delivery` hidden from other consumers while its job runs
    ///
    /// Every half visibility timeout the message is re-hidden for a full one. Never
    /// completes; drop the future once the delivery is settled.
    pub async fn keep_alive(&self, delivery: &Delivery) -> Infallible {
        let timeout = self.receive.visibility_timeout;
        let interval = (timeout / 2).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(interval).await;
            match self
                .queue
                .change_visibility(&delivery.message.receipt_handle, timeout)
                .await
            {
                Ok(()) => debug!(
                    "Extended {} job delivery {} by {:?}",
                    self.stage, delivery.message.message_id, timeout
                ),
                Err(e) => warn!(
                    "Failed to extend {} job delivery {}: {}",
                    self.stage, delivery.message.message_id, e
                ),
            }
        }
    }

    /// Retry per the job's backoff, or dead-letter once attempts are exhausted
    pub async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, ShipyardError> {
        let envelope = match &delivery.envelope {
            Ok(envelope) if !delivery.is_final_attempt() => envelope,
            _ => {
                self.dead_letter(delivery).await?;
                return Ok(NackOutcome::DeadLettered);
            }
        };

        let attempt = delivery.attempt();
        let delay = envelope.options.backoff.delay(attempt);
        self.queue
            .change_visibility(&delivery.message.receipt_handle, delay)
            .await?;
        warn!(
            "Retrying {} job {} in {:?} (attempt {}/{})",
            self.stage, envelope.id, delay, attempt, envelope.options.attempts
        );
        Ok(NackOutcome::Retrying { attempt, delay })
    }

    pub async fn dead_letter(&self, delivery: &Delivery) -> Result<(), ShipyardError> {
        if let Some(dead_letter) = &self.dead_letter {
            dead_letter
                .send(&delivery.message.body, Duration::ZERO)
                .await?;
        }
        self.queue.delete(&delivery.message.receipt_handle).await?;
        error!(
            "Dead-lettered {} job delivery {} after {} attempt(s)",
            self.stage,
            delivery.message.message_id,
            delivery.attempt()
        );
        Ok(())
    }
}

/// The four stage queues
pub struct JobQueues {
    pub clone: JobQueue,
    pub frontend_build: JobQueue,
    pub backend_build: JobQueue,
    pub deploy: JobQueue,
}

impl JobQueues {
    /// One job queue per stage, each over the queue (and optional dead-letter queue)
    /// `queue_for` returns for it
    pub fn build<F>(receive: &ReceiveOptions, mut queue_for: F) -> Result<Self, ShipyardError>
    where
        F: FnMut(
            StageName,
        ) -> Result<(Arc<dyn MessageQueue>, Option<Arc<dyn MessageQueue>>), ShipyardError>,
    {
        let mut job_queue = |stage: StageName| -> Result<JobQueue, ShipyardError> {
            let (queue, dead_letter) = queue_for(stage)?;
            Ok(JobQueue::new(stage, queue, dead_letter, receive.clone()))
        };
        Ok(Self {
            clone: job_queue(StageName::Clone)?,
            frontend_build: job_queue(StageName::FrontendBuild)?,
            backend_build: job_queue(StageName::BackendBuild)?,
            deploy: job_queue(StageName::Deploy)?,
        })
    }

    pub fn get(&self, stage: StageName) -> &JobQueue {
        match stage {
            StageName::Clone => &self.clone,
            StageName::FrontendBuild => &self.frontend_build,
            StageName::BackendBuild => &self.backend_build,
            StageName::Deploy => &self.deploy,
        }
    }

    /// Enqueue on the payload's own stage queue with that stage's default options
    pub async fn enqueue(&self, payload: JobPayload) -> Result<String, ShipyardError> {
        let stage = payload.stage();
        self.get(stage)
            .enqueue(payload, JobOptions::for_stage(stage))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueue;
    use shipyard_domain::{CloneJob, ClonePaths, JobIds};

    fn clone_payload() -> JobPayload {
        JobPayload::Clone(CloneJob {
            ids: JobIds::new("p1", "d1"),
            repo_url: "https://github.com/acme/site".to_string(),
            branch: "main".to_string(),
            token: None,
            paths: ClonePaths {
                base_dir: "/tmp/p1/d1".to_string(),
                ..Default::default()
            },
            build: None,
        })
    }

    fn job_queue(queue: Arc<MemoryQueue>, dead_letter: Arc<MemoryQueue>) -> JobQueue {
        JobQueue::new(
            StageName::Clone,
            queue,
            Some(dead_letter as Arc<dyn MessageQueue>),
            ReceiveOptions {
                max_messages: 1,
                wait_time: Duration::from_secs(1),
                visibility_timeout: Duration::from_secs(600),
            },
        )
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let backoff = BackoffPolicy::Exponential { delay_ms: 5_000 };
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(20));
        assert_eq!(backoff.delay(30), BackoffPolicy::MAX_DELAY);
    }

    #[test]
    fn test_backoff_wire_shape() {
        let json = serde_json::to_value(BackoffPolicy::Exponential { delay_ms: 5_000 }).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["delayMs"], 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_retries_then_dead_letters() {
        let queue = Arc::new(MemoryQueue::new("clone"));
        let dead_letter = Arc::new(MemoryQueue::new("clone-dlq"));
        let jobs = job_queue(queue.clone(), dead_letter.clone());

        let options = JobOptions {
            attempts: 2,
            backoff: BackoffPolicy::Fixed { delay_ms: 1_000 },
        };
        jobs.enqueue(clone_payload(), options).await.unwrap();

        let first = jobs.next().await.unwrap().unwrap();
        assert_eq!(first.attempt(), 1);
        assert!(!first.is_final_attempt());
        assert_eq!(
            jobs.nack(&first).await.unwrap(),
            NackOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = jobs.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        assert!(second.is_final_attempt());
        assert_eq!(jobs.nack(&second).await.unwrap(), NackOutcome::DeadLettered);

        assert!(queue.is_empty().await);
        assert_eq!(dead_letter.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_dead_lettered_on_nack() {
        let queue = Arc::new(MemoryQueue::new("clone"));
        let dead_letter = Arc::new(MemoryQueue::new("clone-dlq"));
        let jobs = job_queue(queue.clone(), dead_letter.clone());

        queue.send("not json", Duration::ZERO).await.unwrap();
        let delivery = jobs.next().await.unwrap().unwrap();
        assert!(delivery.envelope.is_err());
        assert_eq!(jobs.nack(&delivery).await.unwrap(), NackOutcome::DeadLettered);
        assert_eq!(dead_letter.bodies().await, vec!["not json".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_hides_delivery_past_visibility_timeout() {
        let queue = Arc::new(MemoryQueue::new("deploy"));
        let dead_letter = Arc::new(MemoryQueue::new("deploy-dlq"));
        let jobs = JobQueue::new(
            StageName::Clone,
            queue.clone(),
            Some(dead_letter as Arc<dyn MessageQueue>),
            ReceiveOptions {
                max_messages: 1,
                wait_time: Duration::ZERO,
                visibility_timeout: Duration::from_secs(60),
            },
        );
        jobs.enqueue(clone_payload(), JobOptions::for_stage(StageName::Clone))
            .await
            .unwrap();
        let delivery = jobs.next().await.unwrap().unwrap();

        tokio::select! {
            never = jobs.keep_alive(&delivery) => match never {},
            _ = tokio::time::sleep(Duration::from_secs(140)) => {}
        }
        assert!(jobs.next().await.unwrap().is_none());

        jobs.ack(&delivery).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_wrong_stage() {
        let queue = Arc::new(MemoryQueue::new("deploy"));
        let jobs = JobQueue::new(StageName::Deploy, queue, None, ReceiveOptions::default());
        let result = jobs
            .enqueue(clone_payload(), JobOptions::for_stage(StageName::Clone))
            .await;
        assert!(matches!(result, Err(ShipyardError::QueueError(_))));
    }
}
