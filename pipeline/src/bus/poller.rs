//! Event bus poller
//!
//! Pulls batches of domain events and hands them to the consumer one at a time. A message
//! is deleted only after it was handled; anything else is left to reappear once its
//! visibility timeout lapses.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use shipyard_domain::{DomainEvent, EventType};
use tracing::{debug, error, info, warn};

use crate::bus::purge::purge_on_startup;
use crate::bus::{EventHandler, HandleOutcome};
use crate::errors::ShipyardError;
use crate::queue::{MessageQueue, ReceiveOptions, ReceivedMessage};
use crate::retry::{bounded, Attempt, RetryError, RetryPolicy};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Event poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Batch size, long-poll wait and visibility timeout
    pub receive: ReceiveOptions,

    /// Deliveries after which an unhandled event is dropped
    pub max_receive_count: u32,

    /// Purge the queue once before the first poll
    pub purge_on_startup: bool,

    /// Retries of a failing receive call within one poll
    pub receive_retry: RetryPolicy,

    /// Cooldown after a poll that failed outright
    pub error_cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            receive: ReceiveOptions::default(),
            max_receive_count: 10,
            purge_on_startup: true,
            receive_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            error_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }
}

/// Counters for one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub deleted: usize,
    pub left: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delete,
    Leave,
    Drop,
}

/// Run the event poller until shutdown
pub async fn run<S, F>(
    options: &Options,
    queue: &dyn MessageQueue,
    handler: &dyn EventHandler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Event poller starting on {}...", queue.name());

    if options.purge_on_startup {
        if let Err(e) = purge_on_startup(queue).await {
            error!("Failed to purge {}: {}", queue.name(), e);
        }
    }

    let mut failures: u32 = 0;
    loop {
        let result = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Event poller shutting down...");
                return;
            }
            result = poll_once(options, queue, handler, &sleep_fn) => result,
        };

        match result {
            Ok(stats) => {
                failures = 0;
                if stats.received > 0 {
                    debug!("Poll finished: {:?}", stats);
                }
            }
            Err(e) => {
                let wait = calc_exp_backoff(&options.error_cooldown, failures);
                failures = failures.saturating_add(1);
                error!("Event poll failed: {}, retrying in {:?}", e, wait);
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Event poller shutting down...");
                        return;
                    }
                    _ = sleep_fn(wait) => {}
                }
            }
        }
    }
}

/// Receive one batch and dispatch it
pub async fn poll_once<S, F>(
    options: &Options,
    queue: &dyn MessageQueue,
    handler: &dyn EventHandler,
    sleep_fn: S,
) -> Result<PollStats, ShipyardError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let receive = &options.receive;
    let messages = bounded(&options.receive_retry, sleep_fn, move |_| async move {
        match queue.receive(receive).await {
            Ok(messages) => Attempt::Done(messages),
            Err(e) => Attempt::Retry(e.to_string()),
        }
    })
    .await
    .map_err(|e: RetryError<ShipyardError>| ShipyardError::QueueError(e.to_string()))?;

    let mut stats = PollStats {
        received: messages.len(),
        ..Default::default()
    };

    for message in messages {
        let disposition = dispatch(options, handler, &message).await;
        match disposition {
            Disposition::Delete | Disposition::Drop => {
                if let Err(e) = queue.delete(&message.receipt_handle).await {
                    error!("Failed to delete event {}: {}", message.message_id, e);
                    stats.left += 1;
                    continue;
                }
                if disposition == Disposition::Drop {
                    stats.dropped += 1;
                } else {
                    stats.deleted += 1;
                }
            }
            Disposition::Leave => stats.left += 1,
        }
    }

    Ok(stats)
}

async fn dispatch(
    options: &Options,
    handler: &dyn EventHandler,
    message: &ReceivedMessage,
) -> Disposition {
    let event: DomainEvent = match serde_json::from_str(&message.body) {
        Ok(event) => event,
        Err(e) => {
            error!("Dropping malformed event {}: {}", message.message_id, e);
            return Disposition::Drop;
        }
    };

    if let EventType::Unknown(kind) = &event.kind {
        debug!("Ignoring unknown event type {}", kind);
        return Disposition::Delete;
    }

    let reason = match handler.handle(&event).await {
        Ok(HandleOutcome::Applied) | Ok(HandleOutcome::Ignored) => return Disposition::Delete,
        Ok(HandleOutcome::Deferred) => format!("{} deferred", event.kind),
        Err(e) => e.to_string(),
    };

    if message.receive_count >= options.max_receive_count {
        error!(
            "Dropping {} for deployment {} after {} deliveries: {}",
            event.kind, event.deployment_id, message.receive_count, reason
        );
        return Disposition::Drop;
    }

    warn!(
        "Leaving {} for deployment {} for redelivery (delivery {}): {}",
        event.kind, event.deployment_id, message.receive_count, reason
    );
    Disposition::Leave
}
