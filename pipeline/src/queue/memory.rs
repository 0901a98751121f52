//! In-process message queue
//!
//! Implements the same delivery contract as the managed queue: visibility timeouts,
//! receive counts, long-poll waits and a purge cooldown. Used for single-process runs
//! and as the queue fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::errors::ShipyardError;
use crate::queue::{MessageQueue, PurgeOutcome, ReceiveOptions, ReceivedMessage};
use crate::utils::generate_uuid;

/// Window after a purge during which another purge reports `AlreadyInProgress`
pub const PURGE_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    receipt_handle: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<StoredMessage>,
    last_purge: Option<Instant>,
}

pub struct MemoryQueue {
    name: String,
    inner: Mutex<Inner>,
    arrivals: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            arrivals: Notify::new(),
        }
    }

    /// Messages not yet deleted, visible or in flight
    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bodies of every message not yet deleted, in send order
    pub async fn bodies(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// Take visible messages, or report when the next hidden one becomes visible
    async fn take_visible(
        &self,
        options: &ReceiveOptions,
    ) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut taken = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for message in inner.messages.iter_mut() {
            if taken.len() as u32 >= options.max_messages.max(1) {
                break;
            }
            if message.visible_at > now {
                next_visible = Some(match next_visible {
                    Some(at) => at.min(message.visible_at),
                    None => message.visible_at,
                });
                continue;
            }

            let receipt_handle = generate_uuid();
            message.receive_count += 1;
            message.visible_at = now + options.visibility_timeout;
            message.receipt_handle = Some(receipt_handle.clone());

            taken.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt_handle,
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }

        (taken, next_visible)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str, delay: Duration) -> Result<String, ShipyardError> {
        let id = generate_uuid();
        {
            let mut inner = self.inner.lock().await;
            inner.messages.push(StoredMessage {
                id: id.clone(),
                body: body.to_string(),
                visible_at: Instant::now() + delay,
                receive_count: 0,
                receipt_handle: None,
            });
        }
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn receive(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ShipyardError> {
        let deadline = Instant::now() + options.wait_time;

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (taken, next_visible) = self.take_visible(options).await;
            if !taken.is_empty() {
                return Ok(taken);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // wake on a new message, a hidden one turning visible, or the deadline
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), ShipyardError> {
        let mut inner = self.inner.lock().await;
        // a stale receipt from an earlier delivery deletes nothing
        inner
            .messages
            .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), ShipyardError> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                ShipyardError::QueueError(format!(
                    "receipt handle {} is not in flight on {}",
                    receipt_handle, self.name
                ))
            })?;
        message.visible_at = Instant::now() + timeout;
        drop(inner);
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn purge(&self) -> Result<PurgeOutcome, ShipyardError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if let Some(last) = inner.last_purge {
            if now.duration_since(last) < PURGE_COOLDOWN {
                return Ok(PurgeOutcome::AlreadyInProgress);
            }
        }
        inner.messages.clear();
        inner.last_purge = Some(now);
        Ok(PurgeOutcome::Purged)
    }
}
