//! Message queues
//!
//! A `MessageQueue` is a pull-based, at-least-once channel with visibility timeouts. Job
//! queues and the event bus are both built on it.

pub mod jobs;
pub mod memory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ShipyardError;

/// A message handed out by `receive`, invisible to other consumers until its
/// visibility timeout lapses or it is deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,

    /// Handle for this delivery, required to delete or re-hide the message
    pub receipt_handle: String,

    pub body: String,

    /// Number of times the message has been handed out, this delivery included
    pub receive_count: u32,
}

/// Receive parameters
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub max_messages: u32,

    /// Long-poll wait when the queue is empty
    pub wait_time: Duration,

    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 5,
            wait_time: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a purge request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    Purged,
    /// A purge issued shortly before is still running
    AlreadyInProgress,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name for logs
    fn name(&self) -> &str;

    /// Send a message, hidden for `delay` before its first delivery
    async fn send(&self, body: &str, delay: Duration) -> Result<String, ShipyardError>;

    async fn receive(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ShipyardError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), ShipyardError>;

    /// Re-hide an in-flight message for `timeout` from now
    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), ShipyardError>;

    /// Drop every pending message
    async fn purge(&self) -> Result<PurgeOutcome, ShipyardError>;
}
