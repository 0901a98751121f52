//! SQS-compatible queue client
//!
//! Speaks the SQS JSON protocol (`X-Amz-Target: AmazonSQS.<Action>`) against a configured
//! endpoint. Requests are not signed; point it at an SQS-compatible broker or a local
//! signing proxy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::errors::ShipyardError;
use crate::queue::{MessageQueue, PurgeOutcome, ReceiveOptions, ReceivedMessage};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_HEADER: &str = "X-Amz-Target";

/// Error body returned by the queue service
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    kind: String,

    #[serde(alias = "Message", default)]
    message: String,
}

impl ServiceError {
    /// `com.amazonaws.sqs#PurgeQueueInProgress` and the legacy
    /// `AWS.SimpleQueueService.PurgeQueueInProgress` both count
    fn is_purge_in_progress(&self) -> bool {
        self.kind.ends_with("PurgeQueueInProgress")
    }
}

#[derive(Debug)]
enum CallError {
    Service(ServiceError),
    Other(ShipyardError),
}

impl From<CallError> for ShipyardError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Service(e) => {
                ShipyardError::QueueError(format!("{}: {}", e.kind, e.message))
            }
            CallError::Other(e) => e,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageResult {
    message_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResult {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
    #[serde(default)]
    attributes: std::collections::HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

pub struct SqsQueue {
    client: Client,
    endpoint: String,
    queue_url: String,
    name: String,
}

impl SqsQueue {
    pub fn new(endpoint: &str, queue_url: &str) -> Result<Self, ShipyardError> {
        if queue_url.is_empty() {
            return Err(ShipyardError::ConfigError("queue URL is not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let name = queue_url
            .rsplit('/')
            .next()
            .unwrap_or(queue_url)
            .to_string();

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            queue_url: queue_url.to_string(),
            name,
        })
    }

    async fn call<B: Serialize, T: DeserializeOwned + Default>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<T, CallError> {
        debug!("SQS {} on {}", action, self.name);

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(TARGET_HEADER, format!("AmazonSQS.{}", action))
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Other(e.into()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::Other(e.into()))?;

        if !status.is_success() {
            return match serde_json::from_str::<ServiceError>(&text) {
                Ok(service_error) => Err(CallError::Service(service_error)),
                Err(_) => {
                    error!("SQS {} failed: {} - {}", action, status, text);
                    Err(CallError::Other(ShipyardError::QueueError(format!(
                        "{} {}: {}",
                        action, status, text
                    ))))
                }
            };
        }

        if text.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&text).map_err(|e| CallError::Other(e.into()))
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str, delay: Duration) -> Result<String, ShipyardError> {
        let result: Option<SendMessageResult> = self
            .call::<_, Option<SendMessageResult>>(
                "SendMessage",
                &json!({
                    "QueueUrl": self.queue_url,
                    "MessageBody": body,
                    "DelaySeconds": delay.as_secs().min(900),
                }),
            )
            .await?;
        result
            .map(|r| r.message_id)
            .ok_or_else(|| {
                ShipyardError::QueueError("SendMessage returned no message id".to_string())
            })
    }

    async fn receive(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ShipyardError> {
        let result: ReceiveMessageResult = self
            .call(
                "ReceiveMessage",
                &json!({
                    "QueueUrl": self.queue_url,
                    "MaxNumberOfMessages": options.max_messages.clamp(1, 10),
                    "WaitTimeSeconds": options.wait_time.as_secs().min(20),
                    "VisibilityTimeout": options.visibility_timeout.as_secs(),
                    "AttributeNames": ["ApproximateReceiveCount"],
                }),
            )
            .await?;

        Ok(result
            .messages
            .into_iter()
            .map(|m| {
                let receive_count = m
                    .attributes
                    .get("ApproximateReceiveCount")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(1);
                ReceivedMessage {
                    message_id: m.message_id,
                    receipt_handle: m.receipt_handle,
                    body: m.body,
                    receive_count,
                }
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), ShipyardError> {
        let _: Empty = self
            .call(
                "DeleteMessage",
                &json!({ "QueueUrl": self.queue_url, "ReceiptHandle": receipt_handle }),
            )
            .await?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), ShipyardError> {
        let _: Empty = self
            .call(
                "ChangeMessageVisibility",
                &json!({
                    "QueueUrl": self.queue_url,
                    "ReceiptHandle": receipt_handle,
                    "VisibilityTimeout": timeout.as_secs().min(43_200),
                }),
            )
            .await?;
        Ok(())
    }

    async fn purge(&self) -> Result<PurgeOutcome, ShipyardError> {
        match self
            .call::<_, Empty>("PurgeQueue", &json!({ "QueueUrl": self.queue_url }))
            .await
        {
            Ok(_) => Ok(PurgeOutcome::Purged),
            Err(CallError::Service(e)) if e.is_purge_in_progress() => {
                Ok(PurgeOutcome::AlreadyInProgress)
            }
            Err(e) => Err(e.into()),
        }
    }
}
