//! Domain events published by stage workers

use serde::{Deserialize, Serialize};

/// Pipeline-stage outcome carried by a domain event
///
/// The set is closed for producers. Consumers keep whatever they cannot name in
/// `Unknown` so newer producers never break older reconcilers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    BackendBuilding,
    BackendBuildSuccess,
    BackendBuildFailed,
    FrontendBuildQueued,
    FrontendBuildFailed,
    DeploymentMetadataReceived,
    InternalError,
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Created => "CREATED",
            EventType::BackendBuilding => "BACKEND_BUILDING",
            EventType::BackendBuildSuccess => "BACKEND_BUILD_SUCCESS",
            EventType::BackendBuildFailed => "BACKEND_BUILD_FAILED",
            EventType::FrontendBuildQueued => "FRONTEND_BUILD_QUEUED",
            EventType::FrontendBuildFailed => "FRONTEND_BUILD_FAILED",
            EventType::DeploymentMetadataReceived => "DEPLOYMENT_METADATA_RECEIVED",
            EventType::InternalError => "INTERNAL_ERROR",
            EventType::Unknown(other) => other.as_str(),
        }
    }

    /// Event types that fail a deployment
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::BackendBuildFailed
                | EventType::FrontendBuildFailed
                | EventType::InternalError
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATED" => EventType::Created,
            "BACKEND_BUILDING" => EventType::BackendBuilding,
            "BACKEND_BUILD_SUCCESS" => EventType::BackendBuildSuccess,
            "BACKEND_BUILD_FAILED" => EventType::BackendBuildFailed,
            "FRONTEND_BUILD_QUEUED" => EventType::FrontendBuildQueued,
            "FRONTEND_BUILD_FAILED" => EventType::FrontendBuildFailed,
            // older producers misspell this one
            "DEPLOYMENT_METADATA_RECEIVED" | "DEPLOYMENT_METADATA_RECIEVED" => {
                EventType::DeploymentMetadataReceived
            }
            "INTERNAL_ERROR" => EventType::InternalError,
            other => EventType::Unknown(other.to_string()),
        })
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSource {
    /// Malformed job or pipeline bug
    Internal,
    /// Project configuration missing required build or runtime data
    Database,
    /// Build or deploy execution failed
    Build,
    /// An external resource never became observable
    Timeout,
}

/// Event payload
///
/// Every field is optional; each event type fills the ones its reconciler update
/// needs so no event requires a second lookup to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_task_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_task_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_artifact_url: Option<String>,

    /// Free-form diagnostics, never interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EventPayload {
    /// Payload for a failure event
    pub fn failure(msg: impl Into<String>, source: ErrorSource) -> Self {
        Self {
            msg: Some(msg.into()),
            source: Some(source),
            ..Default::default()
        }
    }
}

/// Envelope published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub kind: EventType,

    pub project_id: String,

    pub deployment_id: String,

    #[serde(default)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(
        kind: EventType,
        project_id: impl Into<String>,
        deployment_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            kind,
            project_id: project_id.into(),
            deployment_id: deployment_id.into(),
            payload,
        }
    }
}
