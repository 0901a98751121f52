//! Error types for the shipyard pipeline

use shipyard_domain::{
    DomainEvent, ErrorSource, EventPayload, EventType, JobRejection, RejectionKind,
};
use thiserror::Error;

/// Process-level error type
#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Cluster error: {0}")]
    ClusterError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Notify error: {0}")]
    NotifyError(String),

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ShipyardError {
    fn from(err: anyhow::Error) -> Self {
        ShipyardError::Internal(err.to_string())
    }
}

/// Failure of a single job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Missing or malformed job fields
    #[error("{0}")]
    Validation(String),

    /// Build or runtime configuration missing from the project record
    #[error("{0}")]
    UpstreamData(String),

    /// Launch or deploy call failed
    #[error("{message}")]
    Execution { message: String, retryable: bool },

    /// A launched resource never became observable within its bound
    #[error("{0}")]
    ResolutionTimeout(String),

    /// Anything the stage did not anticipate
    #[error("{0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn execution(message: impl Into<String>) -> Self {
        PipelineError::Execution {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        PipelineError::Execution {
            message: message.into(),
            retryable: false,
        }
    }

    /// Source tag carried by the failure event
    pub fn source(&self) -> ErrorSource {
        match self {
            PipelineError::Validation(_) | PipelineError::Unexpected(_) => ErrorSource::Internal,
            PipelineError::UpstreamData(_) => ErrorSource::Database,
            PipelineError::Execution { .. } => ErrorSource::Build,
            PipelineError::ResolutionTimeout(_) => ErrorSource::Timeout,
        }
    }

    /// Whether another delivery of the same job can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_)
            | PipelineError::UpstreamData(_)
            | PipelineError::ResolutionTimeout(_) => false,
            PipelineError::Execution { retryable, .. } => *retryable,
            PipelineError::Unexpected(_) => true,
        }
    }

    /// Build the single failure event for this error
    ///
    /// Structural and unexpected failures are always `INTERNAL_ERROR`; execution and
    /// timeout failures use the failure event of the stage they happened in.
    pub fn to_event(
        &self,
        stage_failure: EventType,
        project_id: &str,
        deployment_id: &str,
    ) -> DomainEvent {
        let kind = match self {
            PipelineError::Validation(_)
            | PipelineError::UpstreamData(_)
            | PipelineError::Unexpected(_) => EventType::InternalError,
            PipelineError::Execution { .. } | PipelineError::ResolutionTimeout(_) => stage_failure,
        };
        DomainEvent::new(
            kind,
            project_id,
            deployment_id,
            EventPayload::failure(self.to_string(), self.source()),
        )
    }
}

impl From<JobRejection> for PipelineError {
    fn from(rejection: JobRejection) -> Self {
        match rejection.kind {
            RejectionKind::UpstreamData => PipelineError::UpstreamData(rejection.reason),
            RejectionKind::Validation | RejectionKind::Skip => {
                PipelineError::Validation(rejection.reason)
            }
        }
    }
}

impl From<ShipyardError> for PipelineError {
    fn from(err: ShipyardError) -> Self {
        match err {
            ShipyardError::ClusterError(msg) => PipelineError::execution(msg),
            ShipyardError::HttpError(e) => PipelineError::execution(e.to_string()),
            other => PipelineError::Unexpected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_sources() {
        assert_eq!(PipelineError::Validation("x".into()).source(), ErrorSource::Internal);
        assert_eq!(PipelineError::UpstreamData("x".into()).source(), ErrorSource::Database);
        assert_eq!(PipelineError::execution("x").source(), ErrorSource::Build);
        assert_eq!(PipelineError::ResolutionTimeout("x".into()).source(), ErrorSource::Timeout);
        assert_eq!(PipelineError::Unexpected("x".into()).source(), ErrorSource::Internal);
    }

    #[test]
    fn test_retry_decisions() {
        assert!(!PipelineError::Validation("x".into()).is_retryable());
        assert!(!PipelineError::UpstreamData("x".into()).is_retryable());
        assert!(!PipelineError::ResolutionTimeout("x".into()).is_retryable());
        assert!(!PipelineError::fatal("exit 1").is_retryable());
        assert!(PipelineError::execution("launch refused").is_retryable());
        assert!(PipelineError::Unexpected("boom".into()).is_retryable());
    }

    #[test]
    fn test_event_mapping() {
        let event = PipelineError::UpstreamData("startCommand missing".into()).to_event(
            EventType::BackendBuildFailed,
            "p1",
            "d1",
        );
        assert_eq!(event.kind, EventType::InternalError);
        assert_eq!(event.payload.source, Some(ErrorSource::Database));
        assert_eq!(event.payload.msg.as_deref(), Some("startCommand missing"));

        let event = PipelineError::execution("no capacity").to_event(
            EventType::FrontendBuildFailed,
            "p1",
            "d1",
        );
        assert_eq!(event.kind, EventType::FrontendBuildFailed);
        assert_eq!(event.payload.source, Some(ErrorSource::Build));
    }

    #[test]
    fn test_cluster_errors_are_retryable_execution() {
        let err: PipelineError = ShipyardError::ClusterError("throttled".into()).into();
        assert!(matches!(err, PipelineError::Execution { retryable: true, .. }));

        let err: PipelineError = ShipyardError::StoreError("disk full".into()).into();
        assert!(matches!(err, PipelineError::Unexpected(_)));
    }
}
