//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use shipyard_domain::Project;
use tracing::{error, warn};

use crate::errors::ShipyardError;
use crate::server::state::ServerState;
use crate::utils::version_info;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: String,
}

/// Liveness of the process; says nothing about the queues or the cluster
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "shipyard",
        version: version_info().version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Current record of one deployment
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.store.get(&deployment_id).await {
        Ok(Some(deployment)) => Ok(Json(deployment)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to load deployment {}: {}", deployment_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Deployments of a project, oldest first
pub async fn project_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state.store.list(&project_id).await.map(Json).map_err(|e| {
        error!("Failed to list deployments of project {}: {}", project_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Body of a deployment request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub project: Project,
    pub owner: String,

    /// Access token for private repositories
    #[serde(default)]
    pub token: Option<SecretString>,
}

/// Start a deployment of the project in the body
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if request.project.id != project_id {
        warn!(
            "Deployment request for project {} carries project {}",
            project_id, request.project.id
        );
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = request.token.as_ref().map(|t| t.expose_secret());
    match state
        .trigger
        .deploy(&request.project, &request.owner, token)
        .await
    {
        Ok(deployment) => Ok((StatusCode::CREATED, Json(deployment))),
        Err(ShipyardError::InvalidProject(reason)) => {
            warn!("Rejected deployment of project {}: {}", project_id, reason);
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }
        Err(e) => {
            error!("Failed to start deployment of project {}: {}", project_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
