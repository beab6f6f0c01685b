//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::orchestrator::DeployOptions;
use crate::models::deployment::DeploymentTrigger;
use crate::models::script::NewScript;
use crate::scripts::repository::available_variables;
use crate::server::errors::{ApiError, ApiResult};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Parse an optional JSON body; an empty body yields the default
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "flowdeck".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================= PROJECTS ===================================== //

pub async fn list_projects_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.projects.list())
}

pub async fn project_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.projects.resolve(&slug)?))
}

pub async fn project_health_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.health_check(&project).await))
}

pub async fn project_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.deployments(&project)))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn rollback_points_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    let limit = query.limit.unwrap_or(10);
    Ok(Json(state.orchestrator.rollback_points(&project, limit)))
}

/// Body of a deploy request; every field is optional
#[derive(Debug, Default, Deserialize)]
pub struct DeployBody {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub trigger: Option<DeploymentTrigger>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let body: DeployBody = optional_body(&body)?;
    let project = state.projects.resolve(&slug)?;
    let options = DeployOptions {
        force: body.force,
        trigger: body.trigger.unwrap_or(DeploymentTrigger::Webhook),
        user: body.user,
        variables: body.variables,
    };
    Ok(Json(state.orchestrator.deploy(&project, options).await?))
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    pub deployment_id: Uuid,
    #[serde(default)]
    pub user: Option<String>,
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
    Json(body): Json<RollbackBody>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(
        state
            .orchestrator
            .rollback(&project, body.deployment_id, body.user)
            .await?,
    ))
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.stop(&project).await?))
}

pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.start(&project).await?))
}

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.restart(&project).await?))
}

pub async fn cleanup_handler(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&slug)?;
    Ok(Json(state.orchestrator.cleanup(&project).await?))
}

// ================================= DEPLOYMENTS ================================== //

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.lifecycle.get(id)?))
}

pub async fn deployment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(state.orchestrator.deployment_logs(id)?)
}

pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.cancel(id).await?))
}

// ================================= SCRIPTS ====================================== //

pub async fn list_scripts_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.scripts.list())
}

pub async fn create_script_handler(
    State(state): State<Arc<ServerState>>,
    Json(script): Json<NewScript>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.scripts.create(script).await?))
}

pub async fn templates_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.scripts.templates())
}

#[derive(Debug, Serialize)]
pub struct VariableInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub async fn variables_handler() -> impl IntoResponse {
    let vars: Vec<VariableInfo> = available_variables()
        .into_iter()
        .map(|(name, description)| VariableInfo { name, description })
        .collect();
    Json(vars)
}

#[derive(Debug, Deserialize)]
pub struct FromTemplateBody {
    /// Slug or id of the project the script is generated for
    pub project: String,
}

pub async fn generate_from_template_handler(
    State(state): State<Arc<ServerState>>,
    Path(key): Path<String>,
    Json(body): Json<FromTemplateBody>,
) -> ApiResult<impl IntoResponse> {
    let project = state.projects.resolve(&body.project)?;
    Ok(Json(state.scripts.generate_from_template(&key, &project).await?))
}
