//! Task classification and claim handlers.

use super::{ApiError, ApiResult, ApiServer};
use crate::claims::{ClaimOutcome, ClaimStatus};
use crate::deps;
use crate::models::{ClassifiedTask, DependencyReport};
use crate::CortexError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<String>,
}

pub(super) async fn list_projects(
    State(server): State<ApiServer>,
) -> ApiResult<Json<ProjectsResponse>> {
    let projects = server.entries.list_task_projects().await?;
    Ok(Json(ProjectsResponse { projects }))
}

async fn classified(server: &ApiServer, project_id: &str) -> Result<DependencyReport, ApiError> {
    server.validator.check_project_id(project_id)?;
    let tasks = server.entries.project_tasks(project_id).await?;
    Ok(deps::classify(&tasks))
}

#[derive(Debug, Serialize)]
pub struct ProjectReportResponse {
    pub project: String,
    #[serde(flatten)]
    pub report: DependencyReport,
}

pub(super) async fn project_report(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectReportResponse>> {
    let report = classified(&server, &project_id).await?;
    Ok(Json(ProjectReportResponse {
        project: project_id,
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct ProjectionResponse {
    pub project: String,
    pub count: usize,
    pub tasks: Vec<ClassifiedTask>,
}

pub(super) async fn ready(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectionResponse>> {
    let report = classified(&server, &project_id).await?;
    let tasks = deps::ready_tasks(&report);
    Ok(Json(ProjectionResponse {
        project: project_id,
        count: tasks.len(),
        tasks,
    }))
}

pub(super) async fn waiting(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectionResponse>> {
    let report = classified(&server, &project_id).await?;
    let tasks = deps::waiting_tasks(&report);
    Ok(Json(ProjectionResponse {
        project: project_id,
        count: tasks.len(),
        tasks,
    }))
}

pub(super) async fn blocked(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectionResponse>> {
    let report = classified(&server, &project_id).await?;
    let tasks = deps::blocked_tasks(&report);
    Ok(Json(ProjectionResponse {
        project: project_id,
        count: tasks.len(),
        tasks,
    }))
}

pub(super) async fn next(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;
    let report = classified(&server, &project_id).await?;
    match deps::next_task(&report) {
        Some(task) => Ok(Json(serde_json::json!({ "task": task })).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "task": null,
                "message": format!("no ready tasks in project '{project_id}'"),
            })),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    #[serde(rename = "runnerId")]
    pub runner_id: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claimed: bool,
    #[serde(rename = "claimedAt")]
    pub claimed_at: DateTime<Utc>,
    pub refreshed: bool,
    #[serde(rename = "evictedStale")]
    pub evicted_stale: bool,
}

pub(super) async fn claim(
    State(server): State<ApiServer>,
    Path((project_id, task_id)): Path<(String, String)>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<Json<ClaimResponse>> {
    server.validator.check_project_id(&project_id)?;
    server.validator.check_entry_id(&task_id)?;
    if request.runner_id.trim().is_empty() {
        return Err(ApiError(CortexError::invalid(
            "runnerId",
            "must not be empty",
        )));
    }

    match server
        .claims
        .claim(&project_id, &task_id, &request.runner_id)
        .await
    {
        ClaimOutcome::Granted {
            claimed_at,
            refreshed,
            evicted_stale,
        } => Ok(Json(ClaimResponse {
            claimed: true,
            claimed_at,
            refreshed,
            evicted_stale,
        })),
        ClaimOutcome::Conflict {
            claimed_by,
            claimed_at,
        } => Err(ApiError(CortexError::ClaimConflict {
            task_id,
            claimed_by,
            claimed_at,
            is_stale: false,
        })),
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

pub(super) async fn release(
    State(server): State<ApiServer>,
    Path((project_id, task_id)): Path<(String, String)>,
) -> ApiResult<Json<ReleaseResponse>> {
    server.validator.check_project_id(&project_id)?;
    server.validator.check_entry_id(&task_id)?;
    let released = server.claims.release(&project_id, &task_id).await;
    Ok(Json(ReleaseResponse { released }))
}

#[derive(Debug, Serialize)]
pub struct ClaimStatusResponse {
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimStatus>,
}

pub(super) async fn claim_status(
    State(server): State<ApiServer>,
    Path((project_id, task_id)): Path<(String, String)>,
) -> ApiResult<Json<ClaimStatusResponse>> {
    server.validator.check_project_id(&project_id)?;
    server.validator.check_entry_id(&task_id)?;
    let claim = server.claims.status(&project_id, &task_id).await;
    Ok(Json(ClaimStatusResponse {
        claimed: claim.is_some(),
        claim,
    }))
}
