//! Feature aggregation handlers, mirroring the task projections.

use super::{ApiResult, ApiServer};
use crate::deps;
use crate::features;
use crate::models::{Feature, FeatureReport};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;

async fn aggregated(server: &ApiServer, project_id: &str) -> ApiResult<FeatureReport> {
    server.validator.check_project_id(project_id)?;
    let tasks = server.entries.project_tasks(project_id).await?;
    let report = deps::classify(&tasks);
    Ok(features::aggregate(&report.tasks))
}

#[derive(Debug, Serialize)]
pub struct FeatureReportResponse {
    pub project: String,
    #[serde(flatten)]
    pub report: FeatureReport,
}

pub(super) async fn project_report(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<FeatureReportResponse>> {
    let report = aggregated(&server, &project_id).await?;
    Ok(Json(FeatureReportResponse {
        project: project_id,
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct FeatureProjectionResponse {
    pub project: String,
    pub count: usize,
    pub features: Vec<Feature>,
}

pub(super) async fn ready(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<FeatureProjectionResponse>> {
    let report = aggregated(&server, &project_id).await?;
    let features = features::ready_features(&report);
    Ok(Json(FeatureProjectionResponse {
        project: project_id,
        count: features.len(),
        features,
    }))
}

pub(super) async fn waiting(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<FeatureProjectionResponse>> {
    let report = aggregated(&server, &project_id).await?;
    let features = features::waiting_features(&report);
    Ok(Json(FeatureProjectionResponse {
        project: project_id,
        count: features.len(),
        features,
    }))
}

pub(super) async fn blocked(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<FeatureProjectionResponse>> {
    let report = aggregated(&server, &project_id).await?;
    let features = features::blocked_features(&report);
    Ok(Json(FeatureProjectionResponse {
        project: project_id,
        count: features.len(),
        features,
    }))
}

pub(super) async fn next(
    State(server): State<ApiServer>,
    Path(project_id): Path<String>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;
    let report = aggregated(&server, &project_id).await?;
    match features::next_feature(&report) {
        Some(feature) => Ok(Json(serde_json::json!({ "feature": feature })).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "feature": null,
                "message": format!("no ready features in project '{project_id}'"),
            })),
        )
            .into_response()),
    }
}
