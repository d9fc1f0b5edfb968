//! Search, context injection, link resolution, and stats handlers.

use super::{ApiError, ApiResult, ApiServer};
use crate::entries::{EntryStats, EntrySummary, InjectResult, LinkInfo, SearchResult, StaleEntry};
use crate::models::{EntryStatus, EntryType};
use crate::validation::{check_limit, check_stale_days};
use crate::CortexError;
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 500))]
    pub query: String,
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub global: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchResult>,
}

pub(super) async fn search(
    State(server): State<ApiServer>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    request
        .validate()
        .map_err(|_| ApiError(CortexError::invalid("query", "must not be empty")))?;
    let limit = check_limit(request.limit)?;
    let entry_type = match request.entry_type.as_deref() {
        None => None,
        Some(raw) => Some(
            raw.parse::<EntryType>()
                .map_err(|e| ApiError(CortexError::invalid("type", e)))?,
        ),
    };
    let status = match request.status.as_deref() {
        None => None,
        Some(raw) => Some(
            raw.parse::<EntryStatus>()
                .map_err(|e| ApiError(CortexError::invalid("status", e)))?,
        ),
    };

    let results = server
        .entries
        .search(
            &request.query,
            entry_type,
            status,
            limit,
            request.global.unwrap_or(false),
        )
        .await?;
    Ok(Json(SearchResponse {
        query: request.query,
        count: results.len(),
        results,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct InjectRequest {
    #[validate(length(min = 1, max = 500))]
    pub query: String,
    pub limit: Option<i64>,
}

pub(super) async fn inject(
    State(server): State<ApiServer>,
    Json(request): Json<InjectRequest>,
) -> ApiResult<Json<InjectResult>> {
    request
        .validate()
        .map_err(|_| ApiError(CortexError::invalid("query", "must not be empty")))?;
    let limit = check_limit(request.limit)?;
    let result = server.entries.inject(&request.query, limit).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    #[serde(rename = "ref")]
    pub reference: String,
}

pub(super) async fn link(
    State(server): State<ApiServer>,
    Json(request): Json<LinkRequest>,
) -> ApiResult<Json<LinkInfo>> {
    let info = server.entries.generate_link(&request.reference).await?;
    Ok(Json(info))
}

pub(super) async fn stats(State(server): State<ApiServer>) -> ApiResult<Json<EntryStats>> {
    Ok(Json(server.entries.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct OrphansQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrphansResponse {
    pub count: usize,
    pub orphans: Vec<EntrySummary>,
}

pub(super) async fn orphans(
    State(server): State<ApiServer>,
    Query(query): Query<OrphansQuery>,
) -> ApiResult<Json<OrphansResponse>> {
    let limit = check_limit(query.limit)?;
    let orphans = server.entries.list_orphans(limit).await?;
    Ok(Json(OrphansResponse {
        count: orphans.len(),
        orphans,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StaleResponse {
    pub days: u32,
    pub count: usize,
    pub stale: Vec<StaleEntry>,
}

pub(super) async fn stale(
    State(server): State<ApiServer>,
    Query(query): Query<StaleQuery>,
) -> ApiResult<Json<StaleResponse>> {
    let days = check_stale_days(query.days)?;
    let limit = check_limit(query.limit)?;
    let stale = server.entries.list_stale(days, limit).await?;
    Ok(Json(StaleResponse {
        days,
        count: stale.len(),
        stale,
    }))
}
