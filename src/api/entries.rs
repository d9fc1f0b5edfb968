//! Entry CRUD, section, and link-graph handlers.

use super::{ApiError, ApiResult, ApiServer};
use crate::entries::{
    CreateEntry, EntrySummary, ExtractedSection, ListQuery, Section, SortBy, UpdateEntry,
};
use crate::models::{Entry, EntryStatus, EntryType, Priority};
use crate::validation::check_limit;
use crate::CortexError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Full entry on the wire, frontmatter flattened next to the content.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    pub content: String,
}

impl From<Entry> for EntryResponse {
    fn from(entry: Entry) -> Self {
        let fm = entry.frontmatter;
        Self {
            id: entry.id,
            path: entry.path,
            title: fm.title,
            entry_type: fm.entry_type,
            status: fm.status,
            priority: fm.priority,
            tags: fm.tags,
            project_id: fm.project_id,
            created: fm.created,
            modified: fm.modified,
            depends_on: fm.depends_on,
            parent_id: fm.parent_id,
            feature_id: fm.feature_id,
            content: entry.body,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEntryRequest {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[validate(length(min = 1, max = 500))]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub status: Option<EntryStatus>,
    #[validate(regex(path = *crate::validation::ENTRY_ID_PATTERN))]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub feature_id: Option<String>,
    pub feature_priority: Option<Priority>,
    #[serde(default)]
    pub feature_depends_on: Vec<String>,
    pub workdir: Option<String>,
    pub worktree: Option<String>,
    pub git_remote: Option<String>,
    pub git_branch: Option<String>,
    pub user_original_request: Option<String>,
    #[serde(default)]
    pub related_entries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateEntryResponse {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub link: String,
}

pub(super) async fn create_entry(
    State(server): State<ApiServer>,
    Json(request): Json<CreateEntryRequest>,
) -> ApiResult<(StatusCode, Json<CreateEntryResponse>)> {
    request
        .validate()
        .map_err(|e| ApiError(validation_error(e)))?;

    let entry = server
        .entries
        .create(CreateEntry {
            entry_type: Some(request.entry_type),
            title: request.title,
            content: request.content,
            project_id: request.project_id,
            tags: request.tags,
            priority: request.priority,
            status: request.status,
            parent_id: request.parent_id,
            depends_on: request.depends_on,
            feature_id: request.feature_id,
            feature_priority: request.feature_priority,
            feature_depends_on: request.feature_depends_on,
            workdir: request.workdir,
            worktree: request.worktree,
            git_remote: request.git_remote,
            git_branch: request.git_branch,
            user_original_request: request.user_original_request,
            related_entries: request.related_entries,
        })
        .await?;

    let response = CreateEntryResponse {
        link: format!("[{}]({})", entry.title(), entry.path),
        id: entry.id.clone(),
        path: entry.path.clone(),
        title: entry.title().to_string(),
        entry_type: entry.entry_type(),
        status: entry.status(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

fn validation_error(errors: validator::ValidationErrors) -> CortexError {
    let details = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(|e| crate::error::FieldError {
                field: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    CortexError::Validation {
        message: "request validation failed".to_string(),
        details,
    }
}

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub status: Option<String>,
    pub parent_id: Option<String>,
    pub project: Option<String>,
    pub global: Option<bool>,
    pub filename: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListEntriesResponse {
    pub entries: Vec<EntrySummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

pub(super) async fn list_entries(
    State(server): State<ApiServer>,
    Query(query): Query<ListEntriesQuery>,
) -> ApiResult<Json<ListEntriesResponse>> {
    let limit = check_limit(query.limit)?;
    let offset = query.offset.unwrap_or(0);
    let entry_type = parse_opt::<EntryType>("type", query.entry_type.as_deref())?;
    let status = parse_opt::<EntryStatus>("status", query.status.as_deref())?;
    let sort_by = match query.sort_by.as_deref() {
        None | Some("created") => SortBy::Created,
        Some("modified") => SortBy::Modified,
        Some("priority") => SortBy::Priority,
        Some(other) => {
            return Err(ApiError(CortexError::invalid(
                "sortBy",
                format!("unknown sort key '{other}'"),
            )))
        }
    };
    if let Some(parent_id) = &query.parent_id {
        server.validator.check_entry_id(parent_id)?;
    }

    let (entries, total) = server
        .entries
        .list(&ListQuery {
            entry_type,
            status,
            parent_id: query.parent_id,
            project_id: query.project,
            global: query.global,
            filename: query.filename,
            sort_by,
            limit,
            offset,
        })
        .await?;
    Ok(Json(ListEntriesResponse {
        entries,
        total,
        limit,
        offset,
    }))
}

fn parse_opt<T: std::str::FromStr<Err = String>>(
    field: &str,
    raw: Option<&str>,
) -> ApiResult<Option<T>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ApiError(CortexError::invalid(field, e))),
    }
}

pub(super) async fn get_entry(
    State(server): State<ApiServer>,
    Path(reference): Path<String>,
) -> ApiResult<Json<EntryResponse>> {
    let entry = server.entries.recall(&reference).await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateEntryRequest {
    pub status: Option<EntryStatus>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub append: Option<String>,
    pub note: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub feature_id: Option<String>,
    pub feature_priority: Option<Priority>,
    pub feature_depends_on: Option<Vec<String>>,
}

pub(super) async fn update_entry(
    State(server): State<ApiServer>,
    Path(reference): Path<String>,
    Json(request): Json<UpdateEntryRequest>,
) -> ApiResult<Json<EntryResponse>> {
    let entry = server
        .entries
        .update(
            &reference,
            UpdateEntry {
                status: request.status,
                title: request.title,
                content: request.content,
                append: request.append,
                note: request.note,
                depends_on: request.depends_on,
                feature_id: request.feature_id,
                feature_priority: request.feature_priority,
                feature_depends_on: request.feature_depends_on,
            },
        )
        .await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub confirm: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: String,
    pub path: String,
}

pub(super) async fn delete_entry(
    State(server): State<ApiServer>,
    Path(reference): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let entry = server
        .entries
        .delete(&reference, query.confirm.unwrap_or(false))
        .await?;
    Ok(Json(DeleteResponse {
        deleted: true,
        id: entry.id,
        path: entry.path,
    }))
}

#[derive(Debug, Serialize)]
pub struct SectionsResponse {
    pub id: String,
    pub sections: Vec<Section>,
}

pub(super) async fn list_sections(
    State(server): State<ApiServer>,
    Path(id): Path<String>,
) -> ApiResult<Json<SectionsResponse>> {
    server.validator.check_entry_id(&id)?;
    let sections = server.entries.sections(&id).await?;
    Ok(Json(SectionsResponse { id, sections }))
}

#[derive(Debug, Deserialize)]
pub struct SectionQuery {
    #[serde(rename = "includeSubsections")]
    pub include_subsections: Option<bool>,
}

pub(super) async fn get_section(
    State(server): State<ApiServer>,
    Path((id, title)): Path<(String, String)>,
    Query(query): Query<SectionQuery>,
) -> ApiResult<Json<ExtractedSection>> {
    server.validator.check_entry_id(&id)?;
    let section = server
        .entries
        .section(&id, &title, query.include_subsections.unwrap_or(true))
        .await?;
    Ok(Json(section))
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LinkedEntriesResponse {
    pub id: String,
    pub entries: Vec<EntrySummary>,
}

pub(super) async fn backlinks(
    State(server): State<ApiServer>,
    Path(id): Path<String>,
    Query(query): Query<LinkQuery>,
) -> ApiResult<Json<LinkedEntriesResponse>> {
    server.validator.check_entry_id(&id)?;
    let limit = check_limit(query.limit)?;
    let entries = server.entries.backlinks(&id, limit).await?;
    Ok(Json(LinkedEntriesResponse { id, entries }))
}

pub(super) async fn outlinks(
    State(server): State<ApiServer>,
    Path(id): Path<String>,
    Query(query): Query<LinkQuery>,
) -> ApiResult<Json<LinkedEntriesResponse>> {
    server.validator.check_entry_id(&id)?;
    let limit = check_limit(query.limit)?;
    let entries = server.entries.outlinks(&id, limit).await?;
    Ok(Json(LinkedEntriesResponse { id, entries }))
}

pub(super) async fn related(
    State(server): State<ApiServer>,
    Path(id): Path<String>,
    Query(query): Query<LinkQuery>,
) -> ApiResult<Json<LinkedEntriesResponse>> {
    server.validator.check_entry_id(&id)?;
    let limit = check_limit(query.limit)?;
    let entries = server.entries.related(&id, limit).await?;
    Ok(Json(LinkedEntriesResponse { id, entries }))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub id: String,
    pub last_verified: DateTime<Utc>,
}

pub(super) async fn verify_entry(
    State(server): State<ApiServer>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerifyResponse>> {
    server.validator.check_entry_id(&id)?;
    let last_verified = server.entries.verify(&id).await?;
    Ok(Json(VerifyResponse { id, last_verified }))
}
