//! HTTP surface: a thin translation layer over the services.
//!
//! Handlers validate parameters, delegate, and map typed errors to status
//! codes. No behavior lives here.

mod entries;
mod features;
mod search;
mod tasks;

#[cfg(test)]
mod tests;

use crate::claims::ClaimRegistry;
use crate::config::{ApiConfig, Config};
use crate::entries::EntryService;
use crate::error::{FieldError, MatchSuggestion};
use crate::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::validation::ParamValidator;
use crate::{CortexError, Result};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

const SERVICE_NAME: &str = "cortex-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Route definitions live here; handlers must not inline paths.
const ROUTE_HEALTH: &str = "/health";
const ROUTE_ENTRIES: &str = "/entries";
const ROUTE_ENTRY_SECTIONS: &str = "/entries/{id}/sections";
const ROUTE_ENTRY_SECTION: &str = "/entries/{id}/sections/{title}";
const ROUTE_ENTRY_BACKLINKS: &str = "/entries/{id}/backlinks";
const ROUTE_ENTRY_OUTLINKS: &str = "/entries/{id}/outlinks";
const ROUTE_ENTRY_RELATED: &str = "/entries/{id}/related";
const ROUTE_ENTRY_VERIFY: &str = "/entries/{id}/verify";
const ROUTE_ENTRY_BY_REF: &str = "/entries/{*reference}";
const ROUTE_SEARCH: &str = "/search";
const ROUTE_INJECT: &str = "/inject";
const ROUTE_LINK: &str = "/link";
const ROUTE_STATS: &str = "/stats";
const ROUTE_ORPHANS: &str = "/orphans";
const ROUTE_STALE: &str = "/stale";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASKS_PROJECT: &str = "/tasks/{project_id}";
const ROUTE_TASKS_READY: &str = "/tasks/{project_id}/ready";
const ROUTE_TASKS_WAITING: &str = "/tasks/{project_id}/waiting";
const ROUTE_TASKS_BLOCKED: &str = "/tasks/{project_id}/blocked";
const ROUTE_TASKS_NEXT: &str = "/tasks/{project_id}/next";
const ROUTE_TASK_CLAIM: &str = "/tasks/{project_id}/{task_id}/claim";
const ROUTE_TASK_RELEASE: &str = "/tasks/{project_id}/{task_id}/release";
const ROUTE_TASK_CLAIM_STATUS: &str = "/tasks/{project_id}/{task_id}/claim-status";
const ROUTE_FEATURES_PROJECT: &str = "/features/{project_id}";
const ROUTE_FEATURES_READY: &str = "/features/{project_id}/ready";
const ROUTE_FEATURES_WAITING: &str = "/features/{project_id}/waiting";
const ROUTE_FEATURES_BLOCKED: &str = "/features/{project_id}/blocked";
const ROUTE_FEATURES_NEXT: &str = "/features/{project_id}/next";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    entries: Arc<EntryService>,
    claims: Arc<ClaimRegistry>,
    validator: ParamValidator,
}

impl ApiServer {
    pub fn new(
        config: &Config,
        entries: Arc<EntryService>,
        claims: Arc<ClaimRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            config: config.api.clone(),
            entries,
            claims,
            validator: ParamValidator::new()?,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await?;
        info!(
            "API server listening on {}:{}",
            self.config.host, self.config.port
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE]);

        let api = Router::new()
            .route(ROUTE_HEALTH, get(health))
            .route(ROUTE_ENTRIES, post(entries::create_entry))
            .route(ROUTE_ENTRIES, get(entries::list_entries))
            .route(ROUTE_ENTRY_SECTIONS, get(entries::list_sections))
            .route(ROUTE_ENTRY_SECTION, get(entries::get_section))
            .route(ROUTE_ENTRY_BACKLINKS, get(entries::backlinks))
            .route(ROUTE_ENTRY_OUTLINKS, get(entries::outlinks))
            .route(ROUTE_ENTRY_RELATED, get(entries::related))
            .route(ROUTE_ENTRY_VERIFY, post(entries::verify_entry))
            .route(ROUTE_ENTRY_BY_REF, get(entries::get_entry))
            .route(ROUTE_ENTRY_BY_REF, patch(entries::update_entry))
            .route(ROUTE_ENTRY_BY_REF, delete(entries::delete_entry))
            .route(ROUTE_SEARCH, post(search::search))
            .route(ROUTE_INJECT, post(search::inject))
            .route(ROUTE_LINK, post(search::link))
            .route(ROUTE_STATS, get(search::stats))
            .route(ROUTE_ORPHANS, get(search::orphans))
            .route(ROUTE_STALE, get(search::stale))
            .route(ROUTE_TASKS, get(tasks::list_projects))
            .route(ROUTE_TASKS_PROJECT, get(tasks::project_report))
            .route(ROUTE_TASKS_READY, get(tasks::ready))
            .route(ROUTE_TASKS_WAITING, get(tasks::waiting))
            .route(ROUTE_TASKS_BLOCKED, get(tasks::blocked))
            .route(ROUTE_TASKS_NEXT, get(tasks::next))
            .route(ROUTE_TASK_CLAIM, post(tasks::claim))
            .route(ROUTE_TASK_RELEASE, post(tasks::release))
            .route(ROUTE_TASK_CLAIM_STATUS, get(tasks::claim_status))
            .route(ROUTE_FEATURES_PROJECT, get(features::project_report))
            .route(ROUTE_FEATURES_READY, get(features::ready))
            .route(ROUTE_FEATURES_WAITING, get(features::waiting))
            .route(ROUTE_FEATURES_BLOCKED, get(features::blocked))
            .route(ROUTE_FEATURES_NEXT, get(features::next));

        let rate_limit = RateLimitState::new();
        Router::new()
            .route(ROUTE_HEALTH, get(health))
            .nest("/api/v1", api)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(
                        rate_limit,
                        rate_limit_middleware,
                    ))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(rename = "backendAvailable")]
    backend_available: bool,
    #[serde(rename = "dbAvailable")]
    db_available: bool,
    timestamp: String,
}

async fn health(State(server): State<ApiServer>) -> Json<HealthResponse> {
    let backend_available = server.entries.notebook().supports_search();
    let db_available = server.entries.metadata().is_available().await;
    let status = if !db_available {
        "unhealthy"
    } else if !backend_available {
        "degraded"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        backend_available,
        db_available,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Typed-error to HTTP mapping; every handler returns `ApiResult<T>`.
pub(crate) struct ApiError(pub CortexError);

pub(crate) type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<CortexError> for ApiError {
    fn from(err: CortexError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestions: Option<Vec<MatchSuggestion>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            CortexError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: message,
                    details: Some(details),
                    suggestions: None,
                }),
            )
                .into_response(),
            CortexError::AmbiguousMatch {
                reference,
                suggestions,
            } => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: format!("Ambiguous match for '{reference}'"),
                    details: None,
                    suggestions: Some(suggestions),
                }),
            )
                .into_response(),
            CortexError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("Not found: {what}"),
                    details: None,
                    suggestions: None,
                }),
            )
                .into_response(),
            CortexError::ClaimConflict {
                task_id,
                claimed_by,
                claimed_at,
                is_stale,
            } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": format!("Task {task_id} is already claimed"),
                    "claimedBy": claimed_by,
                    "claimedAt": claimed_at,
                    "isStale": is_stale,
                })),
            )
                .into_response(),
            CortexError::BackendUnavailable(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: format!("Backend unavailable: {reason}"),
                    details: None,
                    suggestions: None,
                }),
            )
                .into_response(),
            other => {
                error!("Internal error serving request: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "Internal server error".to_string(),
                        details: None,
                        suggestions: None,
                    }),
                )
                    .into_response()
            }
        }
    }
}
