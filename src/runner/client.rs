//! Typed API client the runner polls with.
//!
//! Thin wrapper over reqwest: every call maps HTTP failures back into the
//! shared error taxonomy so the scheduler can tell retryable conditions
//! (network, 503) from bugs (4xx from our own API).

use crate::claims::ClaimStatus;
use crate::models::{ClassifiedTask, DependencyReport, EntryStatus};
use crate::{CortexError, Result};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthInfo {
    pub status: String,
    #[serde(rename = "backendAvailable", default)]
    pub backend_available: bool,
    #[serde(rename = "dbAvailable", default)]
    pub db_available: bool,
}

impl HealthInfo {
    pub fn is_usable(&self) -> bool {
        self.status == "healthy" || self.status == "degraded"
    }
}

#[derive(Debug, Deserialize)]
struct ProjectsBody {
    projects: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectionBody {
    tasks: Vec<ClassifiedTask>,
}

#[derive(Debug, Deserialize)]
struct ClaimGrantedBody {
    #[serde(rename = "claimedAt")]
    claimed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ClaimConflictBody {
    #[serde(rename = "claimedBy")]
    claimed_by: String,
    #[serde(rename = "claimedAt")]
    claimed_at: DateTime<Utc>,
    #[serde(rename = "isStale", default)]
    is_stale: bool,
}

#[derive(Debug, Deserialize)]
struct ClaimStatusBody {
    #[serde(default)]
    claim: Option<ClaimStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDetail {
    pub id: String,
    pub title: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub content: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn expect_ok<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(error_for(status, what, response).await)
    }

    pub async fn health(&self) -> Result<HealthInfo> {
        let response = self.http.get(self.url("/health")).send().await?;
        Self::expect_ok(response, "health").await
    }

    pub async fn projects(&self) -> Result<Vec<String>> {
        let response = self.http.get(self.url("/api/v1/tasks")).send().await?;
        let body: ProjectsBody = Self::expect_ok(response, "projects").await?;
        Ok(body.projects)
    }

    pub async fn ready_tasks(&self, project: &str) -> Result<Vec<ClassifiedTask>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/tasks/{project}/ready")))
            .send()
            .await?;
        let body: ProjectionBody = Self::expect_ok(response, "ready tasks").await?;
        Ok(body.tasks)
    }

    /// The project's full classified report; the runner filters it for
    /// reconciliation.
    pub async fn project_report(&self, project: &str) -> Result<DependencyReport> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/tasks/{project}")))
            .send()
            .await?;
        Self::expect_ok(response, "project report").await
    }

    pub async fn in_progress_tasks(&self, project: &str) -> Result<Vec<ClassifiedTask>> {
        let report = self.project_report(project).await?;
        Ok(report
            .tasks
            .into_iter()
            .filter(|t| t.task.status == EntryStatus::InProgress)
            .collect())
    }

    /// Attempts a claim. Conflicts surface as `ClaimConflict`.
    pub async fn claim(
        &self,
        project: &str,
        task_id: &str,
        runner_id: &str,
    ) -> Result<DateTime<Utc>> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/tasks/{project}/{task_id}/claim")))
            .json(&serde_json::json!({ "runnerId": runner_id }))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                let body: ClaimGrantedBody = response.json().await?;
                Ok(body.claimed_at)
            }
            StatusCode::CONFLICT => {
                let body: ClaimConflictBody = response.json().await?;
                Err(CortexError::ClaimConflict {
                    task_id: task_id.to_string(),
                    claimed_by: body.claimed_by,
                    claimed_at: body.claimed_at,
                    is_stale: body.is_stale,
                })
            }
            status => Err(error_for(status, "claim", response).await),
        }
    }

    pub async fn release(&self, project: &str, task_id: &str) -> Result<bool> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/tasks/{project}/{task_id}/release")))
            .send()
            .await?;
        #[derive(Deserialize)]
        struct Body {
            released: bool,
        }
        let body: Body = Self::expect_ok(response, "release").await?;
        Ok(body.released)
    }

    pub async fn claim_status(&self, project: &str, task_id: &str) -> Result<Option<ClaimStatus>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/tasks/{project}/{task_id}/claim-status")))
            .send()
            .await?;
        let body: ClaimStatusBody = Self::expect_ok(response, "claim status").await?;
        Ok(body.claim)
    }

    /// Transitions a task's status, optionally appending a note.
    pub async fn set_status(
        &self,
        task_id: &str,
        status: EntryStatus,
        note: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({ "status": status });
        if let Some(note) = note {
            body["note"] = serde_json::Value::String(note.to_string());
        }
        let response = self
            .http
            .patch(self.url(&format!("/api/v1/entries/{task_id}")))
            .json(&body)
            .send()
            .await?;
        let _: serde_json::Value = Self::expect_ok(response, "status update").await?;
        Ok(())
    }

    pub async fn task_detail(&self, task_id: &str) -> Result<TaskDetail> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/entries/{task_id}")))
            .send()
            .await?;
        Self::expect_ok(response, "task detail").await
    }
}

async fn error_for(status: StatusCode, what: &str, response: reqwest::Response) -> CortexError {
    let body = response.text().await.unwrap_or_default();
    let detail = body.chars().take(200).collect::<String>();
    match status {
        StatusCode::NOT_FOUND => CortexError::NotFound(format!("{what}: {detail}")),
        StatusCode::SERVICE_UNAVAILABLE => CortexError::BackendUnavailable(detail),
        status if status.is_client_error() => CortexError::Runner {
            message: format!("{what} rejected with {status}: {detail}"),
        },
        status => CortexError::Runner {
            message: format!("{what} failed with {status}: {detail}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::ServerGuard) -> ApiClient {
        ApiClient::new(server.url(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn health_parses_degraded() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"degraded","backendAvailable":false,"dbAvailable":true}"#)
            .create_async()
            .await;
        let health = client(&server).health().await.unwrap();
        assert!(health.is_usable());
        assert!(!health.backend_available);
    }

    #[tokio::test]
    async fn claim_conflict_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v1/tasks/demo/a1b2c3d4/claim")
            .with_status(409)
            .with_body(
                r#"{"error":"held","claimedBy":"runner-9","claimedAt":"2026-07-01T00:00:00Z","isStale":false}"#,
            )
            .create_async()
            .await;
        let err = client(&server)
            .claim("demo", "a1b2c3d4", "runner-1")
            .await
            .unwrap_err();
        match err {
            CortexError::ClaimConflict {
                claimed_by,
                is_stale,
                ..
            } => {
                assert_eq!(claimed_by, "runner-9");
                assert!(!is_stale);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ready_tasks_deserialize() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/tasks/demo/ready")
            .with_status(200)
            .with_body(
                r#"{"project":"demo","count":1,"tasks":[{
                    "id":"a1b2c3d4","path":"projects/demo/task/a1b2c3d4-x.md","title":"X",
                    "status":"pending","classification":"ready","in_cycle":false
                }]}"#,
            )
            .create_async()
            .await;
        let tasks = client(&server).ready_tasks("demo").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task.id, "a1b2c3d4");
    }

    #[tokio::test]
    async fn our_own_4xx_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/tasks/demo/ready")
            .with_status(400)
            .with_body(r#"{"error":"bad"}"#)
            .create_async()
            .await;
        let err = client(&server).ready_tasks("demo").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn network_errors_are_retryable() {
        // Point at a port nothing listens on.
        let api = ApiClient::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let err = api.health().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
