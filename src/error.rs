use thiserror::Error;

/// Convenience type alias for Results with CortexError
pub type Result<T> = std::result::Result<T, CortexError>;

/// A suggested entry returned when a title lookup is ambiguous.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MatchSuggestion {
    pub id: String,
    pub title: String,
    pub path: String,
}

/// A single field-level validation failure, surfaced in 400 responses.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Main error type for Cortex Core
///
/// Every service emits these typed variants; the HTTP layer maps them
/// mechanically to status codes and the runner decides retryability from
/// them. Nothing is retried below the service boundary.
#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous match for '{reference}': {} candidates", suggestions.len())]
    AmbiguousMatch {
        reference: String,
        suggestions: Vec<MatchSuggestion>,
    },

    #[error("Claim conflict: task {task_id} held by {claimed_by}")]
    ClaimConflict {
        task_id: String,
        claimed_by: String,
        claimed_at: chrono::DateTime<chrono::Utc>,
        is_stale: bool,
    },

    #[error("Notebook backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frontmatter error: {0}")]
    Frontmatter(#[from] serde_yaml::Error),

    #[error("Metadata store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("API request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Runner error: {message}")]
    Runner { message: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CortexError {
    /// Shorthand for a single-field validation error.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        CortexError::Validation {
            message: format!("{field}: {message}"),
            details: vec![FieldError {
                field: field.to_string(),
                message,
            }],
        }
    }

    /// Whether the runner may retry after one poll interval. Network
    /// failures and a missing backend are transient; everything else is
    /// either a task outcome or a bug.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CortexError::Http(_) | CortexError::BackendUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_builds_single_detail() {
        let err = CortexError::invalid("limit", "must be >= 1");
        match err {
            CortexError::Validation { details, .. } => {
                assert_eq!(details.len(), 1);
                assert_eq!(details[0].field, "limit");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn retryable_split() {
        assert!(CortexError::BackendUnavailable("nb".into()).is_retryable());
        assert!(!CortexError::NotFound("x".into()).is_retryable());
    }
}
