//! System-wide constants shared by the server and the runner.

/// Length of an entry id: 8 lowercase-alphanumeric characters derived from
/// the file name.
pub const ENTRY_ID_LENGTH: usize = 8;

/// A claim older than this may be overridden by another runner.
pub const CLAIM_STALE_MS: u64 = 5 * 60 * 1000;

/// How long a successful health probe is trusted before re-checking.
pub const HEALTH_CACHE_SECS: u64 = 10;

/// Grace period between SIGTERM and SIGKILL when cancelling a child.
pub const CHILD_TERM_GRACE_SECS: u64 = 5;

/// Default wall-clock budget for a single API call from the runner.
pub const API_TIMEOUT_SECS: u64 = 30;

/// Default scheduler poll interval.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default cap on concurrently running agent processes per project.
pub const DEFAULT_MAX_PARALLEL: usize = 2;

/// Search result snippets are truncated to this many characters.
pub const SEARCH_SNIPPET_LENGTH: usize = 150;

/// Hard cap applied to `limit` query parameters.
pub const MAX_LIST_LIMIT: usize = 100;

/// Default page size when `limit` is omitted.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Bounds for the `days` parameter of stale-entry listing.
pub const STALE_DAYS_MIN: u32 = 1;
pub const STALE_DAYS_MAX: u32 = 365;

/// Maximum number of suggestions attached to an ambiguous-title error.
pub const MAX_MATCH_SUGGESTIONS: usize = 5;

/// Directory name (under a project root) that marks a project as having
/// schedulable tasks.
pub const TASK_DIR_NAME: &str = "task";

/// Subdirectory of the notebook root holding entries with no project.
pub const GLOBAL_DIR_NAME: &str = "global";

/// Subdirectory of the notebook root holding per-project trees.
pub const PROJECTS_DIR_NAME: &str = "projects";
