use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::ENTRY_ID_LENGTH;

/// Kind of knowledge or work an entry holds
///
/// The variant name doubles as the on-disk directory name under
/// `global/` or `projects/<p>/`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Summary,
    Report,
    Walkthrough,
    Plan,
    Pattern,
    Learning,
    Idea,
    Scratch,
    Decision,
    Exploration,
    Execution,
    Task,
}

impl EntryType {
    pub const ALL: [EntryType; 12] = [
        EntryType::Summary,
        EntryType::Report,
        EntryType::Walkthrough,
        EntryType::Plan,
        EntryType::Pattern,
        EntryType::Learning,
        EntryType::Idea,
        EntryType::Scratch,
        EntryType::Decision,
        EntryType::Exploration,
        EntryType::Execution,
        EntryType::Task,
    ];

    /// Directory name for this type on disk.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntryType::Summary => "summary",
            EntryType::Report => "report",
            EntryType::Walkthrough => "walkthrough",
            EntryType::Plan => "plan",
            EntryType::Pattern => "pattern",
            EntryType::Learning => "learning",
            EntryType::Idea => "idea",
            EntryType::Scratch => "scratch",
            EntryType::Decision => "decision",
            EntryType::Exploration => "exploration",
            EntryType::Execution => "execution",
            EntryType::Task => "task",
        }
    }

    /// Tasks start life as drafts; every other type is active on creation.
    pub fn default_status(&self) -> EntryStatus {
        match self {
            EntryType::Task => EntryStatus::Draft,
            _ => EntryStatus::Active,
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .iter()
            .copied()
            .find(|t| t.dir_name() == s)
            .ok_or_else(|| format!("Unknown entry type: {s}"))
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Lifecycle status of an entry
///
/// `cancelled` does not appear in newly created entries but participates in
/// dependency classification, so the enum carries it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Draft,
    Pending,
    Active,
    InProgress,
    Blocked,
    Completed,
    Validated,
    Superseded,
    Archived,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Pending => "pending",
            EntryStatus::Active => "active",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Blocked => "blocked",
            EntryStatus::Completed => "completed",
            EntryStatus::Validated => "validated",
            EntryStatus::Superseded => "superseded",
            EntryStatus::Archived => "archived",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    /// A dependency with this status no longer gates anything.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Validated)
    }

    /// A dependency with this status blocks its dependents outright.
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            EntryStatus::Blocked
                | EntryStatus::Cancelled
                | EntryStatus::Superseded
                | EntryStatus::Archived
        )
    }

    /// An ancestor with this status neither blocks nor delays children.
    pub fn clears_children(&self) -> bool {
        matches!(
            self,
            EntryStatus::Completed
                | EntryStatus::Validated
                | EntryStatus::Active
                | EntryStatus::InProgress
        )
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EntryStatus::Draft),
            "pending" => Ok(EntryStatus::Pending),
            "active" => Ok(EntryStatus::Active),
            "in_progress" => Ok(EntryStatus::InProgress),
            "blocked" => Ok(EntryStatus::Blocked),
            "completed" => Ok(EntryStatus::Completed),
            "validated" => Ok(EntryStatus::Validated),
            "superseded" => Ok(EntryStatus::Superseded),
            "archived" => Ok(EntryStatus::Archived),
            "cancelled" => Ok(EntryStatus::Cancelled),
            _ => Err(format!("Unknown status: {s}")),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority levels
///
/// Scheduling projections order high before medium before low; a task
/// without a priority sorts as medium.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort key: lower ranks schedule first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    /// Rank applied to tasks that carry no priority at all.
    pub fn rank_or_default(p: Option<Priority>) -> u8 {
        p.unwrap_or(Priority::Medium).rank()
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        })
    }
}

/// Parsed YAML frontmatter of an entry file.
///
/// Fields the system does not know about are preserved in `extra` so that
/// updates can round-trip foreign metadata untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frontmatter {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    // Task-only extensions. Duplicated refs in depends_on are tolerated
    // and deduplicated during normalization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_original_request: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Frontmatter {
    pub fn new(id: String, title: String, entry_type: EntryType) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            entry_type,
            status: entry_type.default_status(),
            priority: None,
            tags: Vec::new(),
            project_id: None,
            created: Some(now),
            modified: Some(now),
            depends_on: Vec::new(),
            parent_id: None,
            feature_id: None,
            feature_priority: None,
            feature_depends_on: Vec::new(),
            workdir: None,
            worktree: None,
            git_remote: None,
            git_branch: None,
            user_original_request: None,
            extra: BTreeMap::new(),
        }
    }
}

/// A persisted unit of knowledge or work: frontmatter plus markdown body,
/// addressed by an 8-char id that is injective with its path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: String,
    pub path: String,
    pub frontmatter: Frontmatter,
    pub body: String,
}

impl Entry {
    pub fn title(&self) -> &str {
        &self.frontmatter.title
    }

    pub fn entry_type(&self) -> EntryType {
        self.frontmatter.entry_type
    }

    pub fn status(&self) -> EntryStatus {
        self.frontmatter.status
    }
}

/// An entry of `type=task`, reinterpreted for the dependency engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub path: String,
    pub title: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_original_request: Option<String>,
}

impl Task {
    /// Reinterpret an entry as a task. Returns `None` for other types.
    pub fn from_entry(entry: &Entry) -> Option<Task> {
        if entry.entry_type() != EntryType::Task {
            return None;
        }
        let fm = &entry.frontmatter;
        Some(Task {
            id: entry.id.clone(),
            path: entry.path.clone(),
            title: fm.title.clone(),
            status: fm.status,
            priority: fm.priority,
            created: fm.created,
            depends_on: fm.depends_on.clone(),
            parent_id: fm.parent_id.clone(),
            feature_id: fm.feature_id.clone(),
            feature_priority: fm.feature_priority,
            feature_depends_on: fm.feature_depends_on.clone(),
            workdir: fm.workdir.clone(),
            worktree: fm.worktree.clone(),
            user_original_request: fm.user_original_request.clone(),
        })
    }
}

/// Scheduling status derived from a task's own state and its
/// dependency/parent context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Ready,
    Waiting,
    WaitingOnParent,
    Blocked,
    BlockedByParent,
    NotPending,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Ready => "ready",
            Classification::Waiting => "waiting",
            Classification::WaitingOnParent => "waiting_on_parent",
            Classification::Blocked => "blocked",
            Classification::BlockedByParent => "blocked_by_parent",
            Classification::NotPending => "not_pending",
        })
    }
}

/// Why a task classified as `blocked`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    CircularDependency,
    DependencyBlocked,
}

/// A task enriched with everything the dependency engine derived for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedTask {
    #[serde(flatten)]
    pub task: Task,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by_reason: Option<BlockReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_on: Vec<String>,
    pub in_cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_workdir: Option<PathBuf>,
}

/// Counts per classification for one engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DependencyStats {
    pub total: usize,
    pub ready: usize,
    pub waiting: usize,
    pub waiting_on_parent: usize,
    pub blocked: usize,
    pub blocked_by_parent: usize,
    pub not_pending: usize,
    pub in_cycle: usize,
    pub unresolved_refs: usize,
}

/// Full output of one dependency-engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub tasks: Vec<ClassifiedTask>,
    pub cycles: Vec<Vec<String>>,
    pub stats: DependencyStats,
}

/// Aggregated status of one feature group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    InProgress,
    Blocked,
    Completed,
    Ready,
    Waiting,
}

/// Per-feature task counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureTaskStats {
    pub total: usize,
    pub ready: usize,
    pub waiting: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// A named group of tasks sharing a `feature_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub priority: Priority,
    pub status: FeatureStatus,
    pub task_stats: FeatureTaskStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_on_features: Vec<String>,
}

/// Full output of one feature-engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureReport {
    pub features: Vec<Feature>,
    pub cycles: Vec<Vec<String>>,
}

/// Generates a fresh 8-char lowercase-alphanumeric entry id.
pub fn generate_entry_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..ENTRY_ID_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Reduces a title to a filesystem-safe slug for `<id>-<slug>.md` names.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(60).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_shape() {
        let id = generate_entry_id();
        assert_eq!(id.len(), ENTRY_ID_LENGTH);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Fix: the  (parser)!"), "fix-the-parser");
        assert_eq!(slugify("***"), "untitled");
    }

    #[test]
    fn task_defaults_to_draft() {
        assert_eq!(EntryType::Task.default_status(), EntryStatus::Draft);
        assert_eq!(EntryType::Plan.default_status(), EntryStatus::Active);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
        assert_eq!(Priority::rank_or_default(None), Priority::Medium.rank());
    }

    #[test]
    fn status_round_trip() {
        for s in [
            "draft",
            "pending",
            "active",
            "in_progress",
            "blocked",
            "completed",
            "validated",
            "superseded",
            "archived",
            "cancelled",
        ] {
            let parsed: EntryStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn task_from_entry_requires_task_type() {
        let fm = Frontmatter::new("abcd1234".into(), "A plan".into(), EntryType::Plan);
        let entry = Entry {
            id: "abcd1234".into(),
            path: "global/plan/abcd1234-a-plan.md".into(),
            frontmatter: fm,
            body: String::new(),
        };
        assert!(Task::from_entry(&entry).is_none());
    }
}
