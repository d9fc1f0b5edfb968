//! Dependency-ref normalization and resolution.

use crate::models::Task;
use std::collections::HashMap;

/// A `depends_on` ref after normalization. The original form is retained
/// because titles may legitimately contain the characters normalization
/// strips meaning from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRef {
    pub raw: String,
    /// Local lookup key: id, filename stem, or title.
    pub key: String,
    /// Project qualifier from `project:ref` or a `projects/<p>/task/` path.
    pub project_hint: Option<String>,
}

fn is_project_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Normalizes a raw dependency ref: strips `.md`, strips a
/// `projects/<p>/task/` path prefix, splits `project:ref`.
pub fn normalize_ref(raw: &str) -> NormalizedRef {
    let raw = raw.trim();
    let mut key = raw.strip_suffix(".md").unwrap_or(raw).to_string();
    let mut project_hint = None;

    if let Some(rest) = key.strip_prefix("projects/") {
        if let Some((project, local)) = rest.split_once("/task/") {
            if is_project_token(project) && !local.is_empty() {
                project_hint = Some(project.to_string());
                key = local.to_string();
            }
        }
    } else if let Some((project, local)) = key.split_once(':') {
        let local = local.trim();
        if is_project_token(project) && !local.is_empty() {
            project_hint = Some(project.to_string());
            key = local.to_string();
        }
    }

    NormalizedRef {
        raw: raw.to_string(),
        key,
        project_hint,
    }
}

/// Tasks indexed for resolution: by id, then filename stem, then exact
/// title. First writer wins on collisions so resolution is deterministic
/// for a given input order.
pub(crate) struct TaskIndex {
    by_id: HashMap<String, usize>,
    by_stem: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
}

impl TaskIndex {
    pub(crate) fn build(tasks: &[Task]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_stem = HashMap::new();
        let mut by_title = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            by_id.entry(task.id.clone()).or_insert(i);
            if let Some(stem) = std::path::Path::new(&task.path)
                .file_stem()
                .and_then(|s| s.to_str())
            {
                by_stem.entry(stem.to_string()).or_insert(i);
            }
            by_title.entry(task.title.clone()).or_insert(i);
        }
        Self {
            by_id,
            by_stem,
            by_title,
        }
    }

    pub(crate) fn resolve(&self, reference: &NormalizedRef) -> Option<usize> {
        for candidate in [&reference.key, &reference.raw] {
            if let Some(&i) = self.by_id.get(candidate.as_str()) {
                return Some(i);
            }
            if let Some(&i) = self.by_stem.get(candidate.as_str()) {
                return Some(i);
            }
            if let Some(&i) = self.by_title.get(candidate.as_str()) {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_md_suffix() {
        let r = normalize_ref("b2c3d4e5.md");
        assert_eq!(r.key, "b2c3d4e5");
        assert!(r.project_hint.is_none());
    }

    #[test]
    fn strips_task_path_prefix() {
        let r = normalize_ref("projects/demo/task/b2c3d4e5-wire-up.md");
        assert_eq!(r.key, "b2c3d4e5-wire-up");
        assert_eq!(r.project_hint.as_deref(), Some("demo"));
    }

    #[test]
    fn splits_project_qualifier() {
        let r = normalize_ref("demo:b2c3d4e5");
        assert_eq!(r.key, "b2c3d4e5");
        assert_eq!(r.project_hint.as_deref(), Some("demo"));
    }

    #[test]
    fn retains_raw_for_title_lookups() {
        // A title containing a colon splits like a qualifier; the raw form
        // still resolves by exact title.
        let r = normalize_ref("design: the hard part");
        assert_eq!(r.raw, "design: the hard part");
        assert_eq!(r.key, "the hard part");
    }
}
