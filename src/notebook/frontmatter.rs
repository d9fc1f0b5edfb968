//! YAML frontmatter parsing and the manual write path.
//!
//! Reads delegate to `serde_yaml`. Writes never do: values that YAML would
//! reinterpret (flow indicators, anchors, comments, sentinels, padding)
//! are emitted through an escaping serializer so the file on disk always
//! round-trips to the same `Frontmatter`.

use crate::models::{EntryStatus, Frontmatter};
use crate::validation::{sanitize_free_text, sanitize_tags, sanitize_title};
use crate::{CortexError, Result};

const DELIMITER: &str = "---";

/// Characters that force a scalar onto the quoted write path.
const HOSTILE_CHARS: &[char] = &[
    ':', '#', '[', ']', '{', '}', '|', '<', '>', '!', '&', '*', '?', '`', '\'', '"', ',', '@', '%',
    '=', '\\',
];

/// Splits a markdown document into frontmatter and body.
///
/// The body starts on the line after the closing delimiter; a missing or
/// malformed block is a typed error, not a silent empty frontmatter.
pub fn parse(text: &str) -> Result<(Frontmatter, String)> {
    let rest = text.strip_prefix(DELIMITER).ok_or_else(|| {
        CortexError::invalid("frontmatter", "document does not start with '---'")
    })?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let mut block_end = None;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches('\n') == DELIMITER {
            block_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) = block_end.ok_or_else(|| {
        CortexError::invalid("frontmatter", "closing '---' delimiter not found")
    })?;

    let frontmatter: Frontmatter = serde_yaml::from_str(&rest[..yaml_end])?;
    Ok((frontmatter, rest[body_start..].to_string()))
}

/// Assembles a complete document from frontmatter and body.
pub fn compose(frontmatter: &Frontmatter, body: &str) -> String {
    let mut doc = serialize(frontmatter);
    doc.push_str(body);
    doc
}

/// Serializes frontmatter to a `---`-delimited block via the manual write
/// path. Key order is canonical so unchanged frontmatter is byte-stable.
pub fn serialize(frontmatter: &Frontmatter) -> String {
    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');

    write_scalar(&mut out, "id", &frontmatter.id);
    write_scalar(&mut out, "title", &frontmatter.title);
    write_scalar(&mut out, "type", frontmatter.entry_type.dir_name());
    write_scalar(&mut out, "status", frontmatter.status.as_str());
    if let Some(priority) = frontmatter.priority {
        write_scalar(&mut out, "priority", &priority.to_string());
    }
    write_list(&mut out, "tags", &frontmatter.tags);
    if let Some(project_id) = &frontmatter.project_id {
        write_scalar(&mut out, "project_id", project_id);
    }
    if let Some(created) = frontmatter.created {
        write_scalar(&mut out, "created", &created.to_rfc3339());
    }
    if let Some(modified) = frontmatter.modified {
        write_scalar(&mut out, "modified", &modified.to_rfc3339());
    }
    write_list(&mut out, "depends_on", &frontmatter.depends_on);
    if let Some(parent_id) = &frontmatter.parent_id {
        write_scalar(&mut out, "parent_id", parent_id);
    }
    if let Some(feature_id) = &frontmatter.feature_id {
        write_scalar(&mut out, "feature_id", feature_id);
    }
    if let Some(feature_priority) = frontmatter.feature_priority {
        write_scalar(&mut out, "feature_priority", &feature_priority.to_string());
    }
    write_list(&mut out, "feature_depends_on", &frontmatter.feature_depends_on);
    if let Some(workdir) = &frontmatter.workdir {
        write_scalar(&mut out, "workdir", workdir);
    }
    if let Some(worktree) = &frontmatter.worktree {
        write_scalar(&mut out, "worktree", worktree);
    }
    if let Some(git_remote) = &frontmatter.git_remote {
        write_scalar(&mut out, "git_remote", git_remote);
    }
    if let Some(git_branch) = &frontmatter.git_branch {
        write_scalar(&mut out, "git_branch", git_branch);
    }
    if let Some(request) = &frontmatter.user_original_request {
        write_scalar(&mut out, "user_original_request", request);
    }

    // Foreign fields round-trip through serde_yaml; their formatting is
    // not ours to define.
    for (key, value) in &frontmatter.extra {
        let mut single = std::collections::BTreeMap::new();
        single.insert(key.clone(), value.clone());
        if let Ok(fragment) = serde_yaml::to_string(&single) {
            out.push_str(&fragment);
        }
    }

    out.push_str(DELIMITER);
    out.push('\n');
    out
}

/// One `key: value` line on the manual write path, for surgical field
/// replacement inside an existing frontmatter block.
pub(crate) fn scalar_line(key: &str, value: &str) -> String {
    let mut line = String::new();
    write_scalar(&mut line, key, value);
    line
}

/// A `key:` block sequence on the manual write path.
pub(crate) fn list_block(key: &str, values: &[String]) -> String {
    if values.is_empty() {
        return format!("{key}: []\n");
    }
    let mut block = String::new();
    write_list(&mut block, key, values);
    block
}

/// Whether a value cannot be written as a plain YAML scalar.
pub fn is_hostile(value: &str) -> bool {
    value.is_empty()
        || value != value.trim()
        || value.contains('\n')
        || value.contains(DELIMITER)
        || value.chars().any(|c| HOSTILE_CHARS.contains(&c))
}

fn write_scalar(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    push_value(out, value);
    out.push('\n');
}

fn write_list(out: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    out.push_str(key);
    out.push_str(":\n");
    for value in values {
        out.push_str("  - ");
        push_value(out, value);
        out.push('\n');
    }
}

fn push_value(out: &mut String, value: &str) {
    if !is_hostile(value) {
        out.push_str(value);
        return;
    }
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
}

/// Sanitize pass applied to everything the entry service persists.
///
/// Status is stored only in the `status` field; a tag that duplicates a
/// status value is stripped here.
pub fn sanitize(frontmatter: &mut Frontmatter) {
    frontmatter.title = sanitize_title(&frontmatter.title);
    frontmatter.tags = sanitize_tags(&frontmatter.tags)
        .into_iter()
        .filter(|t| t.parse::<EntryStatus>().is_err() && !t.starts_with("status:"))
        .collect();
    frontmatter.depends_on = frontmatter
        .depends_on
        .iter()
        .map(|d| sanitize_free_text(d).trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    if let Some(request) = &frontmatter.user_original_request {
        frontmatter.user_original_request = Some(sanitize_free_text(request));
    }
}
