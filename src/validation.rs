//! Request-parameter validation and free-text sanitization.
//!
//! The HTTP surface validates every path and query parameter against these
//! helpers before touching a service; the entry service runs the sanitize
//! pass on everything it persists.

use crate::constants::{
    DEFAULT_LIST_LIMIT, ENTRY_ID_LENGTH, MAX_LIST_LIMIT, STALE_DAYS_MAX, STALE_DAYS_MIN,
};
use crate::{CortexError, Result};
use regex::Regex;
use std::sync::LazyLock;

const PROJECT_ID_REGEX_SRC: &str = r"^[A-Za-z0-9_-]+$";
const ENTRY_ID_REGEX_SRC: &str = r"^[a-z0-9]{8}$";

/// Entry-id pattern shared with `validator`-derived request structs.
pub static ENTRY_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ENTRY_ID_REGEX_SRC).expect("literal pattern"));

/// Compiled parameter patterns, built once per server.
#[derive(Debug, Clone)]
pub struct ParamValidator {
    project_id: Regex,
    entry_id: Regex,
}

impl ParamValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            project_id: Regex::new(PROJECT_ID_REGEX_SRC)
                .map_err(|e| CortexError::ConfigurationError(format!("bad pattern: {e}")))?,
            entry_id: Regex::new(ENTRY_ID_REGEX_SRC)
                .map_err(|e| CortexError::ConfigurationError(format!("bad pattern: {e}")))?,
        })
    }

    pub fn check_project_id(&self, value: &str) -> Result<()> {
        if self.project_id.is_match(value) {
            Ok(())
        } else {
            Err(CortexError::invalid(
                "projectId",
                "must match [A-Za-z0-9_-]+",
            ))
        }
    }

    pub fn check_entry_id(&self, value: &str) -> Result<()> {
        if self.entry_id.is_match(value) {
            Ok(())
        } else {
            Err(CortexError::invalid(
                "id",
                format!("must be {ENTRY_ID_LENGTH} lowercase alphanumeric characters"),
            ))
        }
    }

    /// Whether a ref has the shape of an entry id (as opposed to a path or
    /// title).
    pub fn looks_like_entry_id(&self, value: &str) -> bool {
        self.entry_id.is_match(value)
    }
}

/// Clamp an optional `limit` to `[1, MAX_LIST_LIMIT]`, defaulting when
/// absent. Zero and negative values are rejected rather than clamped.
pub fn check_limit(limit: Option<i64>) -> Result<usize> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(n) if n < 1 => Err(CortexError::invalid("limit", "must be >= 1")),
        Some(n) => Ok((n as usize).min(MAX_LIST_LIMIT)),
    }
}

/// Validate the `days` window for stale-entry listing.
pub fn check_stale_days(days: Option<i64>) -> Result<u32> {
    let days = days.unwrap_or(30);
    if days < STALE_DAYS_MIN as i64 || days > STALE_DAYS_MAX as i64 {
        return Err(CortexError::invalid(
            "days",
            format!("must be within [{STALE_DAYS_MIN}, {STALE_DAYS_MAX}]"),
        ));
    }
    Ok(days as u32)
}

/// Trim control characters from a title before persisting it.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Strip carriage returns and NULs from free text.
pub fn sanitize_free_text(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\0').collect()
}

/// Drop empty tags and sanitize the survivors.
pub fn sanitize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| sanitize_title(t))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Escape embedded quotes and backslashes in a dependency ref so it stays
/// a single YAML scalar on write.
pub fn escape_dep_ref(reference: &str) -> String {
    reference.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_pattern() {
        let v = ParamValidator::new().unwrap();
        assert!(v.check_project_id("my-project_2").is_ok());
        assert!(v.check_project_id("bad/project").is_err());
        assert!(v.check_project_id("").is_err());
    }

    #[test]
    fn entry_id_pattern() {
        let v = ParamValidator::new().unwrap();
        assert!(v.check_entry_id("a1b2c3d4").is_ok());
        assert!(v.check_entry_id("A1B2C3D4").is_err());
        assert!(v.check_entry_id("a1b2c3").is_err());
        assert!(v.looks_like_entry_id("zzzz9999"));
        assert!(!v.looks_like_entry_id("global/plan/x.md"));
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(check_limit(None).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(check_limit(Some(500)).unwrap(), MAX_LIST_LIMIT);
        assert!(check_limit(Some(0)).is_err());
    }

    #[test]
    fn stale_days_bounds() {
        assert_eq!(check_stale_days(None).unwrap(), 30);
        assert!(check_stale_days(Some(0)).is_err());
        assert!(check_stale_days(Some(366)).is_err());
        assert_eq!(check_stale_days(Some(365)).unwrap(), 365);
    }

    #[test]
    fn sanitizers() {
        assert_eq!(sanitize_title("  a\u{0000}title\u{0007} "), "atitle");
        assert_eq!(sanitize_free_text("a\r\nb\0"), "a\nb");
        assert_eq!(
            sanitize_tags(&["ok".into(), "  ".into(), "\u{0001}".into()]),
            vec!["ok".to_string()]
        );
        assert_eq!(escape_dep_ref(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
