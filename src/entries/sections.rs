//! Markdown section listing and extraction over h2/h3 headers.

use serde::{Deserialize, Serialize};

/// One section header found in a body. Line numbers are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub title: String,
    pub level: u8,
    pub start_line: usize,
    pub end_line: usize,
}

/// A single extracted section's content and its 1-based line range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedSection {
    pub title: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

fn header_level(line: &str) -> Option<u8> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match trimmed.as_bytes().get(hashes) {
        Some(b' ') => Some(hashes as u8),
        _ => None,
    }
}

fn header_title(line: &str) -> &str {
    line.trim_start().trim_start_matches('#').trim()
}

/// Lists h2 and h3 sections with their line spans.
pub fn parse_sections(content: &str) -> Vec<Section> {
    let lines: Vec<&str> = content.lines().collect();
    let mut sections = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let level = match header_level(line) {
            Some(level @ (2 | 3)) => level,
            _ => continue,
        };
        // The section runs until the next header of the same or higher
        // level, or end of document.
        let mut end = lines.len();
        for (j, later) in lines.iter().enumerate().skip(i + 1) {
            if let Some(other) = header_level(later) {
                if other <= level {
                    end = j;
                    break;
                }
            }
        }
        sections.push(Section {
            title: header_title(line).to_string(),
            level,
            start_line: i + 1,
            end_line: end,
        });
    }
    sections
}

/// Extracts one section by title, matched case-insensitively against h2
/// and h3 headers.
///
/// With `include_subsections`, the section ends at the next header of the
/// same or higher level; without, any next header ends it. Trailing blank
/// lines are trimmed from the content.
pub fn extract_section(
    content: &str,
    title: &str,
    include_subsections: bool,
) -> Option<ExtractedSection> {
    let lines: Vec<&str> = content.lines().collect();
    let wanted = title.trim().to_lowercase();

    let (header_idx, level) = lines.iter().enumerate().find_map(|(i, line)| {
        match header_level(line) {
            Some(level @ (2 | 3)) if header_title(line).to_lowercase() == wanted => {
                Some((i, level))
            }
            _ => None,
        }
    })?;

    let mut end = lines.len();
    for (j, later) in lines.iter().enumerate().skip(header_idx + 1) {
        if let Some(other) = header_level(later) {
            if !include_subsections || other <= level {
                end = j;
                break;
            }
        }
    }

    // Trim trailing blank lines off the content range.
    let mut last = end;
    while last > header_idx + 1 && lines[last - 1].trim().is_empty() {
        last -= 1;
    }

    let body_lines = &lines[header_idx + 1..last];
    Some(ExtractedSection {
        title: header_title(lines[header_idx]).to_string(),
        content: body_lines.join("\n"),
        start_line: header_idx + 2,
        end_line: last.max(header_idx + 1),
    })
}
