//! Heuristic document classification: path + content → [`DocumentKind`].
//!
//! Ordered rule list, first decisive rule wins:
//!
//! 1. archive marker anywhere in the path → archived variant of whatever the
//!    remaining rules decide
//! 2. standards root / standards filename → status line, then section
//!    headings, then directory default
//! 3. todo / tasks / incidents roots → content markers beat the directory
//! 4. projects root → `Project`, unless the file embeds a standard
//! 5. standard section headings anywhere → `Standard`
//! 6. otherwise `Unknown`
//!
//! Every rule is a pure function over `(path, Option<content>)`; `classify`
//! never fails, and a file that could not be read degrades to path-only
//! heuristics. The corpus is bilingual, so every marker set carries both the
//! Russian and the English spelling.

use crate::DocumentKind;
use std::path::Path;

// ============================================================================
// Marker tables
// ============================================================================

/// Substrings of a path component that mark the file as archived.
const ARCHIVE_PATH_MARKERS: &[&str] = &["archive", ".bak", "backup"];

/// Heading substrings that identify a standard (mini-manifest shape).
const STANDARD_HEADING_MARKERS: &[&str] = &[
    "цель",
    "purpose",
    "mini-manifest",
    "мини-манифест",
    "glossary",
    "глоссарий",
];

/// Status-line values that retire a standard.
const RETIRED_STATUS_VALUES: &[&str] = &["архив", "archived", "черновик", "draft"];

/// Heading substrings that mark incident write-ups.
const INCIDENT_HEADING_MARKERS: &[&str] = &["инцидент", "incident", "postmortem", "разбор"];

/// Heading substrings that mark task lists.
const TASK_HEADING_MARKERS: &[&str] = &["задач", "action items", "план действий"];

/// Checkbox prefixes that mark task lists.
const TASK_CHECKBOX_PREFIXES: &[&str] = &["- [ ]", "- [x]", "- [X]"];

// ============================================================================
// Entry point
// ============================================================================

/// Classify a corpus file. Pure and deterministic; `content` is `None` when
/// the file could not be read.
pub fn classify(path: &Path, content: Option<&str>) -> DocumentKind {
    let live = classify_live(path, content);
    if path_is_archived(path) {
        live.archived()
    } else {
        live
    }
}

/// Rules 2..6: classification ignoring archive markers.
fn classify_live(path: &Path, content: Option<&str>) -> DocumentKind {
    by_standards_path(path, content)
        .or_else(|| by_task_incident_path(path, content))
        .or_else(|| by_projects_path(path, content))
        .or_else(|| by_standard_headings(content))
        .unwrap_or(DocumentKind::Unknown)
}

// ============================================================================
// Rules
// ============================================================================

/// Rule 1: any path component containing an archive marker.
fn path_is_archived(path: &Path) -> bool {
    components_lower(path).any(|component| {
        ARCHIVE_PATH_MARKERS
            .iter()
            .any(|marker| component.contains(marker))
    })
}

/// Rule 2: standards by path.
///
/// Inside the standards tree a retired status line wins over headings, and
/// the directory alone is enough (a headerless file there is still a
/// standard). A standards-*named* file outside that tree needs content
/// evidence and otherwise falls through.
fn by_standards_path(path: &Path, content: Option<&str>) -> Option<DocumentKind> {
    let in_standards_dir = has_component(path, "standards");
    let named_like_standard = file_stem_lower(path)
        .map(|stem| stem.starts_with("standard") || stem.contains("-standard"))
        .unwrap_or(false);
    if !in_standards_dir && !named_like_standard {
        return None;
    }

    if content.is_some_and(has_retired_status) {
        return Some(DocumentKind::ArchivedStandard);
    }
    if content.is_some_and(has_standard_headings) {
        return Some(DocumentKind::Standard);
    }
    if in_standards_dir {
        return Some(DocumentKind::Standard);
    }
    None
}

/// Rule 3: task/incident roots. Content markers beat the directory, and
/// incident markers beat task markers (postmortems routinely carry action
/// checkboxes).
fn by_task_incident_path(path: &Path, content: Option<&str>) -> Option<DocumentKind> {
    let in_incidents = has_component(path, "incidents");
    let in_tasks = has_component(path, "todo") || has_component(path, "tasks");
    if !in_incidents && !in_tasks {
        return None;
    }

    if content.is_some_and(has_incident_markers) {
        return Some(DocumentKind::Incident);
    }
    if content.is_some_and(has_task_markers) {
        return Some(DocumentKind::Task);
    }
    if in_incidents {
        Some(DocumentKind::Incident)
    } else {
        Some(DocumentKind::Task)
    }
}

/// Rule 4: projects root. A project file that reads like a standard *is* a
/// standard (projects embed process docs).
fn by_projects_path(path: &Path, content: Option<&str>) -> Option<DocumentKind> {
    if !has_component(path, "projects") {
        return None;
    }
    if content.is_some_and(has_standard_headings) {
        return Some(DocumentKind::Standard);
    }
    Some(DocumentKind::Project)
}

/// Rule 5: standard section headings at any path.
fn by_standard_headings(content: Option<&str>) -> Option<DocumentKind> {
    if content.is_some_and(has_standard_headings) {
        Some(DocumentKind::Standard)
    } else {
        None
    }
}

// ============================================================================
// Content probes
// ============================================================================

fn has_standard_headings(content: &str) -> bool {
    heading_lines(content).any(|heading| {
        STANDARD_HEADING_MARKERS
            .iter()
            .any(|marker| heading.contains(marker))
    })
}

fn has_incident_markers(content: &str) -> bool {
    heading_lines(content).any(|heading| {
        INCIDENT_HEADING_MARKERS
            .iter()
            .any(|marker| heading.contains(marker))
    })
}

fn has_task_markers(content: &str) -> bool {
    let heading_hit = heading_lines(content).any(|heading| {
        TASK_HEADING_MARKERS
            .iter()
            .any(|marker| heading.contains(marker))
    });
    if heading_hit {
        return true;
    }
    content.lines().any(|line| {
        let trimmed = line.trim_start();
        TASK_CHECKBOX_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
    })
}

/// `**Статус**: Архив` / `Status: Draft` style lines with a retiring value.
fn has_retired_status(content: &str) -> bool {
    for line in content.lines() {
        let lower = line.trim().to_lowercase();
        let rest = lower
            .strip_prefix("**статус**")
            .or_else(|| lower.strip_prefix("**status**"))
            .or_else(|| lower.strip_prefix("статус"))
            .or_else(|| lower.strip_prefix("status"));
        let Some(rest) = rest else { continue };
        let Some(value) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let value = value.trim();
        if RETIRED_STATUS_VALUES
            .iter()
            .any(|marker| value.starts_with(marker))
        {
            return true;
        }
    }
    false
}

/// Markdown heading lines, lowercased, `#` prefix stripped.
fn heading_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content.lines().filter_map(|line| {
        let trimmed = line.trim_start();
        trimmed
            .strip_prefix('#')
            .map(|rest| rest.trim_start_matches('#').trim().to_lowercase())
    })
}

// ============================================================================
// Path probes
// ============================================================================

fn components_lower(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .map(|c| c.to_lowercase())
}

fn has_component(path: &Path, name: &str) -> bool {
    components_lower(path).any(|component| component == name)
}

fn file_stem_lower(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_lowercase())
}
