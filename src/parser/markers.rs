// ABOUTME: Task-status markers ([COMPLETED:n], [VERIFIED:n], [REJECTED:n]), the [FINISH] sentinel, and checklists.
// ABOUTME: Also owns task-id normalization so "Task 3", "task-3", and "TASK3" compare equal.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(COMPLETED|VERIFIED|REJECTED)\s*:\s*([^\]]*)\]").expect("marker regex")
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("number regex"));

static FINISH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[FINISH\]").expect("finish regex"));

/// `- [ ] **Task 3:** description *Verify by:* criteria`
static STRICT_TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*[-*+][ \t]*\[[ xX]?\][ \t]*\*\*Task[ \t]+(\d+)[ \t]*:?[ \t]*\*\*[ \t]*:?[ \t]*(.+?)[ \t]*(?:\*Verify by:\*[ \t]*(.*?))?[ \t]*$",
    )
    .expect("strict checklist regex")
});

/// Any bullet or numbered line, optional checkbox, optional `Task N:` prefix.
static LOOSE_TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+(?:\[[ xX]?\][ \t]*)?(?:\*\*)?(?:Task[ \t]*(\d+)[ \t]*[:.\-][ \t]*)?(?:\*\*)?[ \t]*(.+?)[ \t]*$",
    )
    .expect("loose checklist regex")
});

/// Descriptions shorter than this are noise (e.g. "- ok").
const MIN_DESCRIPTION_CHARS: usize = 6;

/// Status keyword carried by an inline marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Completed,
    Verified,
    Rejected,
}

/// One inline marker, with the numeric task ids it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskMarker {
    pub kind: MarkerKind,
    pub ids: Vec<String>,
}

/// A checklist line parsed from planning output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecklistItem {
    pub id: String,
    pub description: String,
    pub verify_by: Option<String>,
}

/// Normalize a task id for comparison.
///
/// Separators and case are ignored, and a leading "task" word is dropped when what
/// remains is numeric, so "Task 3", "task-3", and "TASK3" all normalize to "3".
pub fn normalize_task_id(id: &str) -> String {
    let compact: String = id
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    match compact.strip_prefix("task") {
        Some(rest) if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) => {
            rest.to_string()
        }
        _ => compact,
    }
}

/// Extract every `[COMPLETED:..]`, `[VERIFIED:..]`, and `[REJECTED:..]` marker.
///
/// Ids are comma separated; only the numeric token of each entry is kept, and entries
/// without one are ignored.
pub fn parse_task_markers(text: &str) -> Vec<TaskMarker> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let kind = match caps[1].to_ascii_uppercase().as_str() {
                "COMPLETED" => MarkerKind::Completed,
                "VERIFIED" => MarkerKind::Verified,
                _ => MarkerKind::Rejected,
            };
            let ids: Vec<String> = caps[2]
                .split(',')
                .filter_map(|part| NUMBER_RE.find(part).map(|m| m.as_str().to_string()))
                .collect();
            if ids.is_empty() {
                None
            } else {
                Some(TaskMarker { kind, ids })
            }
        })
        .collect()
}

/// Whether an agent declared the whole request done.
pub fn contains_finish_sentinel(text: &str) -> bool {
    FINISH_RE.is_match(text)
}

fn clean_description(raw: &str) -> String {
    raw.replace("**", "").trim().trim_end_matches(':').trim().to_string()
}

/// Parse a planning checklist.
///
/// Strict `**Task N:**` lines win when present; otherwise any bullet or numbered line is
/// accepted, numbering tasks in order when they carry no explicit id.
pub fn parse_checklist(text: &str) -> Vec<ChecklistItem> {
    let strict: Vec<ChecklistItem> = STRICT_TASK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let description = clean_description(&caps[2]);
            if description.chars().count() < MIN_DESCRIPTION_CHARS {
                return None;
            }
            Some(ChecklistItem {
                id: caps[1].to_string(),
                description,
                verify_by: caps
                    .get(3)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty()),
            })
        })
        .collect();
    if !strict.is_empty() {
        return strict;
    }

    let mut items = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(caps) = LOOSE_TASK_RE.captures(line) else {
            continue;
        };
        let description = clean_description(&caps[2]);
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            continue;
        }
        let id = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| (items.len() + 1).to_string());
        items.push(ChecklistItem {
            id,
            description,
            verify_by: None,
        });
    }
    items
}
