// ABOUTME: Embedded JSON extraction from fenced ```json blocks or the first balanced {...} span.
// ABOUTME: Typed views for router decisions and structured task updates; parse misses return None.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence regex")
});

/// The router's choice of the next agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDecision {
    pub next_agent: String,
    #[serde(default)]
    pub reasoning: String,
    /// Task the chosen agent should pick up, if the router named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// One status change for an existing task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskUpdate {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub agent: Option<String>,
}

/// A task declared in JSON planning output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlannedTask {
    pub id: String,
    pub description: String,
}

/// Structured updates an agent may embed in its output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StructuredUpdate {
    #[serde(default)]
    pub task_updates: Vec<TaskUpdate>,
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
}

impl StructuredUpdate {
    pub fn is_empty(&self) -> bool {
        self.task_updates.is_empty() && self.tasks.is_empty()
    }
}

/// Byte range of the first balanced top-level `{...}` span, ignoring braces inside strings.
fn first_object_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}

/// Every JSON object in the text, fenced blocks first, then top-level spans in order.
fn object_candidates(text: &str) -> Vec<Value> {
    let mut found: Vec<Value> = FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| parse_object(&caps[1]))
        .collect();
    let mut offset = 0;
    while let Some((start, end)) = first_object_span(&text[offset..]) {
        if let Some(value) = parse_object(&text[offset + start..offset + end]) {
            found.push(value);
        }
        offset += end;
    }
    found
}

/// Extract one JSON object embedded in free text.
///
/// A fenced code block holding an object wins; otherwise the first top-level `{...}`
/// span that parses is used. Anything unparseable yields `None`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    object_candidates(text).into_iter().next()
}

/// Parse a router decision; `None` when no object with a non-empty `next_agent` is present.
pub fn parse_router_decision(text: &str) -> Option<RouterDecision> {
    object_candidates(text).into_iter().find_map(|value| {
        let decision: RouterDecision = serde_json::from_value(value).ok()?;
        let next_agent = decision.next_agent.trim().to_string();
        if next_agent.is_empty() {
            return None;
        }
        Some(RouterDecision {
            next_agent,
            ..decision
        })
    })
}

/// Parse structured task updates; `None` when the text carries none.
pub fn parse_structured_update(text: &str) -> Option<StructuredUpdate> {
    object_candidates(text).into_iter().find_map(|value| {
        let update: StructuredUpdate = serde_json::from_value(value).ok()?;
        if update.is_empty() { None } else { Some(update) }
    })
}
