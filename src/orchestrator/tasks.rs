// ABOUTME: Task board: an arena of tasks addressed by normalized id, mutated through a single apply function.
// ABOUTME: Inline markers, JSON updates, router assignments, and checklists all become TaskChange values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parser::{ChecklistItem, MarkerKind, normalize_task_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    ReviewPending,
    Completed,
    Rejected,
    Failed,
}

impl TaskStatus {
    /// Parse a status name; separators and case are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let compact: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match compact.as_str() {
            "pending" | "todo" => Some(TaskStatus::Pending),
            "inprogress" => Some(TaskStatus::InProgress),
            "reviewpending" | "review" => Some(TaskStatus::ReviewPending),
            "completed" | "complete" | "done" | "verified" => Some(TaskStatus::Completed),
            "rejected" => Some(TaskStatus::Rejected),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Work remains: pending, in progress, or sent back by review.
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub last_modified_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_by: Option<String>,
}

/// Every way the board can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    /// Declare a task. An existing id keeps its status and gets the new description.
    Add {
        id: String,
        description: String,
        verify_by: Option<String>,
    },
    SetStatus {
        id: String,
        status: TaskStatus,
        agent: Option<String>,
    },
    RecordFiles {
        id: String,
        files: Vec<String>,
    },
}

impl TaskChange {
    /// Translate an inline marker into a status change.
    ///
    /// A completion claim only reaches `review_pending` unless tasks are auto-marked.
    /// Verifying or rejecting is for checkers: from anyone else a verification counts
    /// as a completion claim and a rejection is ignored.
    pub fn from_marker(kind: MarkerKind, id: &str, auto_mark: bool, checker: bool) -> Option<Self> {
        let may_close = auto_mark || checker;
        let status = match kind {
            MarkerKind::Completed if auto_mark => TaskStatus::Completed,
            MarkerKind::Completed => TaskStatus::ReviewPending,
            MarkerKind::Verified if may_close => TaskStatus::Completed,
            MarkerKind::Verified => TaskStatus::ReviewPending,
            MarkerKind::Rejected if may_close => TaskStatus::Rejected,
            MarkerKind::Rejected => return None,
        };
        Some(TaskChange::SetStatus {
            id: id.to_string(),
            status,
            agent: None,
        })
    }

    pub fn from_checklist(item: &ChecklistItem) -> Self {
        TaskChange::Add {
            id: item.id.clone(),
            description: item.description.clone(),
            verify_by: item.verify_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(&normalize_task_id(id)).map(|&i| &self.tasks[i])
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn has_open(&self) -> bool {
        self.tasks.iter().any(|t| t.status.is_open())
    }

    pub fn has_review_pending(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::ReviewPending)
    }

    pub fn open_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status.is_open())
    }

    /// Apply one change. Returns false when it references an unknown task or is empty.
    pub fn apply(&mut self, change: TaskChange) -> bool {
        match change {
            TaskChange::Add {
                id,
                description,
                verify_by,
            } => {
                let key = normalize_task_id(&id);
                if key.is_empty() {
                    return false;
                }
                match self.index.get(&key) {
                    Some(&i) => {
                        let task = &mut self.tasks[i];
                        task.description = description;
                        if verify_by.is_some() {
                            task.verify_by = verify_by;
                        }
                    }
                    None => {
                        self.index.insert(key, self.tasks.len());
                        self.tasks.push(Task {
                            id,
                            description,
                            status: TaskStatus::Pending,
                            assigned_agent: None,
                            last_modified_files: Vec::new(),
                            verify_by,
                        });
                    }
                }
                true
            }
            TaskChange::SetStatus { id, status, agent } => {
                let Some(&i) = self.index.get(&normalize_task_id(&id)) else {
                    debug!(id = %id, "status change for unknown task");
                    return false;
                };
                let task = &mut self.tasks[i];
                debug!(id = %task.id, from = ?task.status, to = ?status, "task status");
                task.status = status;
                if agent.is_some() {
                    task.assigned_agent = agent;
                }
                true
            }
            TaskChange::RecordFiles { id, files } => {
                let Some(&i) = self.index.get(&normalize_task_id(&id)) else {
                    return false;
                };
                let task = &mut self.tasks[i];
                for file in files {
                    if !task.last_modified_files.contains(&file) {
                        task.last_modified_files.push(file);
                    }
                }
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.index.clear();
    }

    /// Compact board rendering for prompts.
    pub fn render(&self) -> String {
        self.tasks
            .iter()
            .map(|t| {
                let status = serde_json::to_value(t.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let mut line = format!("- Task {} [{status}]: {}", t.id, t.description);
                if let Some(agent) = &t.assigned_agent {
                    line.push_str(&format!(" (agent: {agent})"));
                }
                if let Some(verify) = &t.verify_by {
                    line.push_str(&format!(" (verify by: {verify})"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
