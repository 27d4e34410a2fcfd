// ABOUTME: Conversation history entries and the "[Role]: content" transcript format.
// ABOUTME: Roles are the user, named agents, tool results, system notices, and compressed summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent(String),
    /// Model-facing output of a tool call.
    Tool,
    /// Interventions and fatal notices.
    System,
    /// Compressed stand-in for older entries.
    Summary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Agent(name) => f.write_str(name),
            Role::Tool => f.write_str("Tool"),
            Role::System => f.write_str("System"),
            Role::Summary => f.write_str("Summary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn agent(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Agent(name.into()), content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(Role::Summary, content)
    }
}

/// Render entries as `[Role]: content` blocks separated by blank lines.
pub fn format_transcript(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("[{}]: {}", entry.role, entry.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
