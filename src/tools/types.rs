// ABOUTME: Tool result types: every call yields model-facing text, user-facing text, and an optional action.
// ABOUTME: Structured actions let the orchestrator track file contents without re-reading them.

use serde::Serialize;

use crate::error::ToolError;

/// Machine-readable record of what a tool did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StructuredAction {
    FileWritten { path: String, content: String },
    FileRead { path: String, content: String },
    CommandFinished { command: String, exit_code: Option<i32> },
    ProcessStarted { command: String, pid: Option<u32> },
    ProcessStopped { command: String },
    ImageGenerated { path: String },
    ImageResized { path: String },
    AssetSaved { dest: String },
    SearchCompleted { query: String, results: usize },
}

/// Dual-audience tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    /// Spliced into the transcript the model sees.
    pub llm_output: String,
    /// Shown to the user.
    pub user_output: String,
    pub action: Option<StructuredAction>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(llm_output: impl Into<String>, user_output: impl Into<String>) -> Self {
        Self {
            llm_output: llm_output.into(),
            user_output: user_output.into(),
            action: None,
            is_error: false,
        }
    }

    pub fn with_action(mut self, action: StructuredAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Fold a tool failure into text the acting agent can react to.
    pub fn error(tool: &str, error: &ToolError) -> Self {
        Self {
            llm_output: format!("[{tool}] failed: {error}"),
            user_output: format!("{tool} failed: {error}"),
            action: None,
            is_error: true,
        }
    }
}
