// ABOUTME: Error taxonomy for the orchestrator, the model client contract, and tool dispatch.
// ABOUTME: Fatal-to-turn errors stop the loop; tool errors are folded back into the transcript.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by an `LlmClient` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Errors that end the current user turn. Session state up to the failure is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("router call failed: {0}")]
    RouterCall(#[source] LlmError),

    #[error("router returned an unparseable decision: {0}")]
    RouterDecision(String),

    #[error("agent '{0}' is not defined in the workflow")]
    AgentNotFound(String),

    #[error("model stream for '{agent}' failed: {source}")]
    Stream {
        agent: String,
        #[source]
        source: LlmError,
    },

    #[error("run cancelled")]
    Cancelled,
}

/// A single tool's failure. Never propagated out of the loop; rendered as tool output instead.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("could not access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path '{0}' is outside the workspace")]
    OutsideWorkspace(PathBuf),

    #[error(
        "could not find the text to replace in '{0}'. The <old> block must match the file content exactly (whitespace differences are tolerated line by line)"
    )]
    NoMatch(String),

    #[error("malformed <{tag}> tag: {reason}")]
    Malformed { tag: String, reason: String },

    #[error("change rejected by user{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Rejected(Option<String>),

    #[error("failed to run command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{0} is not available in this session")]
    Unavailable(&'static str),

    #[error("{0}")]
    Service(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
