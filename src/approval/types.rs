// ABOUTME: Core approval types: ask modes, proposal kinds, proposals, and decisions.
// ABOUTME: A proposal carries original and modified content so a reviewer can diff or edit it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When to put a proposal in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AskMode {
    /// Never ask; apply directly.
    Off,
    /// Ask only when the command allowlist doesn't cover the invocation.
    OnMiss,
    /// Always ask.
    Always,
}

/// The side effect a proposal would perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    WriteFile,
    Patch,
    Replace,
    ReadFile,
    ExecuteCommand,
    GenerateImage,
    ResizeImage,
    SaveAsset,
    Search,
}

impl ProposalKind {
    /// Config key used in `[approval.ask]`.
    pub fn name(&self) -> &'static str {
        match self {
            ProposalKind::WriteFile => "write_file",
            ProposalKind::Patch => "patch",
            ProposalKind::Replace => "replace",
            ProposalKind::ReadFile => "read_file",
            ProposalKind::ExecuteCommand => "execute_command",
            ProposalKind::GenerateImage => "generate_image",
            ProposalKind::ResizeImage => "resize_image",
            ProposalKind::SaveAsset => "save_asset",
            ProposalKind::Search => "search",
        }
    }

    /// Reads and searches have no side effects worth gating.
    pub fn default_ask(&self) -> AskMode {
        match self {
            ProposalKind::ReadFile | ProposalKind::Search => AskMode::Off,
            _ => AskMode::OnMiss,
        }
    }
}

/// A pending side effect awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub id: String,
    pub kind: ProposalKind,
    pub path: Option<String>,
    pub original: String,
    pub modified: String,
}

impl Proposal {
    pub fn new(
        kind: ProposalKind,
        path: Option<String>,
        original: impl Into<String>,
        modified: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            path,
            original: original.into(),
            modified: modified.into(),
        }
    }

    /// One-line summary for prompts and logs.
    pub fn describe(&self) -> String {
        match (&self.kind, &self.path) {
            (ProposalKind::ExecuteCommand, _) => format!("execute_command: {}", self.modified),
            (kind, Some(path)) => format!("{}: {path}", kind.name()),
            (kind, None) => format!("{}: {}", kind.name(), self.modified),
        }
    }
}

/// The reviewer's answer to a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Apply, optionally with content the reviewer edited.
    Accept { edited: Option<String> },
    /// Apply, and stop asking for this exact command.
    AcceptAlways,
    Reject { reason: Option<String> },
}

impl ApprovalDecision {
    pub fn accept() -> Self {
        ApprovalDecision::Accept { edited: None }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        ApprovalDecision::Reject {
            reason: Some(reason.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, ApprovalDecision::Reject { .. })
    }
}

/// Result of evaluating the approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Apply,
    Ask,
}
