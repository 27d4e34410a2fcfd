// ABOUTME: Approval policy decision logic for proposals.
// ABOUTME: Combines auto-apply, the per-kind ask mode, and allowlist status into an ApprovalOutcome.

use super::types::{ApprovalOutcome, AskMode};

/// Decide whether a proposal applies directly or goes to the reviewer.
pub fn evaluate_approval(
    auto_apply: bool,
    ask: AskMode,
    allowlist_satisfied: bool,
) -> ApprovalOutcome {
    if auto_apply {
        return ApprovalOutcome::Apply;
    }
    match ask {
        AskMode::Off => ApprovalOutcome::Apply,
        AskMode::Always => ApprovalOutcome::Ask,
        AskMode::OnMiss if allowlist_satisfied => ApprovalOutcome::Apply,
        AskMode::OnMiss => ApprovalOutcome::Ask,
    }
}
