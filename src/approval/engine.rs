// ABOUTME: Approval engine: applies policy and allowlist, then gates proposals on the approval service.
// ABOUTME: An optional timeout turns an unanswered proposal into a rejection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ApprovalConfig;

use super::{
    allowlist::CommandAllowlist,
    policy::evaluate_approval,
    service::ApprovalService,
    types::{ApprovalDecision, ApprovalOutcome, AskMode, Proposal, ProposalKind},
};

/// Ties policy, allowlist, and the reviewer together for the tool dispatcher.
pub struct ApprovalEngine {
    auto_apply: bool,
    ask: BTreeMap<String, AskMode>,
    allowlist: Mutex<CommandAllowlist>,
    timeout: Option<Duration>,
    service: Arc<dyn ApprovalService>,
}

impl ApprovalEngine {
    pub fn new(config: &ApprovalConfig, auto_apply: bool, service: Arc<dyn ApprovalService>) -> Self {
        Self {
            auto_apply,
            ask: config.ask.clone(),
            allowlist: Mutex::new(CommandAllowlist::from_patterns(config.command_allowlist.as_slice())),
            timeout: config.timeout_seconds.map(Duration::from_secs),
            service,
        }
    }

    pub fn auto_apply(&self) -> bool {
        self.auto_apply
    }

    fn ask_mode(&self, kind: ProposalKind) -> AskMode {
        self.ask
            .get(kind.name())
            .copied()
            .unwrap_or_else(|| kind.default_ask())
    }

    /// Evaluate policy for a proposal without contacting the reviewer.
    pub fn check(&self, proposal: &Proposal) -> ApprovalOutcome {
        let allowlist_satisfied = proposal.kind == ProposalKind::ExecuteCommand
            && self
                .allowlist
                .lock()
                .expect("allowlist lock poisoned")
                .check(&proposal.modified);
        evaluate_approval(self.auto_apply, self.ask_mode(proposal.kind), allowlist_satisfied)
    }

    /// Decide a proposal, asking the reviewer when policy requires it.
    ///
    /// Service failures and timeouts resolve as rejections.
    pub async fn review(&self, proposal: Proposal) -> ApprovalDecision {
        if self.check(&proposal) == ApprovalOutcome::Apply {
            debug!(proposal = %proposal.describe(), "applied without review");
            return ApprovalDecision::accept();
        }

        let description = proposal.describe();
        let kind = proposal.kind;
        let command = proposal.modified.clone();
        let request = self.service.request(proposal);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(proposal = %description, "approval timed out");
                    return ApprovalDecision::reject("approval timed out");
                }
            },
            None => request.await,
        };

        let decision = match outcome {
            Ok(decision) => decision,
            Err(e) => {
                warn!(proposal = %description, error = %e, "approval service failed");
                return ApprovalDecision::reject(e.to_string());
            }
        };

        if decision == ApprovalDecision::AcceptAlways && kind == ProposalKind::ExecuteCommand {
            self.allowlist
                .lock()
                .expect("allowlist lock poisoned")
                .allow_exact(&command);
        }
        info!(proposal = %description, accepted = decision.is_accepted(), "approval resolved");
        decision
    }
}
