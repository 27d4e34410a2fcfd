// ABOUTME: Approval service contract and two implementations: auto-approve and an mpsc channel bridge.
// ABOUTME: The channel bridge hands each proposal to a UI with a oneshot responder for the decision.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::ToolError;

use super::types::{ApprovalDecision, Proposal};

/// Resolves proposals asynchronously, possibly after a human looks at them.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn request(&self, proposal: Proposal) -> Result<ApprovalDecision, ToolError>;
}

/// Accepts every proposal unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalService for AutoApprove {
    async fn request(&self, _proposal: Proposal) -> Result<ApprovalDecision, ToolError> {
        Ok(ApprovalDecision::accept())
    }
}

/// A proposal waiting on a reviewer, with the channel to answer on.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub proposal: Proposal,
    pub responder: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    /// Answer the request. A reviewer that has gone away is not an error here.
    pub fn respond(self, decision: ApprovalDecision) {
        let _ = self.responder.send(decision);
    }
}

/// Forwards proposals over a channel to whoever holds the receiver.
#[derive(Debug, Clone)]
pub struct ChannelApprovalService {
    tx: mpsc::Sender<ApprovalRequest>,
}

impl ChannelApprovalService {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalService for ChannelApprovalService {
    async fn request(&self, proposal: Proposal) -> Result<ApprovalDecision, ToolError> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(ApprovalRequest {
                proposal,
                responder,
            })
            .await
            .map_err(|_| ToolError::Service("approval channel closed".to_string()))?;
        rx.await
            .map_err(|_| ToolError::Service("reviewer dropped the approval request".to_string()))
    }
}
