//! Pending approval requests and their resolution.

use std::sync::Arc;

use serde_json::json;

use crate::client::AgentClient;
use crate::debug::DebugTrace;
use crate::error::Result;
use crate::state::{ConversationAction, ConversationStore};
use crate::types::{ApprovalDecision, ApprovalRequest};

#[derive(Clone)]
pub struct ApprovalQueue {
    store: Arc<ConversationStore>,
    client: Arc<dyn AgentClient>,
    trace: DebugTrace,
}

impl ApprovalQueue {
    pub fn new(
        store: Arc<ConversationStore>,
        client: Arc<dyn AgentClient>,
        trace: DebugTrace,
    ) -> Self {
        Self {
            store,
            client,
            trace,
        }
    }

    /// Sends the decision and drops the request once the agent acknowledges
    /// it. On failure the request stays queued.
    pub async fn decide(&self, request: &ApprovalRequest, decision: ApprovalDecision) -> Result<()> {
        self.trace
            .traced_call(
                "respond_to_server_request",
                json!({
                    "workspaceId": request.workspace_id,
                    "requestId": request.request_id,
                    "decision": decision,
                }),
                self.client
                    .respond_to_request(&request.workspace_id, request.request_id, decision),
            )
            .await
            .inspect_err(|error| {
                tracing::warn!(
                    workspace_id = %request.workspace_id,
                    request_id = request.request_id,
                    decision = decision.label(),
                    error = %error,
                    "approval response failed"
                );
            })?;

        self.store.dispatch(ConversationAction::RemoveApproval {
            request_id: request.request_id,
        });
        tracing::debug!(
            workspace_id = %request.workspace_id,
            request_id = request.request_id,
            decision = decision.label(),
            "approval resolved"
        );
        Ok(())
    }

    /// Pending requests in arrival order.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.store.snapshot().approvals().to_vec()
    }

    pub fn pending_for_workspace(&self, workspace_id: &str) -> Vec<ApprovalRequest> {
        self.store
            .snapshot()
            .approvals_for_workspace(workspace_id)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalQueue")
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}
