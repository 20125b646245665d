//! Outbound seam to the process that hosts the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentClientError;
use crate::types::ApprovalDecision;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStartResponse {
    pub thread: StartedThread,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedThread {
    #[serde(default)]
    pub id: String,
}

impl ThreadStartResponse {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread: StartedThread {
                id: thread_id.into(),
            },
        }
    }
}

/// Calls this crate makes against an agent process.
///
/// Implementations own transport, timeouts, and retries. Errors are
/// surfaced to callers unchanged.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn start_thread(&self, workspace_id: &str)
    -> Result<ThreadStartResponse, AgentClientError>;

    async fn send_user_message(
        &self,
        workspace_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<Value, AgentClientError>;

    async fn respond_to_request(
        &self,
        workspace_id: &str,
        request_id: i64,
        decision: ApprovalDecision,
    ) -> Result<(), AgentClientError>;
}

/// Client that rejects every call, for read-only sessions such as replays.
#[derive(Clone, Debug, Default)]
pub struct OfflineAgentClient {
    reason: Option<String>,
}

impl OfflineAgentClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    fn unavailable(&self) -> AgentClientError {
        AgentClientError::Unavailable(
            self.reason
                .clone()
                .unwrap_or_else(|| "no agent process attached".to_string()),
        )
    }
}

#[async_trait]
impl AgentClient for OfflineAgentClient {
    async fn start_thread(
        &self,
        _workspace_id: &str,
    ) -> Result<ThreadStartResponse, AgentClientError> {
        Err(self.unavailable())
    }

    async fn send_user_message(
        &self,
        _workspace_id: &str,
        _thread_id: &str,
        _text: &str,
    ) -> Result<Value, AgentClientError> {
        Err(self.unavailable())
    }

    async fn respond_to_request(
        &self,
        _workspace_id: &str,
        _request_id: i64,
        _decision: ApprovalDecision,
    ) -> Result<(), AgentClientError> {
        Err(self.unavailable())
    }
}
