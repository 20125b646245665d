//! Error types for the synchronization engine.

use thiserror::Error;

/// Failure raised by an [`AgentClient`](crate::AgentClient) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentClientError {
    #[error("{method} failed: {message}")]
    Call { method: String, message: String },

    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

impl AgentClientError {
    pub fn call(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by user-initiated engine operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Agent(#[from] AgentClientError),

    #[error("thread/start for workspace {workspace_id} returned no thread id")]
    MissingThreadId { workspace_id: String },

    #[error("thread {thread_id} does not belong to workspace {workspace_id}")]
    UnknownThread {
        workspace_id: String,
        thread_id: String,
    },

    #[error("message text is empty")]
    EmptyMessage,
}

pub type Result<T> = std::result::Result<T, SyncError>;
