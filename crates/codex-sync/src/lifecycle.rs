//! Thread creation and per-workspace active-thread selection.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::client::AgentClient;
use crate::debug::DebugTrace;
use crate::error::{Result, SyncError};
use crate::state::{ConversationAction, ConversationStore};
use crate::types::Message;

/// Result of a successful [`ThreadLifecycle::send_user_message`].
#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage {
    pub thread_id: String,
    pub message: Message,
    pub response: serde_json::Value,
}

#[derive(Clone)]
pub struct ThreadLifecycle {
    store: Arc<ConversationStore>,
    client: Arc<dyn AgentClient>,
    trace: DebugTrace,
}

impl ThreadLifecycle {
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

    /// Asks the agent for a new thread and makes it the workspace's active
    /// thread. Nothing is recorded unless the agent returns a thread id.
    pub async fn start_thread(&self, workspace_id: &str) -> Result<String> {
        let response = self
            .trace
            .traced_call(
                "thread/start",
                json!({ "workspaceId": workspace_id }),
                self.client.start_thread(workspace_id),
            )
            .await
            .inspect_err(|error| {
                tracing::warn!(workspace_id, error = %error, "thread/start failed");
            })?;

        let thread_id = response.thread.id;
        if thread_id.is_empty() {
            tracing::warn!(workspace_id, "thread/start returned no thread id");
            return Err(SyncError::MissingThreadId {
                workspace_id: workspace_id.to_string(),
            });
        }

        // Ids are process-wide; one owned by another workspace must not
        // become this workspace's active thread.
        let snapshot = self.store.dispatch_with(|state| {
            match state.workspace_of_thread(&thread_id) {
                Some(owner) if owner != workspace_id => Vec::new(),
                _ => vec![
                    ConversationAction::EnsureThread {
                        workspace_id: workspace_id.to_string(),
                        thread_id: thread_id.clone(),
                    },
                    ConversationAction::SetActiveThread {
                        workspace_id: workspace_id.to_string(),
                        thread_id: Some(thread_id.clone()),
                    },
                ],
            }
        });
        if !snapshot.has_thread(workspace_id, &thread_id) {
            tracing::warn!(
                workspace_id,
                thread_id = %thread_id,
                "thread/start returned a thread owned by another workspace"
            );
            return Err(SyncError::UnknownThread {
                workspace_id: workspace_id.to_string(),
                thread_id,
            });
        }
        tracing::info!(workspace_id, thread_id = %thread_id, "thread started");
        Ok(thread_id)
    }

    /// Sends `text` on the workspace's active thread, starting one first if
    /// needed. The user message is only recorded once the agent accepts it.
    pub async fn send_user_message(&self, workspace_id: &str, text: &str) -> Result<SentMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let thread_id = match self.active_thread(workspace_id) {
            Some(thread_id) => thread_id,
            None => self.start_thread(workspace_id).await?,
        };

        let response = self
            .trace
            .traced_call(
                "turn/start",
                json!({
                    "workspaceId": workspace_id,
                    "threadId": thread_id,
                    "text": text,
                }),
                self.client
                    .send_user_message(workspace_id, &thread_id, text),
            )
            .await
            .inspect_err(|error| {
                tracing::warn!(
                    workspace_id,
                    thread_id = %thread_id,
                    error = %error,
                    "turn/start failed"
                );
            })?;

        let message = Message::user(Uuid::now_v7().to_string(), text);
        self.store.dispatch_all([
            ConversationAction::AddUserMessage {
                thread_id: thread_id.clone(),
                message: message.clone(),
            },
            ConversationAction::MarkProcessing {
                thread_id: thread_id.clone(),
                is_processing: true,
            },
        ]);

        Ok(SentMessage {
            thread_id,
            message,
            response,
        })
    }

    /// Points the workspace at `thread_id`, or clears the pointer for `None`.
    pub fn select_thread(&self, workspace_id: &str, thread_id: Option<&str>) -> Result<()> {
        if let Some(thread_id) = thread_id
            && !self.store.snapshot().has_thread(workspace_id, thread_id)
        {
            return Err(SyncError::UnknownThread {
                workspace_id: workspace_id.to_string(),
                thread_id: thread_id.to_string(),
            });
        }
        self.store.dispatch(ConversationAction::SetActiveThread {
            workspace_id: workspace_id.to_string(),
            thread_id: thread_id.map(str::to_string),
        });
        Ok(())
    }

    pub fn active_thread(&self, workspace_id: &str) -> Option<String> {
        self.store
            .snapshot()
            .active_thread(workspace_id)
            .map(str::to_string)
    }
}

impl std::fmt::Debug for ThreadLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLifecycle")
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}
