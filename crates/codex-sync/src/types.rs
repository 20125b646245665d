//! Data model shared by the store, the event adapter, and the outbound seams.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub connected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub workspace_id: String,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Item id for assistant messages; a locally generated id for user messages.
    pub id: String,
    pub role: MessageRole,
    pub text: String,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStatus {
    pub is_processing: bool,
    pub has_unread: bool,
}

/// A pending request from the agent that needs a human accept/decline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub workspace_id: String,
    pub request_id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Accept,
    Decline,
}

impl ApprovalDecision {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

/// One entry of the process-wide inbound feed.
///
/// `message` stays a raw JSON value so that shapes this crate does not
/// understand still reach the raw-event handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(alias = "workspace_id")]
    pub workspace_id: String,
    #[serde(default)]
    pub message: Value,
}

impl InboundEvent {
    pub fn new(workspace_id: impl Into<String>, message: Value) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            message,
        }
    }

    /// The `method` tag, or an empty string when absent or not a string.
    pub fn method(&self) -> &str {
        self.message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn params(&self) -> Option<&Value> {
        self.message.get("params")
    }

    /// Integer request id carried by server-initiated requests.
    pub fn request_id(&self) -> Option<i64> {
        let id = self.message.get("id")?;
        id.as_i64()
            .or_else(|| id.as_u64().and_then(|value| i64::try_from(value).ok()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMessageDelta {
    pub workspace_id: String,
    pub thread_id: String,
    pub item_id: String,
    pub delta: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMessageCompleted {
    pub workspace_id: String,
    pub thread_id: String,
    pub item_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnActivity {
    pub workspace_id: String,
    pub thread_id: String,
}
