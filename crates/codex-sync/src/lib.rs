//! Conversation and approval synchronization for supervised Codex agents.
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod approvals;
pub mod client;
pub mod config;
pub mod debug;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod state;
pub mod types;

pub use approvals::ApprovalQueue;
pub use client::{AgentClient, OfflineAgentClient, StartedThread, ThreadStartResponse};
pub use config::{ConfigError, MAX_DEBUG_LOG_CAPACITY, MAX_EVENT_CHANNEL_CAPACITY, SyncConfig};
pub use debug::{
    DebugRecord, DebugSink, DebugSource, DebugTrace, RingDebugSink, STDERR_METHOD,
    TracingDebugSink,
};
pub use engine::{ConversationEventHandlers, SyncEngine};
pub use error::{AgentClientError, Result, SyncError};
pub use events::{EventBus, EventHandlers, EventSubscription, FeedEvent, classify, dispatch_event};
pub use lifecycle::{SentMessage, ThreadLifecycle};
pub use state::{ConversationAction, ConversationState, ConversationStore, reduce};
pub use types::{
    AgentMessageCompleted, AgentMessageDelta, ApprovalDecision, ApprovalRequest, InboundEvent,
    Message, MessageRole, Thread, ThreadStatus, TurnActivity, Workspace,
};
