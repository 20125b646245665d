//! Composition root wiring the store, event feed, lifecycle, approvals and
//! debug trace together.

use std::sync::Arc;

use tokio::sync::watch;

use crate::approvals::ApprovalQueue;
use crate::client::AgentClient;
use crate::config::SyncConfig;
use crate::debug::{DebugSource, DebugTrace, STDERR_METHOD};
use crate::error::Result;
use crate::events::{EventBus, EventHandlers, EventSubscription, dispatch_event};
use crate::lifecycle::{SentMessage, ThreadLifecycle};
use crate::state::{ConversationAction, ConversationState, ConversationStore};
use crate::types::{
    AgentMessageCompleted, AgentMessageDelta, ApprovalDecision, ApprovalRequest, InboundEvent,
    TurnActivity,
};

/// Handler set that folds inbound events into a [`ConversationStore`].
pub struct ConversationEventHandlers {
    store: Arc<ConversationStore>,
    trace: DebugTrace,
}

impl ConversationEventHandlers {
    pub fn new(store: Arc<ConversationStore>, trace: DebugTrace) -> Self {
        Self { store, trace }
    }
}

impl EventHandlers for ConversationEventHandlers {
    fn on_raw_event(&self, event: &InboundEvent) {
        let method = event.method();
        if method.is_empty() {
            tracing::debug!(workspace_id = %event.workspace_id, "inbound event without method");
        }
        let source = if method == STDERR_METHOD {
            DebugSource::Stderr
        } else {
            DebugSource::Event
        };
        let label = if method.is_empty() { "event" } else { method };
        self.trace.emit(source, label, Some(event.message.clone()));
    }

    fn on_workspace_connected(&self, workspace_id: &str) {
        tracing::info!(workspace_id, "workspace connected");
        self.store
            .dispatch(ConversationAction::MarkWorkspaceConnected {
                workspace_id: workspace_id.to_string(),
            });
    }

    fn on_approval_request(&self, request: ApprovalRequest) {
        tracing::info!(
            workspace_id = %request.workspace_id,
            request_id = request.request_id,
            method = %request.method,
            "approval requested"
        );
        self.store.dispatch(ConversationAction::AddApproval(request));
    }

    fn on_agent_message_delta(&self, delta: AgentMessageDelta) {
        self.store.dispatch_all([
            ConversationAction::EnsureThread {
                workspace_id: delta.workspace_id,
                thread_id: delta.thread_id.clone(),
            },
            ConversationAction::AppendAssistantDelta {
                thread_id: delta.thread_id,
                item_id: delta.item_id,
                delta: delta.delta,
            },
        ]);
    }

    fn on_agent_message_completed(&self, completed: AgentMessageCompleted) {
        let workspace_id = completed.workspace_id;
        let thread_id = completed.thread_id;
        self.store.dispatch_all([
            ConversationAction::EnsureThread {
                workspace_id: workspace_id.clone(),
                thread_id: thread_id.clone(),
            },
            ConversationAction::CompleteAssistantMessage {
                thread_id: thread_id.clone(),
                item_id: completed.item_id,
                text: completed.text,
            },
        ]);
        self.store.dispatch_with(|state| {
            let owner = state
                .workspace_of_thread(&thread_id)
                .unwrap_or(workspace_id.as_str());
            (state.active_thread(owner) != Some(thread_id.as_str())).then(|| {
                ConversationAction::MarkUnread {
                    thread_id: thread_id.clone(),
                    has_unread: true,
                }
            })
        });
    }

    fn on_turn_started(&self, turn: TurnActivity) {
        self.store.dispatch_all([
            ConversationAction::EnsureThread {
                workspace_id: turn.workspace_id,
                thread_id: turn.thread_id.clone(),
            },
            ConversationAction::MarkProcessing {
                thread_id: turn.thread_id,
                is_processing: true,
            },
        ]);
    }

    fn on_turn_completed(&self, turn: TurnActivity) {
        self.store.dispatch(ConversationAction::MarkProcessing {
            thread_id: turn.thread_id,
            is_processing: false,
        });
    }
}

/// Owns one conversation store and every component that reads or writes it.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<ConversationStore>,
    bus: EventBus,
    trace: DebugTrace,
    handlers: Arc<ConversationEventHandlers>,
    lifecycle: ThreadLifecycle,
    approvals: ApprovalQueue,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, client: Arc<dyn AgentClient>) -> Self {
        Self::with_trace(config, client, DebugTrace::disabled())
    }

    pub fn with_trace(config: SyncConfig, client: Arc<dyn AgentClient>, trace: DebugTrace) -> Self {
        let store = Arc::new(ConversationStore::new());
        let bus = EventBus::new(config.event_channel_capacity);
        let handlers = Arc::new(ConversationEventHandlers::new(
            Arc::clone(&store),
            trace.clone(),
        ));
        let lifecycle = ThreadLifecycle::new(Arc::clone(&store), Arc::clone(&client), trace.clone());
        let approvals = ApprovalQueue::new(Arc::clone(&store), client, trace.clone());
        Self {
            config,
            store,
            bus,
            trace,
            handlers,
            lifecycle,
            approvals,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn trace(&self) -> &DebugTrace {
        &self.trace
    }

    /// The process-wide inbound channel this engine listens on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// The store-routing handler set, for callers that wrap or replace it.
    pub fn handlers(&self) -> Arc<dyn EventHandlers> {
        self.handlers.clone()
    }

    pub fn lifecycle(&self) -> &ThreadLifecycle {
        &self.lifecycle
    }

    pub fn approvals(&self) -> &ApprovalQueue {
        &self.approvals
    }

    /// Subscribes the engine's handlers to its bus. Must be called from
    /// within a Tokio runtime; events published before this call are not
    /// delivered to the new subscription.
    pub fn start(&self) -> EventSubscription {
        self.bus.subscribe(self.handlers())
    }

    /// Routes one event synchronously, bypassing the bus.
    pub fn handle_event(&self, event: &InboundEvent) {
        dispatch_event(self.handlers.as_ref(), event);
    }

    pub fn publish(&self, event: InboundEvent) -> usize {
        self.bus.publish(event)
    }

    pub fn snapshot(&self) -> Arc<ConversationState> {
        self.store.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<ConversationState>> {
        self.store.subscribe()
    }

    pub async fn start_thread(&self, workspace_id: &str) -> Result<String> {
        self.lifecycle.start_thread(workspace_id).await
    }

    pub async fn send_user_message(&self, workspace_id: &str, text: &str) -> Result<SentMessage> {
        self.lifecycle.send_user_message(workspace_id, text).await
    }

    pub fn select_thread(&self, workspace_id: &str, thread_id: Option<&str>) -> Result<()> {
        self.lifecycle.select_thread(workspace_id, thread_id)
    }

    pub async fn decide_approval(
        &self,
        request: &ApprovalRequest,
        decision: ApprovalDecision,
    ) -> Result<()> {
        self.approvals.decide(request, decision).await
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("trace", &self.trace)
            .field("subscribers", &self.bus.subscriber_count())
            .finish_non_exhaustive()
    }
}
