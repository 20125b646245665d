//! Inbound event feed: classification and handler dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::MAX_EVENT_CHANNEL_CAPACITY;
use crate::types::{
    AgentMessageCompleted, AgentMessageDelta, ApprovalRequest, InboundEvent, TurnActivity,
};

pub const CONNECTED_METHOD: &str = "codex/connected";
pub const APPROVAL_REQUEST_MARKER: &str = "requestApproval";
pub const AGENT_MESSAGE_DELTA_METHOD: &str = "item/agentMessage/delta";
pub const ITEM_COMPLETED_METHOD: &str = "item/completed";
pub const AGENT_MESSAGE_ITEM_TYPE: &str = "agentMessage";
pub const TURN_STARTED_METHOD: &str = "turn/started";
pub const TURN_COMPLETED_METHOD: &str = "turn/completed";

const THREAD_ID_KEYS: &[&str] = &["threadId", "thread_id"];
const ITEM_ID_KEYS: &[&str] = &["itemId", "item_id"];

/// An inbound event after classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    WorkspaceConnected { workspace_id: String },
    ApprovalRequested(ApprovalRequest),
    AgentMessageDelta(AgentMessageDelta),
    AgentMessageCompleted(AgentMessageCompleted),
    TurnStarted(TurnActivity),
    TurnCompleted(TurnActivity),
}

/// Callbacks invoked for inbound events. Every method defaults to a no-op.
pub trait EventHandlers: Send + Sync {
    fn on_raw_event(&self, _event: &InboundEvent) {}
    fn on_workspace_connected(&self, _workspace_id: &str) {}
    fn on_approval_request(&self, _request: ApprovalRequest) {}
    fn on_agent_message_delta(&self, _delta: AgentMessageDelta) {}
    fn on_agent_message_completed(&self, _completed: AgentMessageCompleted) {}
    fn on_turn_started(&self, _turn: TurnActivity) {}
    fn on_turn_completed(&self, _turn: TurnActivity) {}
}

/// Classifies by method, first match wins. Returns `None` for events that
/// only need raw tracing, including malformed ones.
pub fn classify(event: &InboundEvent) -> Option<FeedEvent> {
    let method = event.method();
    let workspace_id = event.workspace_id.clone();

    if method == CONNECTED_METHOD {
        return Some(FeedEvent::WorkspaceConnected { workspace_id });
    }

    if method.contains(APPROVAL_REQUEST_MARKER)
        && let Some(request_id) = event.request_id()
    {
        let params = event
            .params()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        return Some(FeedEvent::ApprovalRequested(ApprovalRequest {
            workspace_id,
            request_id,
            method: method.to_string(),
            params,
        }));
    }

    let params = event.params();
    match method {
        AGENT_MESSAGE_DELTA_METHOD => {
            let params = params?;
            Some(FeedEvent::AgentMessageDelta(AgentMessageDelta {
                workspace_id,
                thread_id: first_string(params, THREAD_ID_KEYS)?,
                item_id: first_string(params, ITEM_ID_KEYS)?,
                delta: first_string(params, &["delta"])?,
            }))
        }
        ITEM_COMPLETED_METHOD => {
            let params = params?;
            let item = params.get("item")?;
            if item.get("type").and_then(Value::as_str) != Some(AGENT_MESSAGE_ITEM_TYPE) {
                return None;
            }
            Some(FeedEvent::AgentMessageCompleted(AgentMessageCompleted {
                workspace_id,
                thread_id: first_string(params, THREAD_ID_KEYS)?,
                item_id: first_string(item, &["id"])?,
                text: item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }))
        }
        TURN_STARTED_METHOD | TURN_COMPLETED_METHOD => {
            let params = params?;
            let thread_id = first_string(params, THREAD_ID_KEYS).or_else(|| {
                params
                    .get("turn")
                    .and_then(|turn| first_string(turn, THREAD_ID_KEYS))
            })?;
            let turn = TurnActivity {
                workspace_id,
                thread_id,
            };
            if method == TURN_STARTED_METHOD {
                Some(FeedEvent::TurnStarted(turn))
            } else {
                Some(FeedEvent::TurnCompleted(turn))
            }
        }
        _ => None,
    }
}

/// Traces `event` through `on_raw_event`, then routes it to at most one
/// typed handler.
pub fn dispatch_event(handlers: &dyn EventHandlers, event: &InboundEvent) {
    handlers.on_raw_event(event);

    let Some(classified) = classify(event) else {
        tracing::debug!(
            workspace_id = %event.workspace_id,
            method = event.method(),
            "inbound event not routed"
        );
        return;
    };

    match classified {
        FeedEvent::WorkspaceConnected { workspace_id } => {
            handlers.on_workspace_connected(&workspace_id);
        }
        FeedEvent::ApprovalRequested(request) => handlers.on_approval_request(request),
        FeedEvent::AgentMessageDelta(delta) => handlers.on_agent_message_delta(delta),
        FeedEvent::AgentMessageCompleted(completed) => {
            handlers.on_agent_message_completed(completed);
        }
        FeedEvent::TurnStarted(turn) => handlers.on_turn_started(turn),
        FeedEvent::TurnCompleted(turn) => handlers.on_turn_completed(turn),
    }
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Process-wide inbound channel shared by every workspace.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<InboundEvent>,
}

impl EventBus {
    /// `capacity` is clamped to `1..=MAX_EVENT_CHANNEL_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_CHANNEL_CAPACITY));
        Self { sender }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: InboundEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self, handlers: Arc<dyn EventHandlers>) -> EventSubscription {
        EventSubscription::spawn(self.sender.subscribe(), handlers)
    }
}

type HandlerSlot = Arc<RwLock<Arc<dyn EventHandlers>>>;

/// A live subscription to an [`EventBus`].
///
/// The underlying receiver lives as long as the subscription; only the
/// delegate it forwards to can be swapped. Dropping the subscription
/// unsubscribes.
pub struct EventSubscription {
    handlers: HandlerSlot,
    active: Arc<AtomicBool>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventSubscription {
    /// Must be called from within a Tokio runtime.
    fn spawn(
        mut receiver: broadcast::Receiver<InboundEvent>,
        handlers: Arc<dyn EventHandlers>,
    ) -> Self {
        let slot: HandlerSlot = Arc::new(RwLock::new(handlers));
        let active = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task_slot = Arc::clone(&slot);
        let task_active = Arc::clone(&active);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = receiver.recv() => match received {
                        Ok(event) => {
                            if !task_active.load(Ordering::Acquire) {
                                break;
                            }
                            let current = task_slot
                                .read()
                                .unwrap_or_else(PoisonError::into_inner)
                                .clone();
                            dispatch_event(current.as_ref(), &event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "inbound event subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        Self {
            handlers: slot,
            active,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Points the subscription at a new handler set without resubscribing.
    pub fn replace_handlers(&self, handlers: Arc<dyn EventHandlers>) {
        *self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handlers;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Stops delivery. Safe to call more than once, including from inside a
    /// handler callback. A callback already running on the subscription task
    /// is allowed to finish; no later event is dispatched.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(shutdown) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = shutdown.send(());
        }
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
