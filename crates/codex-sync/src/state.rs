//! Canonical conversation state and its transition function.
//!
//! [`ConversationState::apply`] is the only place state changes. The
//! [`ConversationStore`] owns one state behind a mutex, applies actions in
//! arrival order, and republishes a fully-applied snapshot after each
//! dispatch. Each thread's message list sits behind an `Arc`, so a snapshot
//! costs one map clone plus a copy of whichever thread was just written.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::types::{ApprovalRequest, Message, MessageRole, Thread, ThreadStatus, Workspace};

const THREAD_NAME_PREFIX: &str = "Agent";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationAction {
    SetActiveThread {
        workspace_id: String,
        thread_id: Option<String>,
    },
    EnsureThread {
        workspace_id: String,
        thread_id: String,
    },
    AddUserMessage {
        thread_id: String,
        message: Message,
    },
    AppendAssistantDelta {
        thread_id: String,
        item_id: String,
        delta: String,
    },
    CompleteAssistantMessage {
        thread_id: String,
        item_id: String,
        text: String,
    },
    AddApproval(ApprovalRequest),
    RemoveApproval {
        request_id: i64,
    },
    MarkWorkspaceConnected {
        workspace_id: String,
    },
    MarkProcessing {
        thread_id: String,
        is_processing: bool,
    },
    MarkUnread {
        thread_id: String,
        has_unread: bool,
    },
}

impl ConversationAction {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SetActiveThread { .. } => "set_active_thread",
            Self::EnsureThread { .. } => "ensure_thread",
            Self::AddUserMessage { .. } => "add_user_message",
            Self::AppendAssistantDelta { .. } => "append_assistant_delta",
            Self::CompleteAssistantMessage { .. } => "complete_assistant_message",
            Self::AddApproval(_) => "add_approval",
            Self::RemoveApproval { .. } => "remove_approval",
            Self::MarkWorkspaceConnected { .. } => "mark_workspace_connected",
            Self::MarkProcessing { .. } => "mark_processing",
            Self::MarkUnread { .. } => "mark_unread",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    threads_by_workspace: BTreeMap<String, Vec<Thread>>,
    active_thread_by_workspace: BTreeMap<String, String>,
    messages_by_thread: BTreeMap<String, Arc<Vec<Message>>>,
    thread_status_by_id: BTreeMap<String, ThreadStatus>,
    connected_workspaces: BTreeSet<String>,
    approvals: Vec<ApprovalRequest>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, action: ConversationAction) {
        match action {
            ConversationAction::SetActiveThread {
                workspace_id,
                thread_id,
            } => match thread_id {
                Some(thread_id) => {
                    if let Some(status) = self.thread_status_by_id.get_mut(&thread_id) {
                        status.has_unread = false;
                    }
                    self.active_thread_by_workspace
                        .insert(workspace_id, thread_id);
                }
                None => {
                    self.active_thread_by_workspace.remove(&workspace_id);
                }
            },
            ConversationAction::EnsureThread {
                workspace_id,
                thread_id,
            } => self.ensure_thread(workspace_id, thread_id),
            ConversationAction::AddUserMessage { thread_id, message } => {
                self.messages_mut(thread_id).push(message);
            }
            ConversationAction::AppendAssistantDelta {
                thread_id,
                item_id,
                delta,
            } => {
                let messages = self.messages_mut(thread_id);
                match messages.iter_mut().find(|message| message.id == item_id) {
                    Some(message) => message.text.push_str(&delta),
                    None => messages.push(Message::assistant(item_id, delta)),
                }
            }
            ConversationAction::CompleteAssistantMessage {
                thread_id,
                item_id,
                text,
            } => {
                let messages = self.messages_mut(thread_id);
                match messages.iter_mut().find(|message| message.id == item_id) {
                    // An empty completion must not erase streamed content.
                    Some(message) => {
                        if !text.is_empty() {
                            message.text = text;
                        }
                    }
                    None => messages.push(Message::assistant(item_id, text)),
                }
            }
            ConversationAction::AddApproval(request) => self.approvals.push(request),
            ConversationAction::RemoveApproval { request_id } => {
                self.approvals
                    .retain(|request| request.request_id != request_id);
            }
            ConversationAction::MarkWorkspaceConnected { workspace_id } => {
                self.connected_workspaces.insert(workspace_id);
            }
            ConversationAction::MarkProcessing {
                thread_id,
                is_processing,
            } => {
                if let Some(status) = self.known_status_mut(thread_id) {
                    status.is_processing = is_processing;
                }
            }
            ConversationAction::MarkUnread {
                thread_id,
                has_unread,
            } => {
                if let Some(status) = self.known_status_mut(thread_id) {
                    status.has_unread = has_unread;
                }
            }
        }
    }

    fn messages_mut(&mut self, thread_id: String) -> &mut Vec<Message> {
        Arc::make_mut(self.messages_by_thread.entry(thread_id).or_default())
    }

    /// Status flags only exist for threads that have been ensured.
    fn known_status_mut(&mut self, thread_id: String) -> Option<&mut ThreadStatus> {
        if self.thread(&thread_id).is_none() {
            tracing::debug!(thread_id = %thread_id, "status update for unknown thread ignored");
            return None;
        }
        Some(self.thread_status_by_id.entry(thread_id).or_default())
    }

    fn ensure_thread(&mut self, workspace_id: String, thread_id: String) {
        // Thread ids are unique process-wide, so a hit in any workspace wins.
        if self.workspace_of_thread(&thread_id).is_some() {
            return;
        }
        let threads = self
            .threads_by_workspace
            .entry(workspace_id.clone())
            .or_default();
        let display_name = format!("{THREAD_NAME_PREFIX} {}", threads.len() + 1);
        threads.push(Thread {
            id: thread_id.clone(),
            workspace_id: workspace_id.clone(),
            display_name,
        });
        self.active_thread_by_workspace
            .entry(workspace_id)
            .or_insert(thread_id);
    }

    pub fn threads(&self, workspace_id: &str) -> &[Thread] {
        self.threads_by_workspace
            .get(workspace_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads_by_workspace
            .values()
            .flatten()
            .find(|thread| thread.id == thread_id)
    }

    pub fn workspace_of_thread(&self, thread_id: &str) -> Option<&str> {
        self.thread(thread_id)
            .map(|thread| thread.workspace_id.as_str())
    }

    pub fn has_thread(&self, workspace_id: &str, thread_id: &str) -> bool {
        self.threads(workspace_id)
            .iter()
            .any(|thread| thread.id == thread_id)
    }

    pub fn active_thread(&self, workspace_id: &str) -> Option<&str> {
        self.active_thread_by_workspace
            .get(workspace_id)
            .map(String::as_str)
    }

    pub fn messages(&self, thread_id: &str) -> &[Message] {
        self.messages_by_thread
            .get(thread_id)
            .map(|messages| messages.as_slice())
            .unwrap_or_default()
    }

    pub fn message(&self, thread_id: &str, item_id: &str) -> Option<&Message> {
        self.messages(thread_id)
            .iter()
            .find(|message| message.id == item_id)
    }

    pub fn assistant_messages(&self, thread_id: &str) -> impl Iterator<Item = &Message> {
        self.messages(thread_id)
            .iter()
            .filter(|message| message.role == MessageRole::Assistant)
    }

    pub fn thread_status(&self, thread_id: &str) -> ThreadStatus {
        self.thread_status_by_id
            .get(thread_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_workspace_connected(&self, workspace_id: &str) -> bool {
        self.connected_workspaces.contains(workspace_id)
    }

    /// Every workspace that has threads or has reported a connection.
    pub fn workspaces(&self) -> Vec<Workspace> {
        self.threads_by_workspace
            .keys()
            .chain(self.connected_workspaces.iter())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|id| Workspace {
                id: id.clone(),
                connected: self.connected_workspaces.contains(id),
            })
            .collect()
    }

    pub fn approvals(&self) -> &[ApprovalRequest] {
        &self.approvals
    }

    pub fn approvals_for_workspace<'a>(
        &'a self,
        workspace_id: &'a str,
    ) -> impl Iterator<Item = &'a ApprovalRequest> + 'a {
        self.approvals
            .iter()
            .filter(move |request| request.workspace_id == workspace_id)
    }
}

/// Pure form of [`ConversationState::apply`].
#[must_use]
pub fn reduce(state: &ConversationState, action: ConversationAction) -> ConversationState {
    let mut next = state.clone();
    next.apply(action);
    next
}

/// Single writer for [`ConversationState`].
///
/// Every dispatch runs to completion under the lock and the resulting
/// snapshot is published before the lock is released, so watchers observe
/// snapshots in the same order the actions were applied.
pub struct ConversationStore {
    state: Mutex<ConversationState>,
    snapshots: watch::Sender<Arc<ConversationState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_state(ConversationState::default())
    }

    pub fn with_state(state: ConversationState) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(state.clone()));
        Self {
            state: Mutex::new(state),
            snapshots,
        }
    }

    pub fn dispatch(&self, action: ConversationAction) -> Arc<ConversationState> {
        self.dispatch_all([action])
    }

    /// Applies `actions` in order as one step; watchers never see a partial batch.
    pub fn dispatch_all(
        &self,
        actions: impl IntoIterator<Item = ConversationAction>,
    ) -> Arc<ConversationState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for action in actions {
            tracing::trace!(action = action.label(), "conversation action");
            state.apply(action);
        }
        let snapshot = Arc::new(state.clone());
        self.snapshots.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// Plans a batch against the current state and applies it in the same
    /// step, so the plan cannot act on a stale view.
    pub fn dispatch_with<I>(
        &self,
        plan: impl FnOnce(&ConversationState) -> I,
    ) -> Arc<ConversationState>
    where
        I: IntoIterator<Item = ConversationAction>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let actions: Vec<_> = plan(&state).into_iter().collect();
        if actions.is_empty() {
            return self.snapshots.borrow().clone();
        }
        for action in actions {
            tracing::trace!(action = action.label(), "conversation action");
            state.apply(action);
        }
        let snapshot = Arc::new(state.clone());
        self.snapshots.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    pub fn snapshot(&self) -> Arc<ConversationState> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ConversationState>> {
        self.snapshots.subscribe()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationAction, ConversationState, ConversationStore, reduce};
    use crate::types::{ApprovalRequest, Message, MessageRole, Workspace};
    use serde_json::Map;
    use std::sync::Arc;

    fn ensure(workspace_id: &str, thread_id: &str) -> ConversationAction {
        ConversationAction::EnsureThread {
            workspace_id: workspace_id.to_string(),
            thread_id: thread_id.to_string(),
        }
    }

    fn delta(thread_id: &str, item_id: &str, text: &str) -> ConversationAction {
        ConversationAction::AppendAssistantDelta {
            thread_id: thread_id.to_string(),
            item_id: item_id.to_string(),
            delta: text.to_string(),
        }
    }

    fn complete(thread_id: &str, item_id: &str, text: &str) -> ConversationAction {
        ConversationAction::CompleteAssistantMessage {
            thread_id: thread_id.to_string(),
            item_id: item_id.to_string(),
            text: text.to_string(),
        }
    }

    fn approval(workspace_id: &str, request_id: i64) -> ApprovalRequest {
        ApprovalRequest {
            workspace_id: workspace_id.to_string(),
            request_id,
            method: "item/commandExecution/requestApproval".to_string(),
            params: Map::new(),
        }
    }

    #[test]
    fn ensure_thread_is_idempotent() {
        let once = reduce(&ConversationState::new(), ensure("w1", "t1"));
        let twice = reduce(&once, ensure("w1", "t1"));
        assert_eq!(once, twice);
        assert_eq!(twice.threads("w1").len(), 1);
        assert_eq!(twice.active_thread("w1"), Some("t1"));
    }

    #[test]
    fn ensure_thread_names_by_position_and_keeps_existing_selection() {
        let mut state = ConversationState::new();
        state.apply(ensure("w1", "t1"));
        state.apply(ensure("w1", "t2"));
        state.apply(ensure("w1", "t3"));

        let names: Vec<_> = state
            .threads("w1")
            .iter()
            .map(|thread| thread.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Agent 1", "Agent 2", "Agent 3"]);
        assert_eq!(state.active_thread("w1"), Some("t1"));
    }

    #[test]
    fn ensure_thread_ignores_id_owned_by_another_workspace() {
        let mut state = ConversationState::new();
        state.apply(ensure("w1", "t1"));
        state.apply(ensure("w2", "t1"));
        assert!(state.threads("w2").is_empty());
        assert_eq!(state.active_thread("w2"), None);
        assert_eq!(state.workspace_of_thread("t1"), Some("w1"));
    }

    #[test]
    fn ensure_thread_sets_active_after_pointer_cleared() {
        let mut state = ConversationState::new();
        state.apply(ensure("w1", "t1"));
        state.apply(ConversationAction::SetActiveThread {
            workspace_id: "w1".to_string(),
            thread_id: None,
        });
        state.apply(ensure("w1", "t2"));
        assert_eq!(state.active_thread("w1"), Some("t2"));
    }

    #[test]
    fn deltas_accumulate_into_one_message() {
        let mut state = ConversationState::new();
        state.apply(delta("t", "item-1", "He"));
        state.apply(delta("t", "item-1", "llo"));
        assert_eq!(state.messages("t"), &[Message::assistant("item-1", "Hello")]);
    }

    #[test]
    fn replayed_delta_duplicates_text() {
        let mut state = ConversationState::new();
        state.apply(delta("t", "item-1", "ab"));
        state.apply(delta("t", "item-1", "ab"));
        assert_eq!(
            state.message("t", "item-1").map(|message| message.text.as_str()),
            Some("abab")
        );
    }

    #[test]
    fn empty_completion_keeps_streamed_text() {
        let mut state = ConversationState::new();
        state.apply(delta("t", "item-1", "He"));
        state.apply(delta("t", "item-1", "llo"));
        state.apply(complete("t", "item-1", ""));
        assert_eq!(
            state.message("t", "item-1").map(|message| message.text.as_str()),
            Some("Hello")
        );
        state.apply(complete("t", "item-1", "final"));
        assert_eq!(
            state.message("t", "item-1").map(|message| message.text.as_str()),
            Some("final")
        );
        assert_eq!(state.messages("t").len(), 1);
    }

    #[test]
    fn completion_without_prior_delta_creates_message() {
        let mut state = ConversationState::new();
        state.apply(complete("t", "item-9", "done"));
        assert_eq!(state.messages("t"), &[Message::assistant("item-9", "done")]);
    }

    #[test]
    fn user_messages_are_not_deduplicated() {
        let mut state = ConversationState::new();
        for _ in 0..2 {
            state.apply(ConversationAction::AddUserMessage {
                thread_id: "t".to_string(),
                message: Message::user("u-1", "hi"),
            });
        }
        assert_eq!(state.messages("t").len(), 2);
        assert!(
            state
                .messages("t")
                .iter()
                .all(|message| message.role == MessageRole::User)
        );
        assert_eq!(state.assistant_messages("t").count(), 0);
    }

    #[test]
    fn remove_approval_only_drops_matching_request() {
        let mut state = ConversationState::new();
        state.apply(ConversationAction::AddApproval(approval("w1", 7)));
        state.apply(ConversationAction::AddApproval(approval("w1", 8)));
        state.apply(ConversationAction::AddApproval(approval("w2", 9)));
        state.apply(ConversationAction::RemoveApproval { request_id: 7 });

        let ids: Vec<_> = state
            .approvals()
            .iter()
            .map(|request| request.request_id)
            .collect();
        assert_eq!(ids, vec![8, 9]);
        assert_eq!(state.approvals_for_workspace("w2").count(), 1);
    }

    #[test]
    fn approval_insertion_keeps_duplicate_request_ids() {
        let mut state = ConversationState::new();
        state.apply(ConversationAction::AddApproval(approval("w1", 7)));
        state.apply(ConversationAction::AddApproval(approval("w1", 7)));
        assert_eq!(state.approvals().len(), 2);

        state.apply(ConversationAction::RemoveApproval { request_id: 7 });
        assert!(state.approvals().is_empty());
    }

    #[test]
    fn active_pointers_are_per_workspace() {
        let mut state = ConversationState::new();
        state.apply(ensure("w2", "t2"));
        state.apply(ensure("w1", "t0"));
        state.apply(ensure("w1", "t1"));
        state.apply(ConversationAction::SetActiveThread {
            workspace_id: "w1".to_string(),
            thread_id: Some("t1".to_string()),
        });
        assert_eq!(state.active_thread("w1"), Some("t1"));
        assert_eq!(state.active_thread("w2"), Some("t2"));
    }

    #[test]
    fn selecting_a_thread_clears_unread() {
        let mut state = ConversationState::new();
        state.apply(ensure("w1", "t1"));
        state.apply(ensure("w1", "t2"));
        state.apply(ConversationAction::MarkUnread {
            thread_id: "t2".to_string(),
            has_unread: true,
        });
        assert!(state.thread_status("t2").has_unread);
        state.apply(ConversationAction::SetActiveThread {
            workspace_id: "w1".to_string(),
            thread_id: Some("t2".to_string()),
        });
        assert!(!state.thread_status("t2").has_unread);
    }

    #[test]
    fn connected_workspaces_are_listed() {
        let mut state = ConversationState::new();
        state.apply(ConversationAction::MarkWorkspaceConnected {
            workspace_id: "w3".to_string(),
        });
        state.apply(ensure("w1", "t1"));
        assert!(state.is_workspace_connected("w3"));
        assert!(!state.is_workspace_connected("w1"));
        let workspaces = state.workspaces();
        assert_eq!(
            workspaces,
            vec![
                Workspace {
                    id: "w1".to_string(),
                    connected: false,
                },
                Workspace {
                    id: "w3".to_string(),
                    connected: true,
                },
            ]
        );
    }

    #[test]
    fn reduce_leaves_input_untouched() {
        let before = ConversationState::new();
        let after = reduce(&before, ensure("w1", "t1"));
        assert!(before.threads("w1").is_empty());
        assert_eq!(after.threads("w1").len(), 1);
    }

    #[test]
    fn store_publishes_batches_atomically() {
        let store = ConversationStore::new();
        let mut watcher = store.subscribe();
        store.dispatch_all([ensure("w1", "t1"), delta("t1", "m1", "hey")]);

        assert!(watcher.has_changed().unwrap_or(false));
        let snapshot = watcher.borrow_and_update().clone();
        assert_eq!(snapshot.threads("w1").len(), 1);
        assert_eq!(snapshot.messages("t1").len(), 1);
        assert_eq!(store.snapshot().as_ref(), snapshot.as_ref());
    }

    #[test]
    fn planned_dispatch_sees_current_state() {
        let store = ConversationStore::new();
        store.dispatch_all([ensure("w1", "t1"), ensure("w1", "t2")]);

        let mark_if_inactive = |thread_id: &'static str| {
            move |state: &ConversationState| {
                (state.active_thread("w1") != Some(thread_id)).then(|| {
                    ConversationAction::MarkUnread {
                        thread_id: thread_id.to_string(),
                        has_unread: true,
                    }
                })
            }
        };

        store.dispatch_with(mark_if_inactive("t1"));
        store.dispatch_with(mark_if_inactive("t2"));
        let snapshot = store.snapshot();
        assert!(!snapshot.thread_status("t1").has_unread);
        assert!(snapshot.thread_status("t2").has_unread);
    }

    #[test]
    fn status_flags_ignore_unknown_threads() {
        let mut state = ConversationState::new();
        state.apply(ConversationAction::MarkProcessing {
            thread_id: "ghost".to_string(),
            is_processing: true,
        });
        state.apply(ConversationAction::MarkUnread {
            thread_id: "ghost".to_string(),
            has_unread: true,
        });
        assert_eq!(state, ConversationState::new());

        state.apply(ensure("w1", "t1"));
        state.apply(ConversationAction::MarkProcessing {
            thread_id: "t1".to_string(),
            is_processing: true,
        });
        assert!(state.thread_status("t1").is_processing);
    }

    #[test]
    fn snapshots_share_untouched_threads() {
        let store = ConversationStore::new();
        store.dispatch_all([
            ensure("w1", "t1"),
            ensure("w1", "t2"),
            delta("t1", "m1", "a"),
            delta("t2", "m2", "b"),
        ]);
        let before = store.snapshot();
        let after = store.dispatch(delta("t1", "m1", "c"));

        assert_eq!(before.messages("t1")[0].text, "a");
        assert_eq!(after.messages("t1")[0].text, "ac");
        assert!(Arc::ptr_eq(
            &before.messages_by_thread["t2"],
            &after.messages_by_thread["t2"]
        ));
    }
}
