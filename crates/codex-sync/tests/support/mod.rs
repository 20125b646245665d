#![allow(dead_code, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use codex_sync::{AgentClient, AgentClientError, ApprovalDecision, ThreadStartResponse};
use serde_json::{Value, json};
use tokio::sync::Notify;

/// Agent client double that answers from pre-scripted queues and records
/// every call it receives.
#[derive(Default)]
pub struct ScriptedClient {
    starts: Mutex<VecDeque<Result<ThreadStartResponse, AgentClientError>>>,
    sends: Mutex<VecDeque<Result<Value, AgentClientError>>>,
    responses: Mutex<VecDeque<Result<(), AgentClientError>>>,
    calls: Mutex<Vec<String>>,
    start_gate: Option<Notify>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every `start_thread` call until [`ScriptedClient::release_start`].
    pub fn gated() -> Self {
        Self {
            start_gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    pub fn release_start(&self) {
        if let Some(gate) = self.start_gate.as_ref() {
            gate.notify_one();
        }
    }

    pub fn push_start(&self, result: Result<ThreadStartResponse, AgentClientError>) -> &Self {
        self.starts.lock().expect("starts").push_back(result);
        self
    }

    pub fn push_send(&self, result: Result<Value, AgentClientError>) -> &Self {
        self.sends.lock().expect("sends").push_back(result);
        self
    }

    pub fn push_response(&self, result: Result<(), AgentClientError>) -> &Self {
        self.responses.lock().expect("responses").push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls").push(call);
    }
}

fn exhausted(method: &str) -> AgentClientError {
    AgentClientError::call(method, "no scripted result")
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn start_thread(
        &self,
        workspace_id: &str,
    ) -> Result<ThreadStartResponse, AgentClientError> {
        self.record(format!("thread/start {workspace_id}"));
        if let Some(gate) = self.start_gate.as_ref() {
            gate.notified().await;
        }
        self.starts
            .lock()
            .expect("starts")
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("thread/start")))
    }

    async fn send_user_message(
        &self,
        workspace_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<Value, AgentClientError> {
        self.record(format!("turn/start {workspace_id} {thread_id} {text}"));
        self.sends
            .lock()
            .expect("sends")
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }

    async fn respond_to_request(
        &self,
        workspace_id: &str,
        request_id: i64,
        decision: ApprovalDecision,
    ) -> Result<(), AgentClientError> {
        self.record(format!(
            "respond {workspace_id} {request_id} {}",
            decision.label()
        ));
        self.responses
            .lock()
            .expect("responses")
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("respond")))
    }
}

pub fn delta(workspace_id: &str, thread_id: &str, item_id: &str, text: &str) -> codex_sync::InboundEvent {
    codex_sync::InboundEvent::new(
        workspace_id,
        json!({
            "method": "item/agentMessage/delta",
            "params": {"threadId": thread_id, "itemId": item_id, "delta": text}
        }),
    )
}

pub fn completed(
    workspace_id: &str,
    thread_id: &str,
    item_id: &str,
    text: Option<&str>,
) -> codex_sync::InboundEvent {
    let mut item = json!({"type": "agentMessage", "id": item_id});
    if let Some(text) = text {
        item["text"] = json!(text);
    }
    codex_sync::InboundEvent::new(
        workspace_id,
        json!({
            "method": "item/completed",
            "params": {"threadId": thread_id, "item": item}
        }),
    )
}

pub fn approval(workspace_id: &str, request_id: i64) -> codex_sync::InboundEvent {
    codex_sync::InboundEvent::new(
        workspace_id,
        json!({
            "method": "item/commandExecution/requestApproval",
            "id": request_id,
            "params": {"command": "rm -rf build"}
        }),
    )
}
