//! Agent event streaming.
//!
//! A bounded in-memory ring of typed events with synchronous fan-out to
//! subscribers. The orchestrator owns the stream and injects it into
//! every stage; the control surface subscribes to relay events over its
//! WebSocket channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use rv_domain::llm::ToolDefinition;
use rv_providers::ToolDispatcher;

const SUMMARY_MAX: usize = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolCall,
    ToolResult,
    Thinking,
    Complete,
    Error,
}

/// Event emitted by an agent during execution.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    /// "detection", "comparison", "resolution", "orchestrator".
    pub agent_kind: String,
    pub event_kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Truncated description, at most 100 characters.
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AgentEvent {
    pub fn now(
        agent_id: impl Into<String>,
        agent_kind: impl Into<String>,
        event_kind: EventKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            agent_kind: agent_kind.into(),
            event_kind,
            tool_name: None,
            summary: truncate(&summary.into(), SUMMARY_MAX),
            details: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Subscriber = Box<dyn Fn(&AgentEvent) + Send + Sync>;

struct StreamState {
    events: Vec<AgentEvent>,
    run_id: Option<String>,
    running: bool,
}

pub struct AgentEventStream {
    state: Mutex<StreamState>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber_id: Mutex<u64>,
    max_events: usize,
}

impl Default for AgentEventStream {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AgentEventStream {
    pub fn new(max_events: usize) -> Self {
        Self {
            state: Mutex::new(StreamState {
                events: Vec::new(),
                run_id: None,
                running: false,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: Mutex::new(0),
            max_events,
        }
    }

    /// Start a new stream session, clearing prior events.
    pub fn start(&self, run_id: impl Into<String>) {
        let mut state = self.state.lock();
        state.run_id = Some(run_id.into());
        state.running = true;
        state.events.clear();
    }

    pub fn stop(&self) {
        self.state.lock().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn run_id(&self) -> Option<String> {
        self.state.lock().run_id.clone()
    }

    /// Append an event, enforce the ring bound, and fan out to every
    /// subscriber. Emission never fails: subscriber panics are caught
    /// and swallowed.
    pub fn emit(&self, event: AgentEvent) {
        {
            let mut state = self.state.lock();
            state.events.push(event.clone());
            if state.events.len() > self.max_events {
                let excess = state.events.len() - self.max_events;
                state.events.drain(..excess);
            }
        }

        let subscribers = self.subscribers.lock();
        for (_, subscriber) in subscribers.iter() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(&event);
            }));
        }
    }

    /// Register a subscriber; returns a token for `unsubscribe`.
    pub fn subscribe(&self, callback: impl Fn(&AgentEvent) + Send + Sync + 'static) -> u64 {
        let id = {
            let mut next = self.next_subscriber_id.lock();
            *next += 1;
            *next
        };
        self.subscribers.lock().push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().retain(|(id, _)| *id != token);
    }

    pub fn get_recent(&self, limit: usize) -> Vec<AgentEvent> {
        let state = self.state.lock();
        let start = state.events.len().saturating_sub(limit);
        state.events[start..].to_vec()
    }

    pub fn get_all(&self) -> Vec<AgentEvent> {
        self.state.lock().events.clone()
    }

    pub fn get_events_by_agent(&self, agent_id: &str) -> Vec<AgentEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Latest non-complete event per agent, omitting agents whose most
    /// recent activity is a terminal `complete`.
    pub fn get_active_agents(&self) -> BTreeMap<String, AgentEvent> {
        let state = self.state.lock();
        let mut active: BTreeMap<String, AgentEvent> = BTreeMap::new();
        let mut completed: Vec<String> = Vec::new();

        for event in state.events.iter().rev() {
            if event.event_kind == EventKind::Complete {
                completed.push(event.agent_id.clone());
            } else if !active.contains_key(&event.agent_id)
                && !completed.contains(&event.agent_id)
            {
                active.insert(event.agent_id.clone(), event.clone());
            }
        }
        active
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evented tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps a tool dispatcher so every invocation emits a `tool_call`
/// before and a `tool_result` (or `error`) after.
pub struct EventedTools<'a> {
    inner: &'a dyn ToolDispatcher,
    agent_id: String,
    agent_kind: String,
    stream: &'a AgentEventStream,
}

impl<'a> EventedTools<'a> {
    pub fn new(
        inner: &'a dyn ToolDispatcher,
        agent_id: impl Into<String>,
        agent_kind: impl Into<String>,
        stream: &'a AgentEventStream,
    ) -> Self {
        Self {
            inner,
            agent_id: agent_id.into(),
            agent_kind: agent_kind.into(),
            stream,
        }
    }
}

#[async_trait::async_trait]
impl<'a> ToolDispatcher for EventedTools<'a> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.inner.definitions()
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Option<String> {
        self.stream.emit(
            AgentEvent::now(
                self.agent_id.as_str(),
                self.agent_kind.as_str(),
                EventKind::ToolCall,
                format!("{name}({})", summarize_args(args)),
            )
            .with_tool(name)
            .with_details(serde_json::json!({"args": args})),
        );

        match self.inner.dispatch(name, args).await {
            Some(result) => {
                self.stream.emit(
                    AgentEvent::now(
                        self.agent_id.as_str(),
                        self.agent_kind.as_str(),
                        EventKind::ToolResult,
                        extract_result_summary(name, &result),
                    )
                    .with_tool(name)
                    .with_details(serde_json::json!({"result_length": result.len()})),
                );
                Some(result)
            }
            None => {
                self.stream.emit(
                    AgentEvent::now(
                        self.agent_id.as_str(),
                        self.agent_kind.as_str(),
                        EventKind::Error,
                        format!("{name}: unknown tool"),
                    )
                    .with_tool(name),
                );
                None
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull a human-scannable summary out of a tool's JSON result by
/// inspecting the shapes the stage tools actually return.
pub(crate) fn extract_result_summary(tool_name: &str, result: &str) -> String {
    let Ok(data) = serde_json::from_str::<Value>(result) else {
        return truncate(&format!("{tool_name}: {result}"), SUMMARY_MAX);
    };
    let Some(obj) = data.as_object() else {
        return truncate(&format!("{tool_name}: {result}"), SUMMARY_MAX);
    };

    if let Some(error) = obj.get("error").and_then(Value::as_str) {
        return truncate(&format!("{tool_name}: ERROR - {error}"), SUMMARY_MAX);
    }

    if let Some(success) = obj.get("success") {
        if let Some(message) = obj.get("message").and_then(Value::as_str) {
            return truncate(&format!("{tool_name}: {message}"), SUMMARY_MAX);
        }
        return truncate(&format!("{tool_name}: success={success}"), SUMMARY_MAX);
    }

    if let Some(total) = obj.get("total") {
        let noun = ["conversations", "issues", "results", "resolutions", "pending_actions"]
            .iter()
            .find(|key| obj.contains_key(**key));
        let text = match noun {
            Some(noun) => format!("{tool_name}: {total} {noun}"),
            None => format!("{tool_name}: total={total}"),
        };
        return truncate(&text, SUMMARY_MAX);
    }

    if let Some(messages) = obj.get("messages").and_then(Value::as_array) {
        let more = if obj.get("has_more").and_then(Value::as_bool).unwrap_or(false) {
            " (more available)"
        } else {
            ""
        };
        return truncate(
            &format!("{tool_name}: {} messages{more}", messages.len()),
            SUMMARY_MAX,
        );
    }

    if let Some(recommendation) = obj.get("recommendation").and_then(Value::as_str) {
        return truncate(&format!("{tool_name}: {recommendation}"), SUMMARY_MAX);
    }

    if let Some(issue_id) = obj.get("issue_id").and_then(Value::as_str) {
        let short: String = issue_id.chars().take(8).collect();
        return truncate(&format!("{tool_name}: issue {short}"), SUMMARY_MAX);
    }

    if let Some(action_id) = obj.get("action_id").and_then(Value::as_str) {
        return truncate(&format!("{tool_name}: action {action_id}"), SUMMARY_MAX);
    }

    let keys: Vec<&str> = obj.keys().take(3).map(String::as_str).collect();
    truncate(&format!("{tool_name}: {{{}...}}", keys.join(", ")), SUMMARY_MAX)
}

fn summarize_args(args: &Value) -> String {
    let Some(obj) = args.as_object() else {
        return String::new();
    };
    let mut parts = Vec::new();
    let mut total = 0usize;
    for (key, value) in obj {
        let rendered = match value {
            Value::String(s) if s.chars().count() > 20 => {
                format!("\"{}...\"", s.chars().take(20).collect::<String>())
            }
            Value::String(s) => format!("\"{s}\""),
            Value::Array(_) => "<array>".into(),
            Value::Object(_) => "<object>".into(),
            other => other.to_string(),
        };
        let part = format!("{key}={rendered}");
        if total + part.len() > 60 {
            parts.push("...".to_string());
            break;
        }
        total += part.len() + 2;
        parts.push(part);
    }
    parts.join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
