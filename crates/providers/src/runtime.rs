//! The agent turn loop.
//!
//! Single-flight per agent: one loop drives one agent to completion.
//! Concurrency across agents is the caller's business (Stage A runs one
//! runtime per project group).

use std::sync::Arc;

use rv_domain::error::Result;
use rv_domain::llm::{AgentMessage, AgentOutcome, AgentRunConfig, TokenUsage};

use crate::traits::{ChatBackend, ToolDispatcher};

pub struct AgentRuntime {
    backend: Arc<dyn ChatBackend>,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn ChatBackend> {
        self.backend.clone()
    }

    /// Run an agent to completion.
    ///
    /// Repeats up to `config.max_turns`: send the accumulated messages,
    /// receive one assistant turn; stop on `end_turn` or when no tool
    /// calls are present. Otherwise each tool call is executed
    /// sequentially (an unknown tool produces an error tool-result) and
    /// the loop continues. Turn-cap exhaustion returns with stop reason
    /// `max_turns`.
    pub async fn run_agent(
        &self,
        initial_message: &str,
        config: &AgentRunConfig,
        tools: &dyn ToolDispatcher,
    ) -> Result<AgentOutcome> {
        let definitions = tools.definitions();
        let mut messages: Vec<AgentMessage> = vec![AgentMessage::user(initial_message)];
        let mut usage = TokenUsage::default();

        for _ in 0..config.max_turns {
            let turn = self
                .backend
                .complete(&messages, config, &definitions)
                .await?;
            usage += turn.usage;

            let assistant = turn.message;
            let tool_calls = assistant.tool_calls.clone();
            messages.push(assistant);

            let end_turn = turn.stop_reason.as_deref() == Some("end_turn");
            if end_turn || tool_calls.is_empty() {
                return Ok(AgentOutcome {
                    messages,
                    usage,
                    stop_reason: turn.stop_reason,
                });
            }

            for call in &tool_calls {
                let result = tools.dispatch(&call.name, &call.input).await;
                let message = match result {
                    Some(content) => AgentMessage::tool_result(&call.id, content, false),
                    None => AgentMessage::tool_result(
                        &call.id,
                        format!("Unknown tool: {}", call.name),
                        true,
                    ),
                };
                messages.push(message);
            }
        }

        Ok(AgentOutcome {
            messages,
            usage,
            stop_reason: Some("max_turns".into()),
        })
    }
}
