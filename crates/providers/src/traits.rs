use serde_json::Value;

use rv_domain::error::Result;
use rv_domain::llm::{AgentMessage, AgentRunConfig, TokenUsage, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One completed model turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: AgentMessage,
    pub usage: TokenUsage,
    /// Normalized stop reason (e.g. "end_turn", "tool_use").
    pub stop_reason: Option<String>,
}

/// Uniform interface to a tool-calling LLM.
///
/// Adapters translate between the internal message types and each
/// provider's wire format; they do not run the turn loop, that is
/// [`crate::runtime::AgentRuntime`]'s job.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the accumulated messages and receive one assistant turn.
    async fn complete(
        &self,
        messages: &[AgentMessage],
        config: &AgentRunConfig,
        tools: &[ToolDefinition],
    ) -> Result<ChatTurn>;

    /// A unique identifier for this backend instance.
    fn provider_id(&self) -> &str;

    /// Model used when the run config does not override it.
    fn default_model(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A set of tools an agent can call, dispatched by name.
///
/// Handlers never fail across this boundary: any handler-level problem
/// is encoded as `{"error": "..."}` inside the returned JSON string so
/// the model can observe it and recover. `dispatch` returns `None` only
/// for a tool name that does not exist in this set.
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn dispatch(&self, name: &str, args: &Value) -> Option<String>;
}
