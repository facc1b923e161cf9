//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use and the
//! Anthropic-specific message structure where system prompts go in a
//! separate top-level `system` field. The system prompt is sent with an
//! ephemeral cache directive so repeated-prefix calls within a cycle
//! hit the prompt cache.

use serde_json::Value;

use rv_domain::config::AnthropicConfig;
use rv_domain::error::{Error, Result};
use rv_domain::llm::{
    AgentMessage, AgentRunConfig, ChatRole, TokenUsage, ToolCall, ToolDefinition,
};

use crate::traits::{ChatBackend, ChatTurn};
use crate::util::{from_reqwest, resolve_secret};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn from_config(cfg: &AnthropicConfig) -> Result<Self> {
        let api_key = resolve_secret(&cfg.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn messages_to_anthropic(messages: &[AgentMessage]) -> Vec<Value> {
    let mut out = Vec::new();
    for msg in messages {
        match msg.role {
            ChatRole::User => {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.as_deref().unwrap_or(""),
                }));
            }
            ChatRole::Assistant => {
                if msg.tool_calls.is_empty() {
                    out.push(serde_json::json!({
                        "role": "assistant",
                        "content": msg.content.as_deref().unwrap_or(""),
                    }));
                } else {
                    let mut content = Vec::new();
                    if let Some(text) = msg.content.as_deref() {
                        if !text.is_empty() {
                            content.push(serde_json::json!({"type": "text", "text": text}));
                        }
                    }
                    for tc in &msg.tool_calls {
                        content.push(serde_json::json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.input,
                        }));
                    }
                    out.push(serde_json::json!({"role": "assistant", "content": content}));
                }
            }
            ChatRole::ToolResult => {
                if let Some(ref tr) = msg.tool_result {
                    // Tool results travel as user messages with
                    // tool_result content blocks.
                    out.push(serde_json::json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tr.tool_call_id,
                            "content": tr.content,
                            "is_error": tr.is_error,
                        }],
                    }));
                }
            }
            // System text goes in the top-level `system` field instead.
            ChatRole::System => {}
        }
    }
    out
}

pub(crate) fn build_messages_body(
    messages: &[AgentMessage],
    config: &AgentRunConfig,
    tools: &[ToolDefinition],
    default_model: &str,
) -> Value {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| default_model.to_string());

    let mut body = serde_json::json!({
        "model": model,
        "max_tokens": config.max_tokens,
        "messages": messages_to_anthropic(messages),
    });

    if !config.system_prompt.is_empty() {
        body["system"] = serde_json::json!([{
            "type": "text",
            "text": config.system_prompt,
            "cache_control": {"type": "ephemeral"},
        }]);
    }

    if !tools.is_empty() {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    if let Some(temp) = config.temperature {
        body["temperature"] = serde_json::json!(temp);
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_messages_response(body: &Value) -> ChatTurn {
    let empty = Vec::new();
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input: block
                        .get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                });
            }
            _ => {}
        }
    }

    let content = text_parts.join("");
    let message = AgentMessage {
        role: ChatRole::Assistant,
        content: (!content.is_empty()).then_some(content),
        tool_calls,
        tool_result: None,
    };

    let usage = body.get("usage").map(parse_usage).unwrap_or_default();
    let stop_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(str::to_string);

    ChatTurn {
        message,
        usage,
        stop_reason,
    }
}

pub(crate) fn parse_usage(v: &Value) -> TokenUsage {
    let read = |key: &str| v.get(key).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage {
        input_tokens: read("input_tokens"),
        output_tokens: read("output_tokens"),
        cache_read_tokens: read("cache_read_input_tokens"),
        cache_write_tokens: read("cache_creation_input_tokens"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatBackend for AnthropicBackend {
    async fn complete(
        &self,
        messages: &[AgentMessage],
        config: &AgentRunConfig,
        tools: &[ToolDefinition],
    ) -> Result<ChatTurn> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_messages_body(messages, config, tools, &self.default_model);

        tracing::debug!(url = %url, "anthropic chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        Ok(parse_messages_response(&resp_json))
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_gets_cache_control() {
        let config = AgentRunConfig {
            system_prompt: "You analyze conversations.".into(),
            ..Default::default()
        };
        let body = build_messages_body(&[AgentMessage::user("hi")], &config, &[], "model-x");
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["model"], "model-x");
        let temperature = body["temperature"].as_f64().unwrap();
        assert!((temperature - 0.7).abs() < 1e-6);
    }

    #[test]
    fn tool_results_become_user_tool_result_blocks() {
        let messages = vec![
            AgentMessage::user("go"),
            AgentMessage {
                role: ChatRole::Assistant,
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "list_conversations".into(),
                    input: serde_json::json!({"limit": 5}),
                }],
                tool_result: None,
            },
            AgentMessage::tool_result("call_1", "{\"total\": 3}", false),
        ];
        let wire = messages_to_anthropic(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][0]["type"], "tool_use");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["type"], "tool_result");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn response_parse_extracts_tool_calls_and_usage() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "c9", "name": "search_messages",
                 "input": {"query": "tests"}},
            ],
            "stop_reason": "tool_use",
            "usage": {
                "input_tokens": 1200,
                "output_tokens": 80,
                "cache_read_input_tokens": 1000,
                "cache_creation_input_tokens": 200,
            },
        });
        let turn = parse_messages_response(&body);
        assert_eq!(turn.message.content.as_deref(), Some("Let me check."));
        assert_eq!(turn.message.tool_calls.len(), 1);
        assert_eq!(turn.message.tool_calls[0].name, "search_messages");
        assert_eq!(turn.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(turn.usage.input_tokens, 1200);
        assert_eq!(turn.usage.cache_read_tokens, 1000);
        assert_eq!(turn.usage.cache_write_tokens, 200);
    }

    #[test]
    fn empty_content_yields_none() {
        let turn = parse_messages_response(&serde_json::json!({
            "content": [],
            "stop_reason": "end_turn",
        }));
        assert!(turn.message.content.is_none());
        assert!(turn.message.tool_calls.is_empty());
        assert_eq!(turn.usage, TokenUsage::default());
    }
}
