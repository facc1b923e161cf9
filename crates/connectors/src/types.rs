use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Role of a message in an ingested conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Human,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Human => "human",
            MessageRole::Assistant => "assistant",
            MessageRole::ToolCall => "tool_call",
            MessageRole::ToolResult => "tool_result",
            MessageRole::System => "system",
        }
    }
}

/// A single message in a conversation. Immutable after ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A complete conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub source_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Conversation {
    pub fn duration_seconds(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn human_messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter().filter(|m| m.role == MessageRole::Human)
    }

    pub fn assistant_messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
    }

    /// Working directory recorded at ingest, if any.
    pub fn working_directory(&self) -> Option<&str> {
        self.metadata.get("working_directory").and_then(Value::as_str)
    }
}

/// A batch of conversations from a connector, with cursor pagination.
#[derive(Debug, Clone, Default)]
pub struct ConversationBatch {
    pub conversations: Vec<Conversation>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

impl ConversationBatch {
    pub fn total_messages(&self) -> usize {
        self.conversations.iter().map(|c| c.message_count()).sum()
    }
}

/// Settings parsed from a connector definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSettings {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default = "d_format")]
    pub format: String,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: String::new(),
            format: d_format(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_format() -> String {
    "jsonl".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: MessageRole) -> ConversationMessage {
        ConversationMessage {
            role,
            content: "x".into(),
            timestamp: None,
            metadata: Map::new(),
            tool_name: None,
            tool_input: None,
            tool_result: None,
        }
    }

    #[test]
    fn role_filters() {
        let conv = Conversation {
            session_id: "s".into(),
            messages: vec![
                msg(MessageRole::Human),
                msg(MessageRole::Assistant),
                msg(MessageRole::Human),
                msg(MessageRole::ToolCall),
            ],
            started_at: Utc::now(),
            ended_at: Utc::now(),
            source_type: "test".into(),
            metadata: Map::new(),
        };
        assert_eq!(conv.human_messages().count(), 2);
        assert_eq!(conv.assistant_messages().count(), 1);
        assert_eq!(conv.message_count(), 4);
    }

    #[test]
    fn role_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageRole::ToolCall).unwrap(),
            "\"tool_call\""
        );
        let parsed: MessageRole = serde_json::from_str("\"tool_result\"").unwrap();
        assert_eq!(parsed, MessageRole::ToolResult);
    }
}
