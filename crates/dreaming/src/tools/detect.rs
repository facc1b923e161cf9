//! Stage A toolset: read-only conversation exploration plus
//! `report_issue`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;

use rv_connectors::types::{Conversation, MessageRole};
use rv_domain::llm::ToolDefinition;
use rv_providers::ToolDispatcher;

use crate::report::{Evidence, Issue, IssueKind, Severity};
use crate::tools::{
    arg_bool, arg_str, arg_usize, count_ci, err_response, find_ci, pretty, truncate_chars,
};

const MESSAGE_PREVIEW_CHARS: usize = 500;
const SCAN_PREVIEW_CHARS: usize = 300;
const SNIPPET_CONTEXT_CHARS: usize = 50;

/// Detection context: the agent's conversation group and the issues it
/// reports. Owned by one agent for the duration of its loop.
pub struct DetectionTools {
    conversations: Vec<Conversation>,
    by_session: HashMap<String, usize>,
    reported: Mutex<Vec<Issue>>,
}

impl DetectionTools {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        let by_session = conversations
            .iter()
            .enumerate()
            .map(|(i, c)| (c.session_id.clone(), i))
            .collect();
        Self {
            conversations,
            by_session,
            reported: Mutex::new(Vec::new()),
        }
    }

    pub fn reported_issues(&self) -> Vec<Issue> {
        self.reported.lock().clone()
    }

    fn conversation(&self, session_id: &str) -> Option<&Conversation> {
        self.by_session
            .get(session_id)
            .map(|&i| &self.conversations[i])
    }

    // ── Tool handlers ──────────────────────────────────────────────

    /// Recent human messages across the group, newest first, grouped
    /// by working directory. The cheap first look before digging in.
    fn scan_recent_human_messages(&self, args: &Value) -> String {
        let wd_filter = arg_str(args, "working_directory");
        let limit = arg_usize(args, "limit", 100);

        let mut hits: Vec<(&Conversation, usize, &str)> = Vec::new();
        for conv in &self.conversations {
            if let Some(filter) = wd_filter {
                if conv.working_directory() != Some(filter) {
                    continue;
                }
            }
            for (index, msg) in conv.messages.iter().enumerate() {
                if msg.role == MessageRole::Human {
                    hits.push((conv, index, &msg.content));
                }
            }
        }

        // Newest first; message index breaks timestamp ties.
        hits.sort_by(|a, b| {
            let ts_a = a.0.messages[a.1].timestamp;
            let ts_b = b.0.messages[b.1].timestamp;
            ts_b.cmp(&ts_a).then(b.1.cmp(&a.1))
        });
        let total_scanned = hits.len();
        hits.truncate(limit);

        let mut projects: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (conv, index, content) in hits {
            let (preview, truncated) = truncate_chars(content, SCAN_PREVIEW_CHARS);
            let wd = conv
                .working_directory()
                .unwrap_or("(no project)")
                .to_string();
            projects.entry(wd).or_default().push(serde_json::json!({
                "conversation_id": conv.session_id,
                "message_index": index,
                "timestamp": conv.messages[index].timestamp.map(|t| t.to_rfc3339()),
                "content": preview,
                "truncated": truncated,
            }));
        }

        pretty(&serde_json::json!({
            "projects": projects,
            "total_human_messages": total_scanned,
            "limit": limit,
            "hint": "Use search_messages to chase anything interesting, then \
                     get_messages / get_full_message for surrounding context.",
        }))
    }

    fn list_conversations(&self, args: &Value) -> String {
        let limit = arg_usize(args, "limit", 50);
        let offset = arg_usize(args, "offset", 0);

        let entries: Vec<Value> = self
            .conversations
            .iter()
            .skip(offset)
            .take(limit)
            .map(|conv| {
                serde_json::json!({
                    "id": conv.session_id,
                    "started_at": conv.started_at.to_rfc3339(),
                    "ended_at": conv.ended_at.to_rfc3339(),
                    "working_directory": conv.working_directory(),
                    "message_count": conv.message_count(),
                    "human_messages": conv.human_messages().count(),
                    "assistant_messages": conv.assistant_messages().count(),
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "conversations": entries,
            "total": self.conversations.len(),
            "offset": offset,
            "limit": limit,
            "has_more": offset + limit < self.conversations.len(),
        }))
    }

    fn get_messages(&self, args: &Value) -> String {
        let Some(conversation_id) = arg_str(args, "conversation_id") else {
            return err_response("conversation_id is required");
        };
        let Some(conv) = self.conversation(conversation_id) else {
            return err_response(format!("Conversation {conversation_id} not found"));
        };
        let offset = arg_usize(args, "offset", 0);
        let limit = arg_usize(args, "limit", 50);

        let entries: Vec<Value> = conv
            .messages
            .iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, msg)| {
                let (content, truncated) = truncate_chars(&msg.content, MESSAGE_PREVIEW_CHARS);
                serde_json::json!({
                    "index": index,
                    "role": msg.role.as_str(),
                    "content": content,
                    "truncated": truncated,
                    "timestamp": msg.timestamp.map(|t| t.to_rfc3339()),
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "conversation_id": conversation_id,
            "offset": offset,
            "limit": limit,
            "total_messages": conv.messages.len(),
            "messages": entries,
            "has_more": offset + limit < conv.messages.len(),
        }))
    }

    fn get_full_message(&self, args: &Value) -> String {
        let Some(conversation_id) = arg_str(args, "conversation_id") else {
            return err_response("conversation_id is required");
        };
        let Some(conv) = self.conversation(conversation_id) else {
            return err_response(format!("Conversation {conversation_id} not found"));
        };
        let Some(index) = args.get("message_index").and_then(Value::as_u64) else {
            return err_response("message_index is required");
        };
        let index = index as usize;
        let Some(msg) = conv.messages.get(index) else {
            return err_response(format!("Message index {index} out of range"));
        };

        pretty(&serde_json::json!({
            "conversation_id": conversation_id,
            "message_index": index,
            "role": msg.role.as_str(),
            "content": msg.content,
            "timestamp": msg.timestamp.map(|t| t.to_rfc3339()),
            "tool_name": msg.tool_name,
        }))
    }

    fn search_messages(&self, args: &Value) -> String {
        let Some(query) = arg_str(args, "query") else {
            return err_response("query is required");
        };
        let role_filter = arg_str(args, "role").unwrap_or("any");
        let conversation_filter = arg_str(args, "conversation_id");
        let limit = arg_usize(args, "limit", 50);

        let needle: Vec<char> = query.chars().collect();
        let mut results: Vec<Value> = Vec::new();

        'outer: for conv in &self.conversations {
            if let Some(filter) = conversation_filter {
                if conv.session_id != filter {
                    continue;
                }
            }
            for (index, msg) in conv.messages.iter().enumerate() {
                if role_filter != "any" && msg.role.as_str() != role_filter {
                    continue;
                }
                let haystack: Vec<char> = msg.content.chars().collect();
                let Some(pos) = find_ci(&haystack, &needle) else {
                    continue;
                };

                let start = pos.saturating_sub(SNIPPET_CONTEXT_CHARS);
                let end = (pos + needle.len() + SNIPPET_CONTEXT_CHARS).min(haystack.len());
                let mut snippet: String = haystack[start..end].iter().collect();
                if start > 0 {
                    snippet = format!("...{snippet}");
                }
                if end < haystack.len() {
                    snippet.push_str("...");
                }

                results.push(serde_json::json!({
                    "conversation_id": conv.session_id,
                    "message_index": index,
                    "role": msg.role.as_str(),
                    "snippet": snippet,
                    "match_count": count_ci(&haystack, &needle),
                }));
                if results.len() >= limit {
                    break 'outer;
                }
            }
        }

        let truncated = results.len() >= limit;
        pretty(&serde_json::json!({
            "query": query,
            "role_filter": role_filter,
            "total_matches": results.len(),
            "results": results,
            "truncated": truncated,
        }))
    }

    fn report_issue(&self, args: &Value) -> String {
        let Some(kind) = arg_str(args, "type") else {
            return err_response("type is required");
        };
        let Some(severity) = arg_str(args, "severity") else {
            return err_response("severity is required");
        };
        let Some(title) = arg_str(args, "title") else {
            return err_response("title is required");
        };
        let Some(description) = arg_str(args, "description") else {
            return err_response("description is required");
        };

        let mut issue = Issue::new(
            IssueKind::parse(kind),
            Severity::parse(severity),
            title.to_string(),
            description.to_string(),
        );
        issue.confidence = 0.8;
        issue.suggested_resolution = arg_str(args, "suggested_resolution")
            .unwrap_or_default()
            .to_string();
        issue.local_change = arg_bool(args, "local_change", false);

        if let Some(entries) = args.get("evidence").and_then(Value::as_array) {
            for entry in entries {
                let session_id = entry
                    .get("session_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                // Evidence must point into the batch; entries citing
                // sessions the agent never saw are dropped.
                let Some(conv) = self.conversation(&session_id) else {
                    continue;
                };
                let mut working_directory = entry
                    .get("working_directory")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if working_directory.is_empty() {
                    working_directory = conv.working_directory().unwrap_or_default().to_string();
                }
                issue.evidence.push(Evidence {
                    session_id,
                    message_index: entry
                        .get("message_index")
                        .and_then(Value::as_u64)
                        .map(|v| v as usize),
                    quote: entry
                        .get("quote")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    context: entry
                        .get("context")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    working_directory,
                });
            }
        }

        let issue_id = issue.id.clone();
        let mut reported = self.reported.lock();
        reported.push(issue);

        serde_json::json!({
            "success": true,
            "issue_id": issue_id,
            "message": format!("Issue reported: {title}"),
            "total_issues_reported": reported.len(),
        })
        .to_string()
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for DetectionTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "scan_recent_human_messages",
                "Scan the most recent human messages across all conversations, grouped by \
                 project. The fastest way to discover what users have been asking for.",
                serde_json::json!({
                    "working_directory": {
                        "type": "string",
                        "description": "Optional: limit the scan to one project",
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum messages to return (default: 100)",
                        "default": 100,
                    },
                }),
                &[],
            ),
            ToolDefinition::new(
                "list_conversations",
                "List all available conversations with metadata (id, dates, message counts). \
                 Use pagination for large sets.",
                serde_json::json!({
                    "limit": {
                        "type": "integer",
                        "description": "Maximum conversations to return (default: 50)",
                        "default": 50,
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Offset for pagination (default: 0)",
                        "default": 0,
                    },
                }),
                &[],
            ),
            ToolDefinition::new(
                "get_messages",
                "Get messages from a conversation with pagination. Messages over 500 chars \
                 are truncated.",
                serde_json::json!({
                    "conversation_id": {"type": "string", "description": "ID of the conversation"},
                    "offset": {
                        "type": "integer",
                        "description": "Start from this message index (default: 0)",
                        "default": 0,
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum messages to return (default: 50)",
                        "default": 50,
                    },
                }),
                &["conversation_id"],
            ),
            ToolDefinition::new(
                "get_full_message",
                "Get the full, untruncated content of a specific message.",
                serde_json::json!({
                    "conversation_id": {"type": "string", "description": "ID of the conversation"},
                    "message_index": {
                        "type": "integer",
                        "description": "Index of the message to retrieve",
                    },
                }),
                &["conversation_id", "message_index"],
            ),
            ToolDefinition::new(
                "search_messages",
                "Search for text across conversations. Returns matching messages with \
                 context snippets.",
                serde_json::json!({
                    "query": {"type": "string", "description": "Text to search for (case-insensitive)"},
                    "role": {
                        "type": "string",
                        "enum": ["human", "assistant", "any"],
                        "description": "Filter by message role (default: any)",
                        "default": "any",
                    },
                    "conversation_id": {
                        "type": "string",
                        "description": "Optional: limit search to one conversation",
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results to return (default: 50)",
                        "default": 50,
                    },
                }),
                &["query"],
            ),
            ToolDefinition::new(
                "report_issue",
                "Report an issue found in conversations. Include evidence with session_id \
                 and message_index; working_directory is filled in from the conversation \
                 when omitted.",
                serde_json::json!({
                    "type": {
                        "type": "string",
                        "enum": ["repeated_request", "frustration_signal", "style_mismatch",
                                 "capability_gap", "knowledge_gap", "other"],
                        "description": "Type of issue",
                    },
                    "severity": {
                        "type": "string",
                        "enum": ["low", "medium", "high", "critical"],
                        "description": "Severity level",
                    },
                    "title": {"type": "string", "description": "Short title for the issue"},
                    "description": {"type": "string", "description": "Detailed description"},
                    "evidence": {
                        "type": "array",
                        "description": "Evidence entries from conversations",
                        "items": {
                            "type": "object",
                            "properties": {
                                "session_id": {"type": "string"},
                                "message_index": {"type": "integer"},
                                "quote": {"type": "string"},
                                "context": {"type": "string"},
                                "working_directory": {"type": "string"},
                            },
                        },
                    },
                    "suggested_resolution": {
                        "type": "string",
                        "description": "Optional suggestion for how to resolve this issue",
                    },
                    "local_change": {
                        "type": "boolean",
                        "description": "True when the issue belongs to one project rather \
                                        than the user globally (default: false)",
                        "default": false,
                    },
                }),
                &["type", "severity", "title", "description"],
            ),
        ]
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Option<String> {
        let result = match name {
            "scan_recent_human_messages" => self.scan_recent_human_messages(args),
            "list_conversations" => self.list_conversations(args),
            "get_messages" => self.get_messages(args),
            "get_full_message" => self.get_full_message(args),
            "search_messages" => self.search_messages(args),
            "report_issue" => self.report_issue(args),
            _ => return None,
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rv_connectors::types::ConversationMessage;
    use serde_json::Map;

    fn conversation(session_id: &str, wd: &str, contents: &[(&str, MessageRole)]) -> Conversation {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let messages = contents
            .iter()
            .enumerate()
            .map(|(i, (content, role))| ConversationMessage {
                role: *role,
                content: content.to_string(),
                timestamp: Some(base + chrono::Duration::minutes(i as i64)),
                metadata: Map::new(),
                tool_name: None,
                tool_input: None,
                tool_result: None,
            })
            .collect();
        let mut metadata = Map::new();
        metadata.insert("working_directory".into(), Value::String(wd.into()));
        Conversation {
            session_id: session_id.into(),
            messages,
            started_at: base,
            ended_at: base + chrono::Duration::minutes(contents.len() as i64),
            source_type: "test".into(),
            metadata,
        }
    }

    fn tools() -> DetectionTools {
        DetectionTools::new(vec![
            conversation(
                "sess-a",
                "/Users/dev/app",
                &[
                    ("please always run tests before committing", MessageRole::Human),
                    ("will do", MessageRole::Assistant),
                ],
            ),
            conversation(
                "sess-b",
                "/Users/dev/app",
                &[
                    ("you forgot to run tests before committing again", MessageRole::Human),
                    ("sorry, rerunning now", MessageRole::Assistant),
                ],
            ),
        ])
    }

    fn parse(result: &str) -> Value {
        serde_json::from_str(result).unwrap()
    }

    #[tokio::test]
    async fn scan_groups_by_project_and_truncates() {
        let t = tools();
        let result = parse(
            &t.dispatch("scan_recent_human_messages", &serde_json::json!({}))
                .await
                .unwrap(),
        );
        let entries = result["projects"]["/Users/dev/app"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(result["total_human_messages"], 2);
        assert!(result["hint"].as_str().unwrap().contains("search_messages"));
    }

    #[tokio::test]
    async fn get_messages_boundary_returns_exactly_one() {
        let t = tools();
        let result = parse(
            &t.dispatch(
                "get_messages",
                &serde_json::json!({"conversation_id": "sess-a", "offset": 1, "limit": 1}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(result["messages"].as_array().unwrap().len(), 1);
        assert_eq!(result["messages"][0]["index"], 1);
        assert_eq!(result["has_more"], false);
    }

    #[tokio::test]
    async fn get_messages_truncates_long_content() {
        let long = "x".repeat(600);
        let t = DetectionTools::new(vec![conversation(
            "sess-long",
            "/p",
            &[(long.as_str(), MessageRole::Human)],
        )]);
        let result = parse(
            &t.dispatch(
                "get_messages",
                &serde_json::json!({"conversation_id": "sess-long"}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(result["messages"][0]["truncated"], true);
        assert_eq!(
            result["messages"][0]["content"].as_str().unwrap().len(),
            500
        );

        let full = parse(
            &t.dispatch(
                "get_full_message",
                &serde_json::json!({"conversation_id": "sess-long", "message_index": 0}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(full["content"].as_str().unwrap().len(), 600);
    }

    #[tokio::test]
    async fn search_finds_case_insensitive_matches_with_snippets() {
        let t = tools();
        let result = parse(
            &t.dispatch(
                "search_messages",
                &serde_json::json!({"query": "RUN TESTS", "role": "human"}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(result["total_matches"], 2);
        let snippet = result["results"][0]["snippet"].as_str().unwrap();
        assert!(snippet.to_lowercase().contains("run tests"));
    }

    #[tokio::test]
    async fn search_respects_limit_and_unknown_conversation() {
        let t = tools();
        let limited = parse(
            &t.dispatch(
                "search_messages",
                &serde_json::json!({"query": "tests", "limit": 1}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(limited["total_matches"], 1);
        assert_eq!(limited["truncated"], true);

        let none = parse(
            &t.dispatch(
                "search_messages",
                &serde_json::json!({"query": "tests", "conversation_id": "missing"}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(none["total_matches"], 0);
    }

    #[tokio::test]
    async fn report_issue_autofills_working_directory() {
        let t = tools();
        let result = parse(
            &t.dispatch(
                "report_issue",
                &serde_json::json!({
                    "type": "repeated_request",
                    "severity": "high",
                    "title": "Repeated test-run request",
                    "description": "User asks for tests before commit in multiple sessions",
                    "evidence": [
                        {"session_id": "sess-a", "message_index": 0, "quote": "always run tests"},
                        {"session_id": "sess-b", "message_index": 0, "quote": "run tests again"},
                    ],
                }),
            )
            .await
            .unwrap(),
        );
        assert_eq!(result["success"], true);
        assert_eq!(result["total_issues_reported"], 1);

        let issues = t.reported_issues();
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.kind, IssueKind::RepeatedRequest);
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.confidence, 0.8);
        assert!(!issue.local_change);
        assert_eq!(issue.evidence[0].working_directory, "/Users/dev/app");
        assert_eq!(issue.evidence[1].working_directory, "/Users/dev/app");
    }

    #[tokio::test]
    async fn unknown_kind_and_severity_fold_to_defaults() {
        let t = tools();
        t.dispatch(
            "report_issue",
            &serde_json::json!({
                "type": "bizarre",
                "severity": "catastrophic",
                "title": "t",
                "description": "d",
            }),
        )
        .await
        .unwrap();
        let issue = &t.reported_issues()[0];
        assert_eq!(issue.kind, IssueKind::Other);
        assert_eq!(issue.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn unknown_tool_returns_none() {
        let t = tools();
        assert!(t.dispatch("not_a_tool", &serde_json::json!({})).await.is_none());
    }
}
