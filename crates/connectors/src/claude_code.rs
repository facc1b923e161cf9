//! Claude Code session-log connector.
//!
//! Reads `<projects>/<project>/<session>.jsonl` where each line is an
//! independently decodable record. Parsing is forgiving at the line
//! level (blank and malformed lines are skipped) and strict at the file
//! level only in that a session with zero decoded messages is dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use rv_domain::error::{Error, Result};

use crate::types::{
    Conversation, ConversationBatch, ConversationMessage, ConnectorSettings, MessageRole,
};
use crate::SourceConnector;

/// Epoch values above this are milliseconds, below are seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

pub struct ClaudeCodeConnector {
    settings: ConnectorSettings,
    last_processed_file: PathBuf,
}

impl ClaudeCodeConnector {
    pub fn new(runtime_dir: &Path) -> Self {
        Self::with_settings(runtime_dir, ConnectorSettings::default())
    }

    pub fn with_settings(runtime_dir: &Path, settings: ConnectorSettings) -> Self {
        Self {
            settings,
            last_processed_file: runtime_dir.join("state").join("claude_code_cursor.json"),
        }
    }

    fn projects_dir(&self) -> PathBuf {
        if !self.settings.path.is_empty() {
            return expand_home(&self.settings.path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join("projects")
    }

    fn parse_session_file(&self, path: &Path) -> Option<Conversation> {
        let raw = std::fs::read_to_string(path).ok()?;

        let mut messages: Vec<ConversationMessage> = Vec::new();
        let mut started_at: Option<DateTime<Utc>> = None;
        let mut ended_at: Option<DateTime<Utc>> = None;

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let Some(obj) = record.as_object() else {
                continue;
            };
            if let Some(msg) = parse_message(obj) {
                if let Some(ts) = msg.timestamp {
                    started_at = Some(started_at.map_or(ts, |s| s.min(ts)));
                    ended_at = Some(ended_at.map_or(ts, |e| e.max(ts)));
                }
                messages.push(msg);
            }
        }

        if messages.is_empty() {
            return None;
        }

        let mtime = file_mtime(path)?;
        let started_at = started_at.unwrap_or(mtime);
        let ended_at = ended_at.unwrap_or(mtime);

        // The project directory name encodes the working directory with
        // path separators substituted to dashes.
        let project_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let working_directory = project_dir.replace('-', "/");

        let mut metadata = Map::new();
        metadata.insert("file_path".into(), Value::String(path.display().to_string()));
        metadata.insert("working_directory".into(), Value::String(working_directory));
        metadata.insert("project_dir".into(), Value::String(project_dir));

        Some(Conversation {
            session_id: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            messages,
            started_at,
            ended_at,
            source_type: "claude_code".into(),
            metadata,
        })
    }
}

#[async_trait]
impl SourceConnector for ClaudeCodeConnector {
    fn connector_id(&self) -> &str {
        "claude-code"
    }

    fn connector_name(&self) -> &str {
        "Claude Code"
    }

    async fn extract_conversations(
        &self,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ConversationBatch> {
        let projects_dir = self.projects_dir();
        if !projects_dir.exists() {
            return Ok(ConversationBatch::default());
        }

        let mut session_files: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
        for project in std::fs::read_dir(&projects_dir)? {
            let project = project?;
            if !project.path().is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(project.path())? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Some(mtime) = file_mtime(&path) else {
                    continue;
                };
                if let Some(since) = since {
                    if mtime < since {
                        continue;
                    }
                }
                session_files.push((path, mtime));
            }
        }

        // Newest first.
        session_files.sort_by(|a, b| b.1.cmp(&a.1));

        // A cursor marks where the previous batch ended; results begin
        // strictly after it. Unknown cursors are ignored.
        if let Some(cursor) = cursor {
            if let Some(idx) = session_files.iter().position(|(p, _)| p == Path::new(cursor)) {
                session_files.drain(..=idx);
            }
        }

        let mut has_more = false;
        if let Some(limit) = limit {
            if session_files.len() > limit {
                session_files.truncate(limit);
                has_more = true;
            }
        }

        let mut conversations = Vec::new();
        for (path, _) in &session_files {
            if let Some(conv) = self.parse_session_file(path) {
                conversations.push(conv);
            } else {
                tracing::debug!(path = %path.display(), "dropped unparseable session file");
            }
        }

        let next_cursor = if has_more {
            session_files.last().map(|(p, _)| p.display().to_string())
        } else {
            None
        };

        Ok(ConversationBatch {
            conversations,
            cursor: next_cursor,
            has_more,
        })
    }

    async fn last_processed(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.last_processed_file.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.last_processed_file)?;
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        Ok(value
            .get("last_processed")
            .and_then(Value::as_str)
            .and_then(parse_iso_timestamp))
    }

    async fn set_last_processed(&self, timestamp: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.last_processed_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = serde_json::json!({ "last_processed": timestamp.to_rfc3339() });
        std::fs::write(&self.last_processed_file, serde_json::to_string(&doc)?)
            .map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_role(role: &str) -> MessageRole {
    match role.to_ascii_lowercase().as_str() {
        "user" | "human" => MessageRole::Human,
        "assistant" => MessageRole::Assistant,
        "tool_use" => MessageRole::ToolCall,
        "tool_result" => MessageRole::ToolResult,
        _ => MessageRole::Human,
    }
}

/// Parse a timestamp from an epoch number (seconds or milliseconds,
/// split at 10^12) or an ISO 8601 string (`Z` accepted).
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            let secs = if raw > EPOCH_MILLIS_THRESHOLD {
                raw / 1000.0
            } else {
                raw
            };
            Utc.timestamp_opt(secs as i64, ((secs.fract()) * 1e9) as u32)
                .single()
        }
        Value::String(s) => parse_iso_timestamp(s),
        _ => None,
    }
}

fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Offset-less timestamps are interpreted as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Recursively flatten structured content into plain text.
///
/// Text blocks yield their text; tool_result blocks recurse into their
/// content; tool_use blocks summarize as `[Tool call: <name>]`.
pub(crate) fn extract_text_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(extract_text_content)
                .filter(|p| !p.is_empty())
                .collect();
            parts.join("\n")
        }
        Value::Object(obj) => {
            match obj.get("type").and_then(Value::as_str) {
                Some("text") => {
                    return obj
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                }
                Some("tool_result") => {
                    return extract_text_content(obj.get("content").unwrap_or(&Value::Null));
                }
                Some("tool_use") => {
                    let name = obj.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    return format!("[Tool call: {name}]");
                }
                _ => {}
            }
            if let Some(content) = obj.get("content") {
                return extract_text_content(content);
            }
            if let Some(text) = obj.get("text").and_then(Value::as_str) {
                return text.to_string();
            }
            String::new()
        }
        _ => String::new(),
    }
}

fn parse_message(record: &Map<String, Value>) -> Option<ConversationMessage> {
    let role_str = record
        .get("role")
        .and_then(Value::as_str)
        .or_else(|| record.get("type").and_then(Value::as_str))?;
    if role_str.is_empty() {
        return None;
    }
    let role = parse_role(role_str);

    let content = if let Some(content) = record.get("content") {
        extract_text_content(content)
    } else if let Some(message) = record.get("message") {
        extract_text_content(message)
    } else {
        String::new()
    };

    let timestamp = record
        .get("timestamp")
        .or_else(|| record.get("ts"))
        .and_then(parse_timestamp);

    let mut tool_name = None;
    let mut tool_input = None;
    let mut tool_result = None;

    match role {
        MessageRole::ToolCall => {
            tool_name = record
                .get("name")
                .or_else(|| record.get("tool_name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            tool_input = record
                .get("input")
                .or_else(|| record.get("tool_input"))
                .cloned();
        }
        MessageRole::ToolResult => {
            tool_result = record
                .get("result")
                .or_else(|| record.get("output"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| (!content.is_empty()).then(|| content.clone()));
        }
        _ => {}
    }

    Some(ConversationMessage {
        role,
        content,
        timestamp,
        metadata: Map::new(),
        tool_name,
        tool_input,
        tool_result,
    })
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
