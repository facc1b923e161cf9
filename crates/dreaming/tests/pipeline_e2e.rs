//! Full-cycle tests driving the three-stage pipeline against a
//! scripted backend and a temporary runtime directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use rv_domain::config::Config;
use rv_domain::error::{Error, Result};
use rv_domain::llm::{AgentMessage, AgentRunConfig, ChatRole, TokenUsage, ToolCall, ToolDefinition};
use rv_dreaming::DreamingOrchestrator;
use rv_providers::{ChatBackend, ChatTurn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plays a fixed role per stage, recognized by the system prompt. The
/// issue id is read back out of each stage's initial prompt, the same
/// place a real model would see it.
struct ScriptedBackend {
    report_issues: bool,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self { report_issues: true }
    }

    fn silent() -> Self {
        Self { report_issues: false }
    }
}

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 1000,
        output_tokens: 100,
        cache_read_tokens: 200,
        cache_write_tokens: 50,
    }
}

fn tool_turn(calls: Vec<(&str, serde_json::Value)>) -> ChatTurn {
    ChatTurn {
        message: AgentMessage {
            role: ChatRole::Assistant,
            content: None,
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, input))| ToolCall {
                    id: format!("call_{i}"),
                    name: name.to_string(),
                    input,
                })
                .collect(),
            tool_result: None,
        },
        usage: usage(),
        stop_reason: Some("tool_use".into()),
    }
}

fn end_turn(text: &str) -> ChatTurn {
    ChatTurn {
        message: AgentMessage::assistant(text),
        usage: usage(),
        stop_reason: Some("end_turn".into()),
    }
}

/// The stage initial prompts list issues as `- <short_id>[: or space]`.
fn issue_id_from_prompt(messages: &[AgentMessage]) -> String {
    let first_user = messages
        .iter()
        .find(|m| m.role == ChatRole::User)
        .and_then(|m| m.content.as_deref())
        .unwrap_or_default();
    first_user
        .lines()
        .find_map(|line| line.strip_prefix("- "))
        .map(|rest| {
            rest.chars()
                .take_while(|c| *c != ':' && *c != ' ')
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn assistant_turns(messages: &[AgentMessage]) -> usize {
    messages.iter().filter(|m| m.role == ChatRole::Assistant).count()
}

#[async_trait::async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(
        &self,
        messages: &[AgentMessage],
        config: &AgentRunConfig,
        _tools: &[ToolDefinition],
    ) -> Result<ChatTurn> {
        let turn = assistant_turns(messages);

        if config.system_prompt.contains("analyzing AI assistant conversations") {
            // Detection agent.
            if turn == 0 && self.report_issues {
                return Ok(tool_turn(vec![(
                    "report_issue",
                    serde_json::json!({
                        "type": "repeated_request",
                        "severity": "high",
                        "title": "Repeated request to run tests before committing",
                        "description": "The user says 'always run tests before committing' \
                                        in multiple sessions.",
                        "evidence": [
                            {"session_id": "sess-a", "message_index": 0,
                             "quote": "always run tests before committing"},
                            {"session_id": "sess-b", "message_index": 0,
                             "quote": "always run tests before committing"},
                        ],
                        "suggested_resolution": "Create a skill that runs tests before commits",
                        "local_change": false,
                    }),
                )]));
            }
            return Ok(end_turn("Found a recurring cross-session request."));
        }

        if config.system_prompt.contains("FILTERING and COMPARISON") {
            // Comparison agent.
            let issue_id = issue_id_from_prompt(messages);
            if turn == 0 {
                return Ok(tool_turn(vec![
                    (
                        "mark_issue_status",
                        serde_json::json!({"issue_id": issue_id, "status": "new"}),
                    ),
                    (
                        "include_issue",
                        serde_json::json!({
                            "issue_id": issue_id,
                            "rationale": "Cross-conversation pattern",
                        }),
                    ),
                ]));
            }
            return Ok(end_turn("1 included, 0 excluded."));
        }

        if config.system_prompt.contains("You create resolutions") {
            // Resolution agent.
            let issue_id = issue_id_from_prompt(messages);
            if turn == 0 {
                return Ok(tool_turn(vec![(
                    "create_resolution_action",
                    serde_json::json!({
                        "artifact_type": "skills",
                        "name": "run-tests-before-commit",
                        "content": {
                            "name": "Run Tests Before Commit",
                            "description": "Always run the project test suite before committing",
                            "instructions": "1. Run the full test suite\n2. Fix any failures\n3. Only then commit",
                            "when_to_use": "Before every commit",
                        },
                        "issue_refs": [issue_id],
                        "rationale": "The user repeatedly asks for tests before commits",
                        "priority": "high",
                    }),
                )]));
            }
            if turn == 1 {
                return Ok(tool_turn(vec![("finalize_resolution", serde_json::json!({}))]));
            }
            return Ok(end_turn("Resolution finalized."));
        }

        Ok(end_turn("nothing to do"))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "test-model"
    }
}

/// Backend whose credentials have expired.
struct ExpiredTokenBackend;

#[async_trait::async_trait]
impl ChatBackend for ExpiredTokenBackend {
    async fn complete(
        &self,
        _messages: &[AgentMessage],
        _config: &AgentRunConfig,
        _tools: &[ToolDefinition],
    ) -> Result<ChatTurn> {
        Err(Error::Auth {
            message: "AWS SSO token has expired".into(),
            hint: "Run 'aws sso login' to refresh your credentials".into(),
        })
    }

    fn provider_id(&self) -> &str {
        "expired"
    }

    fn default_model(&self) -> &str {
        "test-model"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Fixture {
    runtime: tempfile::TempDir,
    projects: tempfile::TempDir,
    skills_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let runtime = tempfile::tempdir().unwrap();
        let projects = tempfile::tempdir().unwrap();
        let skills_dir = runtime.path().join("generated-skills");

        let connectors_dir = runtime.path().join("connectors");
        std::fs::create_dir_all(&connectors_dir).unwrap();
        std::fs::write(
            connectors_dir.join("claude-code.md"),
            format!(
                "# Claude Code\n\n## Settings\n- enabled: true\n- path: {}\n- format: jsonl\n",
                projects.path().display()
            ),
        )
        .unwrap();

        let artifacts_dir = runtime.path().join("artifacts");
        std::fs::create_dir_all(&artifacts_dir).unwrap();
        std::fs::write(
            artifacts_dir.join("skills.md"),
            format!(
                "# Skills\n\n## Description\nReusable procedural instructions.\n\n\
                 ## Settings\n- enabled: true\n- output_path: {}\n- scope: global\n\n\
                 ## For Resolution Agent\nCreate a skill for procedural, repeatable requests.\n",
                skills_dir.display()
            ),
        )
        .unwrap();

        Self {
            runtime,
            projects,
            skills_dir,
        }
    }

    fn write_session(&self, project: &str, session: &str, human_lines: &[&str]) {
        let project_dir = self.projects.path().join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        let now = Utc::now();
        let mut lines = Vec::new();
        for (i, text) in human_lines.iter().enumerate() {
            let ts = now - chrono::Duration::minutes((human_lines.len() - i) as i64);
            lines.push(format!(
                r#"{{"role": "user", "content": "{text}", "timestamp": "{}"}}"#,
                ts.to_rfc3339()
            ));
            lines.push(format!(
                r#"{{"role": "assistant", "content": "understood", "timestamp": "{}"}}"#,
                (ts + chrono::Duration::seconds(30)).to_rfc3339()
            ));
        }
        std::fs::write(project_dir.join(format!("{session}.jsonl")), lines.join("\n")).unwrap();
    }

    fn seed_repeated_request(&self) {
        self.write_session(
            "-Users-dev-myapp",
            "sess-a",
            &["please always run tests before committing"],
        );
        self.write_session(
            "-Users-dev-myapp",
            "sess-b",
            &["remember: always run tests before committing your changes"],
        );
    }

    fn orchestrator(&self, backend: Arc<dyn ChatBackend>, dry_run: bool) -> DreamingOrchestrator {
        let mut orchestrator =
            DreamingOrchestrator::new(self.runtime.path(), Config::default(), dry_run);
        orchestrator.set_backend(backend);
        orchestrator
    }

    fn state_path(&self) -> PathBuf {
        self.runtime.path().join("state.json")
    }

    fn resolution_files(&self) -> Vec<PathBuf> {
        list_json(&self.runtime.path().join("resolutions"))
    }

    fn dry_run_files(&self) -> Vec<PathBuf> {
        list_json(&self.runtime.path().join("dry-runs"))
    }
}

fn list_json(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_input_completes_without_writing_anything() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(Arc::new(ScriptedBackend::new()), false);

    let result = orchestrator.run().await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.no_new_conversations);
    assert_eq!(result.conversations_analyzed, 0);
    assert_eq!(result.issues_found, 0);
    assert_eq!(result.resolutions_generated, 0);
    assert!(result.duration_seconds >= 0.0);
    assert!(fixture.resolution_files().is_empty());
    assert!(!fixture.state_path().exists());
}

#[tokio::test]
async fn cross_session_repetition_produces_a_skill() {
    let fixture = Fixture::new();
    fixture.seed_repeated_request();
    let orchestrator = fixture.orchestrator(Arc::new(ScriptedBackend::new()), false);

    let result = orchestrator.run().await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(!result.no_new_conversations);
    assert_eq!(result.conversations_analyzed, 2);
    assert_eq!(result.issues_found, 1);
    assert_eq!(result.resolutions_generated, 1);
    assert_eq!(result.resolution_files.len(), 1);
    assert!(result.statistics.total_tokens() > 0);
    assert!(result.statistics.cost_usd() > 0.0);

    // The skill artifact landed at the conventional path.
    let skill_path = fixture
        .skills_dir
        .join("run-tests-before-commit")
        .join("SKILL.md");
    assert!(skill_path.exists(), "missing {}", skill_path.display());
    let body = std::fs::read_to_string(&skill_path).unwrap();
    assert!(body.contains("name: Run Tests Before Commit"));
    assert!(body.contains("## Instructions"));

    // The resolution record persisted with the filename convention.
    let files = fixture.resolution_files();
    assert_eq!(files.len(), 1);
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
    let id = record["metadata"]["id"].as_str().unwrap();
    let short: String = id.chars().take(8).collect();
    assert!(files[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with(&format!("-{short}.json")));
    let action = &record["resolutions"][0]["actions"][0];
    assert_eq!(action["type"], "skills");
    assert_eq!(action["operation"], "create");
    assert_eq!(action["local_change"], false);
    // Conversation references were harvested from both sessions.
    assert_eq!(action["references"].as_array().unwrap().len(), 2);

    // State advanced: connector progress plus cycle totals.
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixture.state_path()).unwrap()).unwrap();
    assert_eq!(state["connectors"]["claude-code"]["conversations_processed"], 2);
    assert!(state["connectors"]["claude-code"]["last_processed"].is_string());
    assert_eq!(state["dreaming"]["total_runs"], 1);
    assert_eq!(state["dreaming"]["issues_found_total"], 1);
    assert_eq!(state["dreaming"]["resolutions_generated_total"], 1);
}

#[tokio::test]
async fn dry_run_leaves_state_and_artifacts_untouched() {
    let fixture = Fixture::new();
    fixture.seed_repeated_request();
    let orchestrator = fixture.orchestrator(Arc::new(ScriptedBackend::new()), true);

    let result = orchestrator.run().await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.resolutions_generated, 1);

    // The record went to dry-runs/, nothing else changed.
    assert_eq!(fixture.dry_run_files().len(), 1);
    assert!(fixture.resolution_files().is_empty());
    assert!(!fixture.state_path().exists());
    assert!(!fixture.skills_dir.exists());
}

#[tokio::test]
async fn expired_credentials_fail_the_cycle_with_a_hint() {
    let fixture = Fixture::new();
    fixture.seed_repeated_request();
    let orchestrator = fixture.orchestrator(Arc::new(ExpiredTokenBackend), false);

    let result = orchestrator.run().await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("expired"), "error was: {error}");
    assert!(error.contains("aws sso login"), "error was: {error}");
    assert!(result.duration_seconds >= 0.0);
    // No state update on a failed cycle.
    assert!(!fixture.state_path().exists());
    assert!(fixture.resolution_files().is_empty());
}

#[tokio::test]
async fn no_issues_still_advances_connector_state() {
    let fixture = Fixture::new();
    fixture.seed_repeated_request();
    let orchestrator = fixture.orchestrator(Arc::new(ScriptedBackend::silent()), false);

    let result = orchestrator.run().await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.conversations_analyzed, 2);
    assert_eq!(result.issues_found, 0);
    assert_eq!(result.resolutions_generated, 0);
    assert!(fixture.resolution_files().is_empty());

    // Conversations were processed, so the connector window moved.
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixture.state_path()).unwrap()).unwrap();
    assert_eq!(state["connectors"]["claude-code"]["conversations_processed"], 2);
    assert_eq!(state["dreaming"]["total_runs"], 1);
    assert_eq!(state["dreaming"]["issues_found_total"], 0);
}

#[tokio::test]
async fn events_trace_every_stage() {
    let fixture = Fixture::new();
    fixture.seed_repeated_request();
    let orchestrator = fixture.orchestrator(Arc::new(ScriptedBackend::new()), false);
    let events = orchestrator.events();

    let result = orchestrator.run().await;
    assert!(result.success, "error: {:?}", result.error);

    let all = events.get_all();
    let agent_ids: Vec<&str> = all.iter().map(|e| e.agent_id.as_str()).collect();
    assert!(agent_ids.contains(&"orchestrator"));
    assert!(agent_ids.iter().any(|id| id.starts_with("detect-")));
    assert!(agent_ids.contains(&"compare-claude-code"));
    assert!(agent_ids.contains(&"resolve-claude-code"));

    // Tool calls and results pair up in program order per agent.
    let detect_events: Vec<_> = all
        .iter()
        .filter(|e| e.agent_id.starts_with("detect-"))
        .collect();
    let calls = detect_events
        .iter()
        .filter(|e| e.event_kind == rv_dreaming::EventKind::ToolCall)
        .count();
    let results = detect_events
        .iter()
        .filter(|e| e.event_kind == rv_dreaming::EventKind::ToolResult)
        .count();
    assert_eq!(calls, results);
    assert!(calls >= 1);

    // Once the cycle is done, nothing is still active.
    assert!(events.get_active_agents().is_empty());
}
