//! Stage A: per-project detection agents.
//!
//! Conversations are grouped by working directory; one agent explores
//! each group concurrently through the read-only detection toolset and
//! reports issues. Per-agent reports merge into one per connector.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;

use rv_connectors::types::Conversation;
use rv_domain::config::Config;
use rv_domain::error::Result;
use rv_domain::llm::{AgentRunConfig, TokenUsage};
use rv_providers::{AgentRuntime, ChatBackend};

use crate::events::{AgentEvent, AgentEventStream, EventKind, EventedTools};
use crate::merger::merge_analysis_reports;
use crate::prompts::PromptHandler;
use crate::report::AnalysisReport;
use crate::tools::detect::DetectionTools;

pub(crate) const NO_PROJECT: &str = "(no project)";

const DETECTION_BASE_PROMPT: &str = "\
You are analyzing AI assistant conversations to find issues and patterns.

You have tools to explore conversations - use them to navigate and search efficiently.
Report each issue you find using the report_issue tool.

Your task:
1. Start with scan_recent_human_messages to see what users have been asking
2. Explore messages systematically, looking for patterns
3. Use search to find specific issues (errors, frustration signals, repeated requests)
4. Report issues you find with evidence (session_id, message_index, quotes)
5. Be thorough but efficient - use search to find relevant sections

Issue types to look for:
- repeated_request: User asks for the same thing multiple times
- frustration_signal: User shows frustration or dissatisfaction
- style_mismatch: AI response style doesn't match user expectations
- capability_gap: AI couldn't do something the user expected
- knowledge_gap: AI lacked knowledge the user expected
- other: Any other significant issue

Local vs global:
- local_change=true means the pattern belongs to ONE project's conventions
- local_change=false means it is about the user's preferences everywhere

When reporting issues:
- Include specific evidence with session_id and message_index
- Quote relevant text to support your findings
- Suggest potential resolutions when possible
- Prioritize by severity (critical > high > medium > low)

Be concise but thorough. Don't miss patterns that span multiple conversations.";

pub struct DetectionStage {
    backend: Arc<dyn ChatBackend>,
    config: Config,
    events: Arc<AgentEventStream>,
    prompts: PromptHandler,
}

impl DetectionStage {
    pub fn new(
        runtime_dir: &Path,
        config: Config,
        backend: Arc<dyn ChatBackend>,
        events: Arc<AgentEventStream>,
    ) -> Self {
        Self {
            backend,
            config,
            events,
            prompts: PromptHandler::new(&runtime_dir.join("prompts")),
        }
    }

    /// Analyze a connector's conversations. One agent per project
    /// group, run concurrently; authentication errors abort the stage.
    pub async fn analyze(
        &self,
        connector_id: &str,
        conversations: Vec<Conversation>,
        prompt_filter: Option<&[String]>,
    ) -> Result<AnalysisReport> {
        if conversations.is_empty() {
            return Ok(AnalysisReport::empty(connector_id, "No conversations to analyze"));
        }

        let system_prompt = self.build_system_prompt(prompt_filter);
        let groups = group_by_project(conversations);

        let runs = groups.into_iter().map(|(project, group)| {
            let agent_id = format!("detect-{}", project_slug(&project));
            let system_prompt = system_prompt.clone();
            async move { self.run_group(agent_id, project, group, system_prompt).await }
        });

        let mut reports = Vec::new();
        for outcome in join_all(runs).await {
            reports.push(outcome?);
        }

        let mut merged = merge_analysis_reports(reports);
        merged.connector_id = connector_id.to_string();
        Ok(merged)
    }

    async fn run_group(
        &self,
        agent_id: String,
        project: String,
        conversations: Vec<Conversation>,
        system_prompt: String,
    ) -> Result<AnalysisReport> {
        self.events.emit(AgentEvent::now(
            agent_id.as_str(),
            "detection",
            EventKind::Thinking,
            format!(
                "Starting analysis of {} conversations in {project}",
                conversations.len()
            ),
        ));

        let conversation_count = conversations.len();
        let initial_prompt = build_initial_prompt(&project, &conversations);
        let tools = DetectionTools::new(conversations);
        let evented = EventedTools::new(&tools, agent_id.as_str(), "detection", self.events.as_ref());

        let run_config = AgentRunConfig {
            model: None,
            system_prompt,
            max_turns: self.config.dreaming.detection_max_turns,
            temperature: Some(0.7),
            max_tokens: 4096,
        };

        let runtime = AgentRuntime::new(self.backend.clone());
        let (summary, usage) = match runtime
            .run_agent(&initial_prompt, &run_config, &evented)
            .await
        {
            Ok(outcome) => {
                let issues_found = tools.reported_issues().len();
                self.events.emit(
                    AgentEvent::now(
                        agent_id.as_str(),
                        "detection",
                        EventKind::Complete,
                        format!("Found {issues_found} issues"),
                    )
                    .with_details(serde_json::json!({
                        "issues_found": issues_found,
                        "tokens": outcome.usage.total_tokens(),
                    })),
                );
                let summary = outcome
                    .final_text()
                    .map(|text| {
                        let t: String = text.trim().chars().take(200).collect();
                        t
                    })
                    .unwrap_or_else(|| "Analysis completed".into());
                (summary, outcome.usage)
            }
            // Credential problems abort the whole cycle.
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::error!(agent = %agent_id, error = %e, "detection agent failed");
                self.events.emit(AgentEvent::now(
                    agent_id.as_str(),
                    "detection",
                    EventKind::Error,
                    format!("Analysis failed: {e}"),
                ));
                (format!("Analysis failed: {e}"), TokenUsage::default())
            }
        };

        Ok(AnalysisReport {
            connector_id: String::new(),
            issues: tools.reported_issues(),
            conversations_analyzed: conversation_count,
            summary,
            created_at: chrono::Utc::now(),
            token_usage: usage,
        })
    }

    fn build_system_prompt(&self, prompt_filter: Option<&[String]>) -> String {
        let enabled: Option<Vec<String>> = match prompt_filter {
            Some(filter) => Some(filter.to_vec()),
            None => Some(self.config.enabled.prompts.clone()),
        };
        self.prompts
            .build_unified_system_prompt(DETECTION_BASE_PROMPT, enabled.as_deref())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Grouping and prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn group_by_project(
    conversations: Vec<Conversation>,
) -> BTreeMap<String, Vec<Conversation>> {
    let mut groups: BTreeMap<String, Vec<Conversation>> = BTreeMap::new();
    for conv in conversations {
        let key = conv
            .working_directory()
            .filter(|wd| !wd.is_empty())
            .unwrap_or(NO_PROJECT)
            .to_string();
        groups.entry(key).or_default().push(conv);
    }
    groups
}

fn project_slug(project: &str) -> String {
    if project == NO_PROJECT {
        return "no-project".into();
    }
    let tail = project.rsplit('/').find(|part| !part.is_empty()).unwrap_or(project);
    tail.to_lowercase().replace([' ', '_'], "-")
}

fn build_initial_prompt(project: &str, conversations: &[Conversation]) -> String {
    let total_messages: usize = conversations.iter().map(|c| c.message_count()).sum();
    let human_messages: usize = conversations.iter().map(|c| c.human_messages().count()).sum();

    let folder_note = if project == NO_PROJECT {
        "These conversations have no project folder. Issues you report here are about \
         the user's global preferences: default local_change=false."
            .to_string()
    } else {
        format!(
            "These conversations all come from the project at {project}. Patterns tied to \
             this project's conventions should default to local_change=true; only use \
             local_change=false when the pattern clearly generalizes beyond it."
        )
    };

    format!(
        "Analyze {} conversations for issues.\n\n\
         Conversation Summary:\n\
         - Total conversations: {}\n\
         - Total messages: {total_messages}\n\
         - Human messages: {human_messages}\n\n\
         {folder_note}\n\n\
         Your task:\n\
         1. Scan recent human messages to see what's available\n\
         2. Explore messages, looking for patterns (use search and pagination)\n\
         3. Report issues you find using the report_issue tool\n\
         4. Be thorough but efficient - use search to find relevant sections\n\n\
         Focus on: repeated requests, user frustration, style mismatches, capability gaps.\n\n\
         Start by scanning, then systematically analyze.",
        conversations.len(),
        conversations.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, Value};

    fn conv(session: &str, wd: Option<&str>) -> Conversation {
        let mut metadata = Map::new();
        if let Some(wd) = wd {
            metadata.insert("working_directory".into(), Value::String(wd.into()));
        }
        Conversation {
            session_id: session.into(),
            messages: Vec::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            source_type: "test".into(),
            metadata,
        }
    }

    #[test]
    fn grouping_buckets_missing_working_directory() {
        let groups = group_by_project(vec![
            conv("a", Some("/Users/dev/app")),
            conv("b", Some("/Users/dev/app")),
            conv("c", None),
            conv("d", Some("")),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["/Users/dev/app"].len(), 2);
        assert_eq!(groups[NO_PROJECT].len(), 2);
    }

    #[test]
    fn slug_uses_last_path_component() {
        assert_eq!(project_slug("/Users/dev/My App"), "my-app");
        assert_eq!(project_slug(NO_PROJECT), "no-project");
        assert_eq!(project_slug("/trailing/slash/"), "slash");
    }

    #[test]
    fn folder_annotation_steers_local_change() {
        let local = build_initial_prompt("/Users/dev/app", &[]);
        assert!(local.contains("local_change=true"));
        let global = build_initial_prompt(NO_PROJECT, &[]);
        assert!(global.contains("default local_change=false"));
    }
}
