//! Stage C toolset: resolution drafting and finalization.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use rv_artifacts::ArtifactHandler;
use rv_domain::llm::ToolDefinition;
use rv_providers::ToolDispatcher;
use rv_storage::{
    ConnectorResolution, ConversationReference, Operation, Priority, Resolution, ResolutionAction,
};

use crate::report::{EnrichedIssue, EnrichedReport};
use crate::tools::{arg_str, err_response, pretty};

/// A drafted action awaiting finalization.
#[derive(Debug, Clone)]
pub struct ActionDraft {
    pub id: String,
    pub artifact_type: String,
    pub name: String,
    pub target_path: String,
    pub operation: Operation,
    pub content: Map<String, Value>,
    pub issue_refs: Vec<String>,
    pub references: Vec<ConversationReference>,
    pub rationale: String,
    pub priority: Priority,
    pub local_change: bool,
}

/// Resolution context: the filtered issue set, the enabled artifact
/// handlers, and the draft actions. Owned by the Stage C agent.
pub struct ResolveTools {
    report: EnrichedReport,
    handlers: BTreeMap<String, Arc<dyn ArtifactHandler>>,
    runtime_dir: PathBuf,
    dry_run: bool,
    drafts: Mutex<Vec<ActionDraft>>,
    finalized: Mutex<bool>,
}

impl ResolveTools {
    pub fn new(
        report: EnrichedReport,
        handlers: BTreeMap<String, Arc<dyn ArtifactHandler>>,
        runtime_dir: PathBuf,
        dry_run: bool,
    ) -> Self {
        Self {
            report,
            handlers,
            runtime_dir,
            dry_run,
            drafts: Mutex::new(Vec::new()),
            finalized: Mutex::new(false),
        }
    }

    pub fn is_finalized(&self) -> bool {
        *self.finalized.lock()
    }

    pub fn drafts(&self) -> Vec<ActionDraft> {
        self.drafts.lock().clone()
    }

    /// The finalized resolution record, if the agent got that far.
    pub fn build_resolution(&self, run_id: &str) -> Option<Resolution> {
        if !self.is_finalized() {
            return None;
        }
        let drafts = self.drafts.lock();
        if drafts.is_empty() {
            return None;
        }

        let actions: Vec<ResolutionAction> = drafts
            .iter()
            .map(|d| ResolutionAction {
                kind: d.artifact_type.clone(),
                target: d.target_path.clone(),
                operation: d.operation,
                content: d.content.clone(),
                issue_refs: d.issue_refs.clone(),
                references: d.references.clone(),
                priority: d.priority,
                rationale: d.rationale.clone(),
                local_change: d.local_change,
            })
            .collect();

        Some(Resolution::new(
            run_id,
            vec![ConnectorResolution {
                connector_id: self.report.connector_id.clone(),
                actions,
            }],
        ))
    }

    fn issues_to_resolve_refs(&self) -> Vec<&EnrichedIssue> {
        let mut out = self.report.new_issues();
        out.extend(self.report.recurring_issues());
        out
    }

    /// Match an issue against a (possibly prefix) reference.
    fn issue_for_ref<'a>(&'a self, reference: &str) -> Option<&'a EnrichedIssue> {
        self.issues_to_resolve_refs()
            .into_iter()
            .find(|i| i.issue.id == reference || i.issue.id.starts_with(reference))
    }

    fn content_hint(&self, artifact_type: &str) -> String {
        match self.handlers.get(artifact_type) {
            Some(handler) => handler.content_schema().hint,
            None => "content must be an object with the artifact's required fields".into(),
        }
    }

    fn generate_target_path(&self, artifact_type: &str, name: &str) -> String {
        let normalized = name.to_lowercase().replace([' ', '_'], "-");
        if let Some(handler) = self.handlers.get(artifact_type) {
            let output = &handler.settings().output_path;
            if !output.is_empty() {
                return format!("{}/{}", output.trim_end_matches('/'), normalized);
            }
        }
        self.runtime_dir
            .join("artifacts")
            .join(artifact_type)
            .join(normalized)
            .display()
            .to_string()
    }

    // ── Tool handlers ──────────────────────────────────────────────

    fn get_issues_to_resolve(&self) -> String {
        let issues = self.issues_to_resolve_refs();
        let entries: Vec<Value> = issues
            .iter()
            .map(|issue| {
                let historical: Vec<Value> = issue
                    .historical_links
                    .iter()
                    .take(3)
                    .map(|link| {
                        serde_json::json!({
                            "resolution_id": link.resolution_id,
                            "artifact_path": link.artifact_path,
                            "relevance": link.relevance,
                        })
                    })
                    .collect();

                let mut seen = BTreeSet::new();
                let conversation_refs: Vec<Value> = issue
                    .issue
                    .evidence
                    .iter()
                    .filter(|e| !e.session_id.is_empty() && seen.insert(e.session_id.clone()))
                    .map(|e| {
                        serde_json::json!({
                            "session_id": e.session_id,
                            "working_directory": e.working_directory,
                        })
                    })
                    .collect();

                serde_json::json!({
                    "id": issue.issue.id,
                    "type": issue.issue.kind.as_str(),
                    "severity": issue.issue.severity.as_str(),
                    "title": issue.issue.title,
                    "description": issue.issue.description,
                    "status": issue.status.as_str(),
                    "is_recurring": issue.is_recurring,
                    "local_change": issue.issue.local_change,
                    "suggested_resolution": issue.issue.suggested_resolution,
                    "evidence_count": issue.issue.evidence.len(),
                    "conversation_refs": conversation_refs,
                    "historical_context": historical,
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "issues": entries,
            "total": entries.len(),
            "new_count": self.report.new_issues().len(),
            "recurring_count": self.report.recurring_issues().len(),
        }))
    }

    fn get_artifact_types(&self) -> String {
        let entries: Vec<Value> = self
            .handlers
            .iter()
            .map(|(id, handler)| {
                let schema = handler.content_schema();
                serde_json::json!({
                    "id": id,
                    "name": handler.artifact_name(),
                    "required_fields": schema.required_fields,
                    "optional_fields": schema.optional_fields,
                    "example": schema.example,
                    "hint": schema.hint,
                    "context": handler.agent_context(),
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "artifact_types": entries,
            "total": entries.len(),
        }))
    }

    fn create_resolution_action(&self, args: &Value) -> String {
        let Some(artifact_type) = arg_str(args, "artifact_type") else {
            return err_response("artifact_type is required");
        };
        let Some(name) = arg_str(args, "name") else {
            return err_response("name is required");
        };
        let Some(content) = args.get("content").and_then(Value::as_object) else {
            return serde_json::json!({
                "error": "content is required",
                "hint": self.content_hint(artifact_type),
            })
            .to_string();
        };
        if content.is_empty() {
            return serde_json::json!({
                "error": "content is required",
                "hint": self.content_hint(artifact_type),
            })
            .to_string();
        }
        let issue_refs: Vec<String> = args
            .get("issue_refs")
            .and_then(Value::as_array)
            .map(|refs| {
                refs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if issue_refs.is_empty() {
            return err_response("issue_refs is required (list of issue IDs)");
        }
        if self.is_finalized() {
            return err_response("Resolution already finalized, cannot add more actions");
        }
        if !self.handlers.contains_key(artifact_type) {
            return serde_json::json!({
                "error": format!("Artifact type '{artifact_type}' not enabled"),
                "enabled_types": self.handlers.keys().collect::<Vec<_>>(),
            })
            .to_string();
        }

        let operation = match arg_str(args, "operation") {
            None => Operation::Create,
            Some(op) => match Operation::parse(op) {
                Some(op) => op,
                None => return err_response(format!("Invalid operation: {op}")),
            },
        };
        let priority = arg_str(args, "priority")
            .and_then(Priority::parse)
            .unwrap_or_default();

        let target_path = arg_str(args, "target_path")
            .map(str::to_string)
            .unwrap_or_else(|| self.generate_target_path(artifact_type, name));

        // Conversation references are harvested from the evidence of
        // every referenced issue, deduplicated by session. The action
        // is local iff any referenced issue is project-scoped.
        let mut references = Vec::new();
        let mut seen = BTreeSet::new();
        let mut local_change = false;
        for reference in &issue_refs {
            if let Some(issue) = self.issue_for_ref(reference) {
                local_change |= issue.issue.local_change;
                for evidence in &issue.issue.evidence {
                    if !evidence.session_id.is_empty() && seen.insert(evidence.session_id.clone())
                    {
                        references.push(ConversationReference {
                            session_id: evidence.session_id.clone(),
                            working_directory: evidence.working_directory.clone(),
                        });
                    }
                }
            }
        }

        let draft = ActionDraft {
            id: uuid::Uuid::new_v4().to_string().chars().take(8).collect(),
            artifact_type: artifact_type.to_string(),
            name: name.to_string(),
            target_path: target_path.clone(),
            operation,
            content: content.clone(),
            issue_refs,
            references,
            rationale: arg_str(args, "rationale").unwrap_or_default().to_string(),
            priority,
            local_change,
        };
        let draft_id = draft.id.clone();

        let mut drafts = self.drafts.lock();
        drafts.push(draft);

        serde_json::json!({
            "success": true,
            "action_id": draft_id,
            "message": format!(
                "Created {} action for {artifact_type}: {name}",
                operation.as_str()
            ),
            "target_path": target_path,
            "total_actions": drafts.len(),
        })
        .to_string()
    }

    fn list_pending_actions(&self) -> String {
        let drafts = self.drafts.lock();
        let entries: Vec<Value> = drafts
            .iter()
            .map(|d| {
                let rationale: String = d.rationale.chars().take(100).collect();
                serde_json::json!({
                    "id": d.id,
                    "artifact_type": d.artifact_type,
                    "name": d.name,
                    "target_path": d.target_path,
                    "operation": d.operation.as_str(),
                    "issue_refs": d.issue_refs,
                    "references": d.references,
                    "priority": d.priority,
                    "local_change": d.local_change,
                    "rationale": rationale,
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "pending_actions": entries,
            "total": entries.len(),
            "finalized": self.is_finalized(),
        }))
    }

    fn remove_action(&self, args: &Value) -> String {
        let Some(action_id) = arg_str(args, "action_id") else {
            return err_response("action_id is required");
        };
        if self.is_finalized() {
            return err_response("Resolution already finalized");
        }

        let mut drafts = self.drafts.lock();
        let Some(index) = drafts.iter().position(|d| d.id == action_id) else {
            return err_response(format!("Action {action_id} not found"));
        };
        let removed = drafts.remove(index);

        serde_json::json!({
            "success": true,
            "message": format!("Removed action: {}", removed.name),
            "remaining_actions": drafts.len(),
        })
        .to_string()
    }

    fn validate_draft(&self, draft: &ActionDraft) -> Vec<String> {
        let mut errors = Vec::new();

        if draft.name.is_empty() {
            errors.push(format!("Action {}: name is required", draft.id));
        }
        if draft.content.is_empty() {
            errors.push(format!(
                "Action {}: content is required - {}",
                draft.id,
                self.content_hint(&draft.artifact_type)
            ));
        }
        if draft.issue_refs.is_empty() {
            errors.push(format!("Action {}: at least one issue_ref is required", draft.id));
        }
        for reference in &draft.issue_refs {
            if self.issue_for_ref(reference).is_none() {
                errors.push(format!(
                    "Action {}: issue_ref '{}' does not match any issue",
                    draft.id, reference
                ));
            }
        }
        if let Some(handler) = self.handlers.get(&draft.artifact_type) {
            for field in handler.content_schema().required_fields.keys() {
                if !draft.content.contains_key(field) {
                    errors.push(format!(
                        "Action {}: {} content missing '{}'",
                        draft.id, draft.artifact_type, field
                    ));
                }
            }
        }
        errors
    }

    /// Validate every draft and lock the resolution. Irreversible on
    /// success; validation failure leaves the draft open.
    fn finalize_resolution(&self) -> String {
        if self.is_finalized() {
            return err_response("Resolution already finalized");
        }
        let drafts = self.drafts.lock();
        if drafts.is_empty() {
            return serde_json::json!({
                "success": false,
                "message": "No actions to finalize",
            })
            .to_string();
        }

        let errors: Vec<String> = drafts.iter().flat_map(|d| self.validate_draft(d)).collect();
        if !errors.is_empty() {
            return pretty(&serde_json::json!({
                "success": false,
                "message": "Validation failed",
                "errors": errors,
            }));
        }

        *self.finalized.lock() = true;

        pretty(&serde_json::json!({
            "success": true,
            "message": format!("Resolution finalized with {} actions", drafts.len()),
            "dry_run": self.dry_run,
            "actions_summary": drafts
                .iter()
                .map(|d| serde_json::json!({
                    "type": d.artifact_type,
                    "name": d.name,
                    "operation": d.operation.as_str(),
                    "target": d.target_path,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for ResolveTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        // The content description enumerates every enabled type's
        // schema so the model sees the requirements up front.
        let mut type_hints = Vec::new();
        let mut content_properties = Map::new();
        for (id, handler) in &self.handlers {
            let schema = handler.content_schema();
            type_hints.push(format!(
                "{id}: required={:?}, optional={:?}",
                schema.required_fields.keys().collect::<Vec<_>>(),
                schema.optional_fields.keys().collect::<Vec<_>>(),
            ));
            for (field, description) in
                schema.required_fields.iter().chain(schema.optional_fields.iter())
            {
                content_properties.entry(field.clone()).or_insert_with(|| {
                    serde_json::json!({"type": "string", "description": description})
                });
            }
        }
        let enabled: Vec<&String> = self.handlers.keys().collect();

        vec![
            ToolDefinition::new(
                "get_issues_to_resolve",
                "Get new and recurring issues that need resolution, with their context and \
                 historical links.",
                serde_json::json!({}),
                &[],
            ),
            ToolDefinition::new(
                "get_artifact_types",
                "Get available artifact types and their content schemas. Use this before \
                 creating actions.",
                serde_json::json!({}),
                &[],
            ),
            ToolDefinition::new(
                "create_resolution_action",
                format!(
                    "Create a resolution action for an artifact.\n\n\
                     The 'content' parameter is REQUIRED and type-specific:\n{}\n\n\
                     Available artifact types: {:?}",
                    type_hints.join("\n"),
                    enabled,
                ),
                serde_json::json!({
                    "artifact_type": {
                        "type": "string",
                        "description": format!("Type of artifact. Available: {enabled:?}"),
                    },
                    "name": {"type": "string", "description": "Name/identifier of the artifact"},
                    "content": {
                        "type": "object",
                        "description": "REQUIRED object with artifact-specific fields",
                        "properties": content_properties,
                    },
                    "issue_refs": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "REQUIRED: issue IDs this action addresses",
                    },
                    "target_path": {
                        "type": "string",
                        "description": "Optional: specific path (auto-generated when omitted)",
                    },
                    "operation": {
                        "type": "string",
                        "enum": ["create", "update", "append"],
                        "description": "Operation type (default: create)",
                        "default": "create",
                    },
                    "rationale": {
                        "type": "string",
                        "description": "Why this resolution helps address the issue",
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "Priority level (default: medium)",
                        "default": "medium",
                    },
                }),
                &["artifact_type", "name", "content", "issue_refs"],
            ),
            ToolDefinition::new(
                "list_pending_actions",
                "List all pending resolution actions before finalization.",
                serde_json::json!({}),
                &[],
            ),
            ToolDefinition::new(
                "remove_action",
                "Remove a pending action by ID.",
                serde_json::json!({
                    "action_id": {"type": "string", "description": "ID of the action to remove"},
                }),
                &["action_id"],
            ),
            ToolDefinition::new(
                "finalize_resolution",
                "Validate and finalize the resolution. Irreversible: after this no more \
                 actions can be added.",
                serde_json::json!({}),
                &[],
            ),
        ]
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Option<String> {
        let result = match name {
            "get_issues_to_resolve" => self.get_issues_to_resolve(),
            "get_artifact_types" => self.get_artifact_types(),
            "create_resolution_action" => self.create_resolution_action(args),
            "list_pending_actions" => self.list_pending_actions(),
            "remove_action" => self.remove_action(args),
            "finalize_resolution" => self.finalize_resolution(),
            _ => return None,
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        AnalysisReport, Evidence, Issue, IssueKind, IssueStatus, Severity,
    };
    use rv_artifacts::definition::ArtifactDefinition;
    use rv_artifacts::skills::SkillsHandler;

    fn report_with_issue(local: bool) -> (EnrichedReport, String) {
        let mut issue = Issue::new(
            IssueKind::RepeatedRequest,
            Severity::High,
            "Run tests before commit".into(),
            "User repeats the request across sessions".into(),
        );
        issue.local_change = local;
        issue.evidence.push(Evidence {
            session_id: "sess-a".into(),
            message_index: Some(0),
            quote: "always run tests".into(),
            context: String::new(),
            working_directory: "/Users/dev/app".into(),
        });
        issue.evidence.push(Evidence {
            session_id: "sess-a".into(),
            message_index: Some(4),
            quote: "tests again".into(),
            context: String::new(),
            working_directory: "/Users/dev/app".into(),
        });
        issue.evidence.push(Evidence {
            session_id: "sess-b".into(),
            message_index: Some(1),
            quote: "run the tests".into(),
            context: String::new(),
            working_directory: "/Users/dev/app".into(),
        });
        let id = issue.id.clone();
        let report = EnrichedReport::from_analysis(AnalysisReport {
            connector_id: "claude-code".into(),
            issues: vec![issue],
            conversations_analyzed: 2,
            summary: String::new(),
            created_at: chrono::Utc::now(),
            token_usage: Default::default(),
        });
        (report, id)
    }

    fn tools_with_skills(output: &std::path::Path, local: bool) -> (ResolveTools, String) {
        let (report, issue_id) = report_with_issue(local);
        let mut definition = ArtifactDefinition::default();
        definition.settings.output_path = output.display().to_string();
        let mut handlers: BTreeMap<String, Arc<dyn ArtifactHandler>> = BTreeMap::new();
        handlers.insert("skills".into(), Arc::new(SkillsHandler::new(definition)));
        (
            ResolveTools::new(report, handlers, output.to_path_buf(), false),
            issue_id,
        )
    }

    fn skill_args(issue_ref: &str) -> Value {
        serde_json::json!({
            "artifact_type": "skills",
            "name": "Run Tests Before Commit",
            "content": {
                "name": "Run Tests Before Commit",
                "description": "Always run the test suite before committing",
                "instructions": "1. Run the suite\n2. Fix failures\n3. Commit",
            },
            "issue_refs": [issue_ref],
            "rationale": "Repeated cross-session request",
        })
    }

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn create_action_generates_target_and_harvests_references() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);

        let result = parse(
            &tools
                .dispatch("create_resolution_action", &skill_args(&issue_id))
                .await
                .unwrap(),
        );
        assert_eq!(result["success"], true);
        assert_eq!(
            result["target_path"],
            format!("{}/run-tests-before-commit", dir.path().display())
        );

        let drafts = tools.drafts();
        assert_eq!(drafts.len(), 1);
        // Three evidence entries across two sessions dedupe to two refs.
        assert_eq!(drafts[0].references.len(), 2);
        assert!(!drafts[0].local_change);
    }

    #[tokio::test]
    async fn local_issues_make_local_actions() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), true);
        tools
            .dispatch("create_resolution_action", &skill_args(&issue_id))
            .await
            .unwrap();
        assert!(tools.drafts()[0].local_change);
    }

    #[tokio::test]
    async fn short_issue_refs_resolve_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);
        let short: String = issue_id.chars().take(8).collect();
        let result = parse(
            &tools
                .dispatch("create_resolution_action", &skill_args(&short))
                .await
                .unwrap(),
        );
        assert_eq!(result["success"], true);
        assert_eq!(tools.drafts()[0].references.len(), 2);
    }

    #[tokio::test]
    async fn missing_content_returns_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);
        let result = parse(
            &tools
                .dispatch(
                    "create_resolution_action",
                    &serde_json::json!({
                        "artifact_type": "skills",
                        "name": "x",
                        "issue_refs": [issue_id],
                    }),
                )
                .await
                .unwrap(),
        );
        assert_eq!(result["error"], "content is required");
        assert!(result["hint"].as_str().unwrap().contains("instructions"));
    }

    #[tokio::test]
    async fn unknown_artifact_type_lists_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);
        let mut args = skill_args(&issue_id);
        args["artifact_type"] = Value::String("guidelines".into());
        let result = parse(
            &tools
                .dispatch("create_resolution_action", &args)
                .await
                .unwrap(),
        );
        assert!(result["error"].as_str().unwrap().contains("not enabled"));
        assert_eq!(result["enabled_types"][0], "skills");
    }

    #[tokio::test]
    async fn finalize_validates_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);

        let mut args = skill_args(&issue_id);
        args["content"] = serde_json::json!({"name": "x"});
        tools
            .dispatch("create_resolution_action", &args)
            .await
            .unwrap();

        let result = parse(&tools.dispatch("finalize_resolution", &Value::Null).await.unwrap());
        assert_eq!(result["success"], false);
        let errors = result["errors"].as_array().unwrap();
        assert!(errors
            .iter()
            .any(|e| e.as_str().unwrap().contains("missing 'description'")));
        assert!(errors
            .iter()
            .any(|e| e.as_str().unwrap().contains("missing 'instructions'")));
        // Validation failure leaves the draft open.
        assert!(!tools.is_finalized());
    }

    #[tokio::test]
    async fn finalize_is_irreversible() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);
        tools
            .dispatch("create_resolution_action", &skill_args(&issue_id))
            .await
            .unwrap();

        let result = parse(&tools.dispatch("finalize_resolution", &Value::Null).await.unwrap());
        assert_eq!(result["success"], true);
        assert!(tools.is_finalized());

        let after = parse(
            &tools
                .dispatch("create_resolution_action", &skill_args(&issue_id))
                .await
                .unwrap(),
        );
        assert!(after["error"].as_str().unwrap().contains("finalized"));

        let resolution = tools.build_resolution("run-9").unwrap();
        assert_eq!(resolution.run_id, "run-9");
        assert_eq!(resolution.action_count(), 1);
        assert_eq!(resolution.resolutions[0].connector_id, "claude-code");
    }

    #[tokio::test]
    async fn resolved_issues_are_not_offered() {
        let dir = tempfile::tempdir().unwrap();
        let (mut report, _) = report_with_issue(false);
        report.issues[0].set_status(IssueStatus::AlreadyResolved);
        let tools = ResolveTools::new(report, BTreeMap::new(), dir.path().to_path_buf(), false);
        let result = parse(&tools.dispatch("get_issues_to_resolve", &Value::Null).await.unwrap());
        assert_eq!(result["total"], 0);
    }

    #[tokio::test]
    async fn remove_action_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, issue_id) = tools_with_skills(dir.path(), false);
        tools
            .dispatch("create_resolution_action", &skill_args(&issue_id))
            .await
            .unwrap();
        let action_id = tools.drafts()[0].id.clone();

        let result = parse(
            &tools
                .dispatch("remove_action", &serde_json::json!({"action_id": action_id}))
                .await
                .unwrap(),
        );
        assert_eq!(result["success"], true);
        assert!(tools.drafts().is_empty());

        let empty = parse(&tools.dispatch("finalize_resolution", &Value::Null).await.unwrap());
        assert_eq!(empty["success"], false);
        assert_eq!(empty["message"], "No actions to finalize");
    }
}
