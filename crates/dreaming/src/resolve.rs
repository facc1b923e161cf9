//! Stage C: resolution generation.
//!
//! The agent drafts actions against the enabled artifact handlers,
//! finalizes them, and the stage persists the record (dry runs to the
//! sibling directory), indexes each action in the vector store, applies
//! the artifacts on disk, and optionally runs the judges.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use rv_artifacts::{ArtifactHandler, ArtifactRegistry};
use rv_domain::config::Config;
use rv_domain::error::Result;
use rv_domain::llm::AgentRunConfig;
use rv_providers::{AgentRuntime, ChatBackend};
use rv_storage::{Resolution, ResolutionStore, ResolutionValidator, VectorStore};

use crate::events::{AgentEvent, AgentEventStream, EventKind, EventedTools};
use crate::judges;
use crate::report::{EnrichedIssue, EnrichedReport};
use crate::tools::resolve::ResolveTools;

const RESOLUTION_BASE_PROMPT: &str = "\
You create resolutions for AI assistant issues.

Resolutions are concrete actions - creating skills or preference entries - that
will improve the assistant's future behavior.

Your task:
1. Review issues that need resolution (use get_issues_to_resolve)
2. Understand available artifact types (use get_artifact_types)
3. Create resolution actions with create_resolution_action
4. Review with list_pending_actions, then finalize_resolution

For each issue, consider:
- Which artifact type fits: skills for procedures, preferences for style
- Should this be global or project-specific?
- For recurring issues: should an existing artifact be updated instead?

CRITICAL: the 'content' parameter of create_resolution_action is REQUIRED and
must carry the artifact type's required fields (see get_artifact_types).

Guidelines:
- Address high-severity issues first
- Group related issues into a single action when appropriate
- Include a clear rationale for each action
- Prefer updating existing artifacts for recurring issues";

pub struct ResolutionStage {
    backend: Arc<dyn ChatBackend>,
    config: Config,
    runtime_dir: PathBuf,
    store: Arc<ResolutionStore>,
    vectors: Option<Arc<VectorStore>>,
    registry: ArtifactRegistry,
    validator: ResolutionValidator,
    events: Arc<AgentEventStream>,
}

impl ResolutionStage {
    pub fn new(
        runtime_dir: &Path,
        config: Config,
        backend: Arc<dyn ChatBackend>,
        store: Arc<ResolutionStore>,
        vectors: Option<Arc<VectorStore>>,
        events: Arc<AgentEventStream>,
    ) -> Self {
        Self {
            backend,
            config,
            runtime_dir: runtime_dir.to_path_buf(),
            store,
            vectors,
            registry: ArtifactRegistry::builtin(),
            validator: ResolutionValidator::new(),
            events,
        }
    }

    /// Generate, persist, and apply a resolution for the filtered
    /// report. Returns `None` when there is nothing to resolve or the
    /// agent finalized nothing.
    pub async fn generate(
        &self,
        report: &EnrichedReport,
        run_id: &str,
        dry_run: bool,
    ) -> Result<Option<(Resolution, PathBuf)>> {
        let mut issues_to_resolve = report.new_issues();
        issues_to_resolve.extend(report.recurring_issues());
        if issues_to_resolve.is_empty() {
            tracing::info!("no issues to resolve");
            return Ok(None);
        }

        let agent_id = format!("resolve-{}", report.connector_id);
        self.events.emit(AgentEvent::now(
            agent_id.as_str(),
            "resolution",
            EventKind::Thinking,
            format!("Creating resolutions for {} issues", issues_to_resolve.len()),
        ));

        let handlers = self.load_handlers();
        let system_prompt = self.build_system_prompt(&handlers);
        let initial_prompt = build_initial_prompt(&issues_to_resolve);

        let tools = ResolveTools::new(
            report.clone(),
            handlers.clone(),
            self.runtime_dir.clone(),
            dry_run,
        );
        let evented =
            EventedTools::new(&tools, agent_id.as_str(), "resolution", self.events.as_ref());

        let run_config = AgentRunConfig {
            model: None,
            system_prompt,
            max_turns: self.config.dreaming.resolution_max_turns,
            temperature: Some(0.7),
            max_tokens: 4096,
        };

        let runtime = AgentRuntime::new(self.backend.clone());
        let outcome = match runtime.run_agent(&initial_prompt, &run_config, &evented).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "resolution agent failed");
                self.events.emit(AgentEvent::now(
                    agent_id.as_str(),
                    "resolution",
                    EventKind::Error,
                    format!("Resolution failed: {e}"),
                ));
                return Ok(None);
            }
        };

        let Some(mut resolution) = tools.build_resolution(run_id) else {
            self.events.emit(AgentEvent::now(
                agent_id.as_str(),
                "resolution",
                EventKind::Complete,
                "No actions finalized",
            ));
            return Ok(None);
        };
        resolution
            .metadata
            .insert("token_usage".into(), outcome.usage.to_value());

        // The persisted document gets one more structural pass on top
        // of the per-draft validation finalize already did.
        let (is_valid, errors) = self.validator.validate(&resolution.to_value());
        if !is_valid {
            tracing::error!(?errors, "finalized resolution failed document validation");
            self.events.emit(AgentEvent::now(
                agent_id.as_str(),
                "resolution",
                EventKind::Error,
                format!("Resolution document invalid: {}", errors.join("; ")),
            ));
            return Ok(None);
        }

        if self.config.dreaming.judges_enabled {
            let evaluations = self.evaluate_actions(&resolution, report).await;
            resolution
                .metadata
                .insert("evaluations".into(), Value::Object(evaluations));
        }

        let action_count = resolution.action_count();
        self.events.emit(
            AgentEvent::now(
                agent_id.as_str(),
                "resolution",
                EventKind::Complete,
                format!("Created {action_count} resolution actions"),
            )
            .with_details(serde_json::json!({
                "action_count": action_count,
                "dry_run": dry_run,
                "tokens": outcome.usage.total_tokens(),
            })),
        );

        let path = self.store.save(&resolution, dry_run)?;
        if !dry_run {
            self.index_actions(&resolution).await;
            self.apply_actions(&resolution, &handlers);
        }

        Ok(Some((resolution, path)))
    }

    fn load_handlers(&self) -> BTreeMap<String, Arc<dyn ArtifactHandler>> {
        let mut handlers = BTreeMap::new();
        for id in self.registry.enabled_ids(&self.runtime_dir) {
            match self.registry.create(&id, &self.runtime_dir) {
                Ok(handler) => {
                    handlers.insert(id, handler);
                }
                Err(e) => tracing::warn!(artifact = %id, error = %e, "handler unavailable"),
            }
        }
        handlers
    }

    fn build_system_prompt(&self, handlers: &BTreeMap<String, Arc<dyn ArtifactHandler>>) -> String {
        let mut prompt = RESOLUTION_BASE_PROMPT.to_string();
        for (id, handler) in handlers {
            prompt.push_str(&format!("\n\n## Artifact Type: {id}\n{}", handler.agent_context()));
        }
        prompt
    }

    /// Index every action in the vector store; failures only log.
    async fn index_actions(&self, resolution: &Resolution) {
        let Some(ref vectors) = self.vectors else {
            return;
        };
        let mut stored = 0usize;
        for cr in &resolution.resolutions {
            for action in &cr.actions {
                if vectors
                    .store_action(&resolution.id, &cr.connector_id, action, resolution.created_at)
                    .await
                {
                    stored += 1;
                }
            }
        }
        tracing::info!(stored, "indexed resolution actions in vector store");
    }

    fn apply_actions(
        &self,
        resolution: &Resolution,
        handlers: &BTreeMap<String, Arc<dyn ArtifactHandler>>,
    ) {
        for cr in &resolution.resolutions {
            for action in &cr.actions {
                let Some(handler) = handlers.get(&action.kind) else {
                    tracing::error!(kind = %action.kind, "no handler for action");
                    continue;
                };
                match handler.apply_action(action) {
                    Ok(artifact) => {
                        tracing::info!(
                            operation = action.operation.as_str(),
                            target = %artifact.path.display(),
                            "applied action"
                        );
                    }
                    Err(e) => {
                        tracing::error!(target = %action.target, error = %e, "failed to apply action");
                    }
                }
            }
        }
    }

    /// Judge every action. Each judge's failure is recorded under its
    /// key as `{"error": ...}`; the record persists regardless.
    async fn evaluate_actions(
        &self,
        resolution: &Resolution,
        report: &EnrichedReport,
    ) -> Map<String, Value> {
        let backend = self.backend.as_ref();
        let mut evaluations = Map::new();

        for cr in &resolution.resolutions {
            for action in &cr.actions {
                let issue_text = referenced_issue_text(&action.issue_refs, &report.issues);
                let evidence_text = referenced_evidence_text(&action.issue_refs, &report.issues);
                let resolution_description = if action.rationale.is_empty() {
                    action
                        .content
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                } else {
                    action.rationale.clone()
                };
                let working_directory = action
                    .references
                    .first()
                    .map(|r| r.working_directory.clone())
                    .unwrap_or_default();
                let content_value = Value::Object(action.content.clone());

                let mut verdict = Map::new();
                verdict.insert(
                    "pii".into(),
                    unwrap_judge(judges::detect_pii(backend, &content_value.to_string()).await),
                );
                verdict.insert(
                    "significance".into(),
                    unwrap_judge(
                        judges::judge_significance(
                            backend,
                            &resolution_description,
                            &issue_text,
                            &evidence_text,
                        )
                        .await,
                    ),
                );
                verdict.insert(
                    "applicability".into(),
                    unwrap_judge(
                        judges::judge_applicability(
                            backend,
                            action
                                .content
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or(action.target.as_str()),
                            &issue_text,
                            &content_value,
                        )
                        .await,
                    ),
                );
                verdict.insert(
                    "local_vs_global".into(),
                    unwrap_judge(
                        judges::judge_local_vs_global(
                            backend,
                            &issue_text,
                            &resolution_description,
                            &working_directory,
                        )
                        .await,
                    ),
                );

                evaluations.insert(action.target.clone(), Value::Object(verdict));
            }
        }
        evaluations
    }
}

fn unwrap_judge(result: Result<Value>) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

fn referenced_issue_text(refs: &[String], issues: &[EnrichedIssue]) -> String {
    issues
        .iter()
        .filter(|i| {
            refs.iter()
                .any(|r| i.issue.id == *r || i.issue.id.starts_with(r.as_str()))
        })
        .map(|i| format!("{}: {}", i.issue.title, i.issue.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn referenced_evidence_text(refs: &[String], issues: &[EnrichedIssue]) -> String {
    issues
        .iter()
        .filter(|i| {
            refs.iter()
                .any(|r| i.issue.id == *r || i.issue.id.starts_with(r.as_str()))
        })
        .flat_map(|i| i.issue.evidence.iter())
        .map(|e| e.quote.clone())
        .filter(|q| !q.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_initial_prompt(issues: &[&EnrichedIssue]) -> String {
    let mut sorted: Vec<&&EnrichedIssue> = issues.iter().collect();
    sorted.sort_by(|a, b| b.issue.severity.cmp(&a.issue.severity));

    let issue_list: Vec<String> = sorted
        .iter()
        .take(10)
        .map(|issue| {
            let description: String = issue.issue.description.chars().take(100).collect();
            format!(
                "- {} [{}] {}\n  Type: {}, Status: {}\n  Description: {description}...",
                issue.issue.short_id(),
                issue.issue.severity.as_str().to_uppercase(),
                issue.issue.title,
                issue.issue.kind.as_str(),
                issue.status.as_str(),
            )
        })
        .collect();

    format!(
        "Create resolutions for these {} issues:\n\n{}\n\n\
         Steps:\n\
         1. Get full issue details with get_issues_to_resolve\n\
         2. Check available artifact types with get_artifact_types\n\
         3. Create resolution actions using create_resolution_action\n\
         4. Review pending actions with list_pending_actions\n\
         5. Call finalize_resolution when complete\n\n\
         For each issue, create appropriate artifacts.\n\
         Consider grouping related issues if applicable.",
        issues.len(),
        issue_list.join("\n"),
    )
}
