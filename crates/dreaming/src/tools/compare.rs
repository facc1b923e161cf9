//! Stage B toolset: issue filtering and historical comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use rv_domain::llm::ToolDefinition;
use rv_providers::ToolDispatcher;
use rv_storage::{Resolution, ResolutionStore, VectorStore};

use crate::report::{EnrichedIssue, HistoricalLink, IssueStatus};
use crate::similarity::{recommendation, score_issue};
use crate::tools::{arg_str, arg_usize, err_response, pretty};

const DESCRIPTION_PREVIEW_CHARS: usize = 200;
const COMPARISON_FLOOR: f64 = 0.3;
const TOP_MATCHES: usize = 10;

/// Comparison context: the enriched issue set plus the include/exclude
/// decisions the agent makes. Owned by the single Stage B agent.
pub struct CompareTools {
    issues: Mutex<Vec<EnrichedIssue>>,
    store: Arc<ResolutionStore>,
    vectors: Option<Arc<VectorStore>>,
    lookback: usize,
    default_min_age_days: i64,
    cached_resolutions: Mutex<Option<Arc<Vec<Resolution>>>>,
    included: Mutex<BTreeSet<String>>,
    excluded: Mutex<BTreeMap<String, String>>,
}

impl CompareTools {
    pub fn new(
        issues: Vec<EnrichedIssue>,
        store: Arc<ResolutionStore>,
        vectors: Option<Arc<VectorStore>>,
        lookback: usize,
        default_min_age_days: i64,
    ) -> Self {
        Self {
            issues: Mutex::new(issues),
            store,
            vectors,
            lookback,
            default_min_age_days,
            cached_resolutions: Mutex::new(None),
            included: Mutex::new(BTreeSet::new()),
            excluded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn issues(&self) -> Vec<EnrichedIssue> {
        self.issues.lock().clone()
    }

    pub fn included(&self) -> BTreeSet<String> {
        self.included.lock().clone()
    }

    pub fn excluded(&self) -> BTreeMap<String, String> {
        self.excluded.lock().clone()
    }

    /// Lazily loaded recent history, shared across tool calls.
    fn resolutions(&self) -> Arc<Vec<Resolution>> {
        let mut cached = self.cached_resolutions.lock();
        if let Some(ref resolutions) = *cached {
            return resolutions.clone();
        }
        let loaded = Arc::new(self.store.list_recent(self.lookback));
        *cached = Some(loaded.clone());
        loaded
    }

    /// Resolve a full or partial (prefix) issue id to its index.
    fn locate(&self, issue_id: &str) -> Option<usize> {
        let issues = self.issues.lock();
        issues
            .iter()
            .position(|i| i.issue.id == issue_id)
            .or_else(|| issues.iter().position(|i| i.issue.id.starts_with(issue_id)))
    }

    // ── Tool handlers ──────────────────────────────────────────────

    fn get_current_issues(&self) -> String {
        let issues = self.issues.lock();
        let entries: Vec<Value> = issues
            .iter()
            .map(|i| {
                let description: String = i
                    .issue
                    .description
                    .chars()
                    .take(DESCRIPTION_PREVIEW_CHARS)
                    .collect();
                serde_json::json!({
                    "id": i.issue.id,
                    "type": i.issue.kind.as_str(),
                    "severity": i.issue.severity.as_str(),
                    "title": i.issue.title,
                    "description": description,
                    "evidence_count": i.issue.evidence.len(),
                    "status": i.status.as_str(),
                    "is_recurring": i.is_recurring,
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "issues": entries,
            "total": issues.len(),
        }))
    }

    fn get_issue_details(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let issues = self.issues.lock();
        let issue = &issues[index];

        pretty(&serde_json::json!({
            "id": issue.issue.id,
            "type": issue.issue.kind.as_str(),
            "severity": issue.issue.severity.as_str(),
            "title": issue.issue.title,
            "description": issue.issue.description,
            "evidence": issue.issue.evidence,
            "suggested_resolution": issue.issue.suggested_resolution,
            "local_change": issue.issue.local_change,
            "status": issue.status.as_str(),
            "is_recurring": issue.is_recurring,
            "historical_links": issue.historical_links,
        }))
    }

    fn get_historical_resolutions(&self, args: &Value) -> String {
        let limit = arg_usize(args, "limit", 7);
        let resolutions = self.resolutions();

        let entries: Vec<Value> = resolutions
            .iter()
            .take(limit)
            .map(|res| {
                let actions: Vec<Value> = res
                    .resolutions
                    .iter()
                    .flat_map(|cr| &cr.actions)
                    .map(|action| {
                        let rationale: String = action.rationale.chars().take(100).collect();
                        serde_json::json!({
                            "type": action.kind,
                            "target": action.target,
                            "rationale": rationale,
                            "issue_refs": action.issue_refs,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "id": res.id,
                    "created_at": res.created_at.to_rfc3339(),
                    "dreaming_run_id": res.run_id,
                    "actions": actions,
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "resolutions": entries,
            "total": entries.len(),
        }))
    }

    fn get_resolution_details(&self, args: &Value) -> String {
        let Some(resolution_id) = arg_str(args, "resolution_id") else {
            return err_response("resolution_id is required");
        };
        let Some(resolution) = self.store.load_by_id(resolution_id) else {
            return err_response(format!("Resolution {resolution_id} not found"));
        };

        let actions: Vec<Value> = resolution
            .resolutions
            .iter()
            .flat_map(|cr| {
                cr.actions.iter().map(move |action| {
                    serde_json::json!({
                        "connector_id": cr.connector_id,
                        "type": action.kind,
                        "target": action.target,
                        "operation": action.operation.as_str(),
                        "content": action.content,
                        "issue_refs": action.issue_refs,
                        "priority": action.priority,
                        "rationale": action.rationale,
                    })
                })
            })
            .collect();

        pretty(&serde_json::json!({
            "id": resolution.id,
            "created_at": resolution.created_at.to_rfc3339(),
            "dreaming_run_id": resolution.run_id,
            "actions": actions,
            "metadata": resolution.metadata,
        }))
    }

    fn compare_issue_to_resolutions(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let (issue, title) = {
            let issues = self.issues.lock();
            (issues[index].issue.clone(), issues[index].issue.title.clone())
        };

        let resolutions = self.resolutions();
        let mut matches: Vec<Value> = Vec::new();
        let mut best: Option<f64> = None;

        for res in resolutions.iter() {
            for cr in &res.resolutions {
                for action in &cr.actions {
                    let score = score_issue(&issue, action);
                    if score > COMPARISON_FLOOR {
                        best = Some(best.map_or(score, |b: f64| b.max(score)));
                        matches.push(serde_json::json!({
                            "resolution_id": res.id,
                            "action_target": action.target,
                            "action_type": action.kind,
                            "rationale": action.rationale,
                            "similarity_score": (score * 100.0).round() / 100.0,
                            "issue_refs": action.issue_refs,
                        }));
                    }
                }
            }
        }

        matches.sort_by(|a, b| {
            let sa = a["similarity_score"].as_f64().unwrap_or(0.0);
            let sb = b["similarity_score"].as_f64().unwrap_or(0.0);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(TOP_MATCHES);

        pretty(&serde_json::json!({
            "issue_id": issue_id,
            "issue_title": title,
            "matches": matches,
            "recommendation": recommendation(best),
        }))
    }

    async fn search_similar_resolutions_vector(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let Some(ref vectors) = self.vectors else {
            return pretty(&serde_json::json!({
                "error": "Vector search is not configured",
                "fallback": "Use compare_issue_to_resolutions for file-based comparison",
            }));
        };

        let min_age_days = args
            .get("min_age_days")
            .and_then(Value::as_i64)
            .unwrap_or(self.default_min_age_days);
        let limit = arg_usize(args, "limit", 5);

        let (kind, title, description) = {
            let issues = self.issues.lock();
            let issue = &issues[index].issue;
            (
                issue.kind.as_str().to_string(),
                issue.title.clone(),
                issue.description.clone(),
            )
        };

        let matches = vectors
            .search_by_issue(&kind, &title, &description, limit, min_age_days)
            .await;

        if matches.is_empty() {
            return pretty(&serde_json::json!({
                "issue_id": issue_id,
                "matches": [],
                "message": "No similar resolutions found in vector store",
            }));
        }

        let best = matches.first().map(|m| m.score);
        pretty(&serde_json::json!({
            "issue_id": issue_id,
            "issue_title": title,
            "matches": matches,
            "recommendation": recommendation(best),
        }))
    }

    fn link_issue_to_resolution(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(resolution_id) = arg_str(args, "resolution_id") else {
            return err_response("resolution_id is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let Some(resolution) = self.store.load_by_id(resolution_id) else {
            return err_response(format!("Resolution {resolution_id} not found"));
        };

        let link = HistoricalLink {
            resolution_id: resolution.id.clone(),
            artifact_path: arg_str(args, "artifact_path").unwrap_or_default().to_string(),
            description: arg_str(args, "description").unwrap_or_default().to_string(),
            relevance: args
                .get("relevance")
                .and_then(Value::as_f64)
                .unwrap_or(0.8),
        };

        let mut issues = self.issues.lock();
        let issue = &mut issues[index];
        issue.historical_links.push(link.clone());
        let short: String = resolution.id.chars().take(8).collect();

        serde_json::json!({
            "success": true,
            "message": format!("Linked issue '{}' to resolution {short}", issue.issue.title),
            "link": link,
        })
        .to_string()
    }

    fn mark_issue_status(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(status) = arg_str(args, "status").and_then(IssueStatus::parse) else {
            return err_response(format!(
                "Invalid status: {}",
                arg_str(args, "status").unwrap_or("(missing)")
            ));
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };

        let mut issues = self.issues.lock();
        let issue = &mut issues[index];
        issue.set_status(status);

        serde_json::json!({
            "success": true,
            "issue_id": issue.issue.id,
            "new_status": status.as_str(),
            "message": format!("Issue '{}' marked as {}", issue.issue.title, status.as_str()),
        })
        .to_string()
    }

    fn include_issue(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let (full_id, title) = {
            let issues = self.issues.lock();
            (issues[index].issue.id.clone(), issues[index].issue.title.clone())
        };

        self.excluded.lock().remove(&full_id);
        let mut included = self.included.lock();
        included.insert(full_id.clone());

        serde_json::json!({
            "success": true,
            "issue_id": full_id,
            "message": format!("Issue '{title}' INCLUDED for resolution"),
            "rationale": arg_str(args, "rationale").unwrap_or("Issue deemed worth resolving"),
            "total_included": included.len(),
        })
        .to_string()
    }

    fn exclude_issue(&self, args: &Value) -> String {
        let Some(issue_id) = arg_str(args, "issue_id") else {
            return err_response("issue_id is required");
        };
        let Some(reason) = arg_str(args, "reason") else {
            return err_response("reason is required");
        };
        let Some(index) = self.locate(issue_id) else {
            return err_response(format!("Issue {issue_id} not found"));
        };
        let (full_id, title) = {
            let issues = self.issues.lock();
            (issues[index].issue.id.clone(), issues[index].issue.title.clone())
        };

        self.included.lock().remove(&full_id);
        let mut excluded = self.excluded.lock();
        excluded.insert(full_id.clone(), reason.to_string());

        serde_json::json!({
            "success": true,
            "issue_id": full_id,
            "message": format!("Issue '{title}' EXCLUDED from resolution"),
            "reason": reason,
            "total_excluded": excluded.len(),
        })
        .to_string()
    }

    fn get_filtering_summary(&self) -> String {
        let issues = self.issues.lock();
        let included = self.included.lock();
        let excluded = self.excluded.lock();

        let mut included_out = Vec::new();
        let mut excluded_out = Vec::new();
        let mut pending_out = Vec::new();

        for issue in issues.iter() {
            let short = issue.issue.short_id();
            if included.contains(&issue.issue.id) {
                included_out.push(serde_json::json!({
                    "id": short,
                    "title": issue.issue.title,
                    "severity": issue.issue.severity.as_str(),
                }));
            } else if let Some(reason) = excluded.get(&issue.issue.id) {
                excluded_out.push(serde_json::json!({
                    "id": short,
                    "title": issue.issue.title,
                    "reason": reason,
                }));
            } else {
                pending_out.push(serde_json::json!({
                    "id": short,
                    "title": issue.issue.title,
                    "severity": issue.issue.severity.as_str(),
                }));
            }
        }

        pretty(&serde_json::json!({
            "included": included_out,
            "excluded": excluded_out,
            "pending": pending_out,
            "summary": format!(
                "{} included, {} excluded, {} pending",
                included_out.len(),
                excluded_out.len(),
                pending_out.len()
            ),
        }))
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for CompareTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "get_current_issues",
                "Get all issues detected in Stage A that need filtering and comparison.",
                serde_json::json!({}),
                &[],
            ),
            ToolDefinition::new(
                "get_issue_details",
                "Get full details of an issue including all evidence. Use to assess issue quality.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue (prefix accepted)"},
                }),
                &["issue_id"],
            ),
            ToolDefinition::new(
                "get_historical_resolutions",
                "Get recent historical resolutions for comparison.",
                serde_json::json!({
                    "limit": {
                        "type": "integer",
                        "description": "Maximum resolutions to return (default: 7)",
                        "default": 7,
                    },
                }),
                &[],
            ),
            ToolDefinition::new(
                "get_resolution_details",
                "Get full details of a specific resolution including all actions and content.",
                serde_json::json!({
                    "resolution_id": {"type": "string", "description": "ID of the resolution"},
                }),
                &["resolution_id"],
            ),
            ToolDefinition::new(
                "compare_issue_to_resolutions",
                "Compare an issue to all historical resolutions and get lexical similarity \
                 scores with a recommendation.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue to compare"},
                }),
                &["issue_id"],
            ),
            ToolDefinition::new(
                "search_similar_resolutions_vector",
                "Search for similar historical resolutions using semantic vector similarity. \
                 Finds conceptually similar resolutions even with different wording; searches \
                 resolutions older than 7 days by default.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue"},
                    "min_age_days": {
                        "type": "integer",
                        "description": "Only search resolutions older than this (default: 7)",
                        "default": 7,
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default: 5)",
                        "default": 5,
                    },
                }),
                &["issue_id"],
            ),
            ToolDefinition::new(
                "link_issue_to_resolution",
                "Link a current issue to a past resolution you found relevant.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the current issue"},
                    "resolution_id": {"type": "string", "description": "ID of the historical resolution"},
                    "artifact_path": {"type": "string", "description": "Path to the artifact from the resolution"},
                    "description": {"type": "string", "description": "How they relate"},
                    "relevance": {
                        "type": "number",
                        "description": "How relevant the match is (0.0-1.0, default: 0.8)",
                        "default": 0.8,
                    },
                }),
                &["issue_id", "resolution_id"],
            ),
            ToolDefinition::new(
                "mark_issue_status",
                "Mark an issue's historical status. new=no prior resolution, recurring=keeps \
                 happening despite one, already_resolved=an equivalent resolution exists.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue"},
                    "status": {
                        "type": "string",
                        "enum": ["new", "recurring", "already_resolved"],
                        "description": "Historical status",
                    },
                }),
                &["issue_id", "status"],
            ),
            ToolDefinition::new(
                "include_issue",
                "INCLUDE an issue for resolution generation. Use when the issue is worth acting on.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue"},
                    "rationale": {"type": "string", "description": "Why this issue should be resolved"},
                }),
                &["issue_id"],
            ),
            ToolDefinition::new(
                "exclude_issue",
                "EXCLUDE an issue from resolution generation. Use for noise, one-time issues, \
                 or already-resolved problems.",
                serde_json::json!({
                    "issue_id": {"type": "string", "description": "ID of the issue"},
                    "reason": {"type": "string", "description": "Why this issue should NOT be resolved"},
                }),
                &["issue_id", "reason"],
            ),
            ToolDefinition::new(
                "get_filtering_summary",
                "Get a summary of which issues are included/excluded/pending.",
                serde_json::json!({}),
                &[],
            ),
        ]
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Option<String> {
        let result = match name {
            "get_current_issues" => self.get_current_issues(),
            "get_issue_details" => self.get_issue_details(args),
            "get_historical_resolutions" => self.get_historical_resolutions(args),
            "get_resolution_details" => self.get_resolution_details(args),
            "compare_issue_to_resolutions" => self.compare_issue_to_resolutions(args),
            "search_similar_resolutions_vector" => {
                self.search_similar_resolutions_vector(args).await
            }
            "link_issue_to_resolution" => self.link_issue_to_resolution(args),
            "mark_issue_status" => self.mark_issue_status(args),
            "include_issue" => self.include_issue(args),
            "exclude_issue" => self.exclude_issue(args),
            "get_filtering_summary" => self.get_filtering_summary(),
            _ => return None,
        };
        Some(result)
    }
}
