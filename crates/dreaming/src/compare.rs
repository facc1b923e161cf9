//! Stage B: filter and historical comparison.
//!
//! A single lower-temperature agent decides which detected issues are
//! worth acting on and cross-references them against past resolutions
//! (lexically, and semantically when the vector backend is up). If the
//! agent fails, a non-agentic comparison produces the same annotations.

use std::sync::Arc;

use rv_domain::config::Config;
use rv_domain::error::Result;
use rv_domain::llm::AgentRunConfig;
use rv_providers::{AgentRuntime, ChatBackend};
use rv_storage::{ResolutionStore, VectorStore};

use crate::events::{AgentEvent, AgentEventStream, EventKind, EventedTools};
use crate::report::{AnalysisReport, EnrichedIssue, EnrichedReport, HistoricalLink};
use crate::similarity::{score_issue, status_for_score};
use crate::tools::compare::CompareTools;

const COMPARISON_BASE_PROMPT: &str = "\
You are the FILTERING and COMPARISON agent for the reflection system.

Detection cast a wide net. YOUR job is to:
1. FILTER: Decide which issues are worth acting on (include) vs noise (exclude)
2. COMPARE: Check issues against historical resolutions

FILTERING CRITERIA - Be selective! Only INCLUDE issues that:
- Cross-conversation pattern: the issue appears in 2+ different sessions
- Significant single-session issue: major frustration or capability gap
- Recurring problem: a similar issue was \"resolved\" before but keeps happening
- Clear improvement opportunity: a resolution would meaningfully help the user

EXCLUDE if:
- One-time occurrence: normal back-and-forth, user just refining their request
- Already working: a previous resolution is effective, no need to change
- Weak evidence: not enough examples to justify action
- Minor/cosmetic: not worth the effort to resolve

HISTORICAL COMPARISON
- Check whether similar issues were previously resolved
- Mark status: \"new\", \"recurring\", or \"already_resolved\"
- Link to relevant historical resolutions
- Guidelines: score >= 0.85 already_resolved (exclude it), 0.6-0.85 recurring
  (include it), < 0.6 new (include if significant)

YOUR WORKFLOW
1. Get all issues with get_current_issues
2. For each issue: get_issue_details, assess, compare_issue_to_resolutions
   (and search_similar_resolutions_vector for older history), mark status,
   then include_issue or exclude_issue
3. Check progress with get_filtering_summary

IMPORTANT: Every issue must be either included or excluded. Don't leave issues
pending. Only INCLUDED issues go to resolution generation.";

pub struct ComparisonStage {
    backend: Arc<dyn ChatBackend>,
    config: Config,
    store: Arc<ResolutionStore>,
    vectors: Option<Arc<VectorStore>>,
    events: Arc<AgentEventStream>,
}

impl ComparisonStage {
    pub fn new(
        config: Config,
        backend: Arc<dyn ChatBackend>,
        store: Arc<ResolutionStore>,
        vectors: Option<Arc<VectorStore>>,
        events: Arc<AgentEventStream>,
    ) -> Self {
        Self {
            backend,
            config,
            store,
            vectors,
            events,
        }
    }

    pub async fn compare(&self, report: AnalysisReport) -> Result<EnrichedReport> {
        let mut enriched = EnrichedReport::from_analysis(report);
        if enriched.issues.is_empty() {
            enriched.summary = "No issues to compare".into();
            return Ok(enriched);
        }

        let agent_id = format!("compare-{}", enriched.connector_id);
        self.events.emit(AgentEvent::now(
            agent_id.as_str(),
            "comparison",
            EventKind::Thinking,
            format!("Filtering and comparing {} issues", enriched.issues.len()),
        ));

        let lookback = self.config.dreaming.historical_lookback;
        let tools = CompareTools::new(
            enriched.issues.clone(),
            self.store.clone(),
            self.vectors.clone(),
            lookback,
            self.config.vector.min_age_days,
        );
        let evented =
            EventedTools::new(&tools, agent_id.as_str(), "comparison", self.events.as_ref());

        let run_config = AgentRunConfig {
            model: None,
            system_prompt: COMPARISON_BASE_PROMPT.into(),
            max_turns: self.config.dreaming.comparison_max_turns,
            // Lower temperature for consistent include/exclude calls.
            temperature: Some(0.5),
            max_tokens: 4096,
        };
        let initial_prompt = build_initial_prompt(&enriched.issues);

        let runtime = AgentRuntime::new(self.backend.clone());
        let outcome = match runtime.run_agent(&initial_prompt, &run_config, &evented).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "comparison agent failed, falling back to lexical pass");
                self.events.emit(AgentEvent::now(
                    agent_id.as_str(),
                    "comparison",
                    EventKind::Error,
                    format!("Comparison failed: {e}"),
                ));
                return Ok(self.compare_non_agentic(enriched).await);
            }
        };

        let included = tools.included();
        let excluded = tools.excluded();
        self.events.emit(
            AgentEvent::now(
                agent_id.as_str(),
                "comparison",
                EventKind::Complete,
                format!("{} included, {} excluded", included.len(), excluded.len()),
            )
            .with_details(serde_json::json!({
                "included": included.len(),
                "excluded": excluded.len(),
                "tokens": outcome.usage.total_tokens(),
            })),
        );

        // Project the filtering decision: explicit includes win; with
        // none, keep everything not explicitly excluded.
        let annotated = tools.issues();
        let original_count = annotated.len();
        let kept: Vec<EnrichedIssue> = if included.is_empty() {
            annotated
                .into_iter()
                .filter(|i| !excluded.contains_key(&i.issue.id))
                .collect()
        } else {
            annotated
                .into_iter()
                .filter(|i| included.contains(&i.issue.id))
                .collect()
        };

        enriched.issues = kept;
        enriched.historical_resolutions_checked = lookback;
        enriched.token_usage += outcome.usage;
        enriched.summary = format!(
            "{} issues for resolution ({} new, {} recurring), {} filtered out",
            enriched.issues.len(),
            enriched.new_issues().len(),
            enriched.recurring_issues().len(),
            original_count - enriched.issues.len(),
        );

        Ok(enriched)
    }

    /// Non-agentic fallback: lexical scoring against recent file
    /// resolutions plus vector recall, same thresholds.
    async fn compare_non_agentic(&self, mut enriched: EnrichedReport) -> EnrichedReport {
        let lookback = self.config.dreaming.historical_lookback;
        let recent = self.store.list_recent(lookback);
        tracing::info!(
            resolutions = recent.len(),
            "comparing with historical resolutions (non-agentic)"
        );
        enriched.historical_resolutions_checked = recent.len();

        for issue in &mut enriched.issues {
            let mut links: Vec<HistoricalLink> = Vec::new();

            for resolution in &recent {
                for cr in &resolution.resolutions {
                    for action in &cr.actions {
                        let score = score_issue(&issue.issue, action);
                        if score > 0.5 {
                            links.push(HistoricalLink {
                                resolution_id: resolution.id.clone(),
                                artifact_path: action.target.clone(),
                                description: action.rationale.clone(),
                                relevance: score,
                            });
                        }
                    }
                }
            }

            if let Some(ref vectors) = self.vectors {
                let matches = vectors
                    .search_by_issue(
                        issue.issue.kind.as_str(),
                        &issue.issue.title,
                        &issue.issue.description,
                        5,
                        self.config.vector.min_age_days,
                    )
                    .await;
                for m in matches {
                    let description = if m.rationale.is_empty() {
                        m.description.clone()
                    } else {
                        m.rationale.clone()
                    };
                    links.push(HistoricalLink {
                        resolution_id: m.resolution_id,
                        artifact_path: m.target,
                        description,
                        relevance: m.score,
                    });
                }
            }

            links.sort_by(|a, b| {
                b.relevance
                    .partial_cmp(&a.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            links.truncate(5);

            let best = links.first().map(|l| l.relevance).unwrap_or(0.0);
            issue.set_status(status_for_score(best));
            issue.historical_links = links;
        }

        enriched.summary = format!(
            "{} new issues, {} recurring, {} already resolved",
            enriched.new_issues().len(),
            enriched.recurring_issues().len(),
            enriched.resolved_issues().len(),
        );
        enriched
    }
}

fn build_initial_prompt(issues: &[EnrichedIssue]) -> String {
    let issue_list: Vec<String> = issues
        .iter()
        .map(|i| {
            format!(
                "- {}: {} ({}, {})",
                i.issue.short_id(),
                i.issue.title,
                i.issue.kind.as_str(),
                i.issue.severity.as_str()
            )
        })
        .collect();

    format!(
        "Filter and compare these {} issues from detection:\n\n{}\n\n\
         For EACH issue you must:\n\
         1. Get details with get_issue_details\n\
         2. Assess: is this worth acting on or is it noise?\n\
         3. Compare with history using compare_issue_to_resolutions\n\
         4. Mark status (new/recurring/already_resolved)\n\
         5. Decide: include_issue or exclude_issue\n\n\
         Remember:\n\
         - Detection cast a wide net - many issues may be noise\n\
         - Only INCLUDE cross-conversation patterns or significant issues\n\
         - EXCLUDE one-time occurrences, normal back-and-forth, already-resolved\n\
         - Every issue must be decided (included or excluded)\n\n\
         Start by getting the full issue list, then process each one.",
        issues.len(),
        issue_list.join("\n"),
    )
}
