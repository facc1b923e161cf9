//! Cycle orchestration.
//!
//! Runs the three stages per connector (sequentially across
//! connectors), threads token usage into a cost estimate, records
//! incremental progress, and classifies failures: authentication
//! errors surface with their actionable hint, everything else is
//! logged and marked as a failed cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use rv_connectors::registry::ConnectorRegistry;
use rv_connectors::types::Conversation;
use rv_connectors::SourceConnector;
use rv_domain::config::Config;
use rv_domain::error::{Error, Result};
use rv_domain::llm::TokenUsage;
use rv_domain::observability;
use rv_providers::registry::{configured_model, create_backend};
use rv_providers::ChatBackend;
use rv_storage::{ResolutionStore, StateStore, VectorStore};

use crate::compare::ComparisonStage;
use crate::detect::DetectionStage;
use crate::events::{AgentEvent, AgentEventStream, EventKind};
use crate::resolve::ResolutionStage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statistics and cost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-million-token rates in USD.
#[derive(Debug, Clone, Copy)]
struct ModelRates {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

const DEFAULT_RATES: ModelRates = ModelRates {
    input: 3.00,
    output: 15.00,
    cache_write: 3.75,
    cache_read: 0.30,
};

fn rates_for(model: &str) -> ModelRates {
    match model {
        "claude-sonnet-4-20250514" => DEFAULT_RATES,
        "us.anthropic.claude-sonnet-4-5-20250929-v1:0" => DEFAULT_RATES,
        _ => DEFAULT_RATES,
    }
}

/// Token totals for a cycle with a cost estimate.
#[derive(Debug, Clone, Default)]
pub struct DreamingStatistics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub model: String,
}

impl DreamingStatistics {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn add_usage(&mut self, usage: TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_write_tokens += usage.cache_write_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Cost = (input − cache_read)·input + output·output +
    /// cache_write·cache_write + cache_read·cache_read, per million.
    pub fn cost_usd(&self) -> f64 {
        let rates = rates_for(&self.model);
        let non_cached_input = self.input_tokens.saturating_sub(self.cache_read_tokens);
        (non_cached_input as f64 * rates.input
            + self.output_tokens as f64 * rates.output
            + self.cache_write_tokens as f64 * rates.cache_write
            + self.cache_read_tokens as f64 * rates.cache_read)
            / 1_000_000.0
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "input_tokens": self.input_tokens,
            "output_tokens": self.output_tokens,
            "cache_read_tokens": self.cache_read_tokens,
            "cache_write_tokens": self.cache_write_tokens,
            "total_tokens": self.total_tokens(),
            "cost_usd": (self.cost_usd() * 10_000.0).round() / 10_000.0,
            "model": self.model,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DreamingResult {
    pub success: bool,
    pub error: Option<String>,
    /// True when there were no new conversations to analyze.
    pub no_new_conversations: bool,
    pub run_id: String,
    pub conversations_analyzed: usize,
    pub issues_found: usize,
    pub resolutions_generated: usize,
    pub duration_seconds: f64,
    pub resolution_files: Vec<PathBuf>,
    pub statistics: DreamingStatistics,
}

impl DreamingResult {
    fn new(run_id: String) -> Self {
        Self {
            success: true,
            error: None,
            no_new_conversations: false,
            run_id,
            conversations_analyzed: 0,
            issues_found: 0,
            resolutions_generated: 0,
            duration_seconds: 0.0,
            resolution_files: Vec::new(),
            statistics: DreamingStatistics::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DreamingOrchestrator {
    runtime_dir: PathBuf,
    config: Config,
    dry_run: bool,
    events: Arc<AgentEventStream>,
    state: StateStore,
    connector_filter: Option<Vec<String>>,
    prompt_filter: Option<Vec<String>>,
    conversation_limit: Option<usize>,
    backend_override: Option<Arc<dyn ChatBackend>>,
}

impl DreamingOrchestrator {
    pub fn new(runtime_dir: &Path, config: Config, dry_run: bool) -> Self {
        Self {
            runtime_dir: runtime_dir.to_path_buf(),
            config,
            dry_run,
            events: Arc::new(AgentEventStream::default()),
            state: StateStore::new(runtime_dir),
            connector_filter: None,
            prompt_filter: None,
            conversation_limit: None,
            backend_override: None,
        }
    }

    /// The event stream this orchestrator owns; the control surface
    /// subscribes here.
    pub fn events(&self) -> Arc<AgentEventStream> {
        self.events.clone()
    }

    pub fn set_connector_filter(&mut self, connectors: Vec<String>) {
        self.connector_filter = Some(connectors);
    }

    pub fn set_prompt_filter(&mut self, prompts: Vec<String>) {
        self.prompt_filter = Some(prompts);
    }

    /// Hard conversation cap, a testing override.
    pub fn set_conversation_limit(&mut self, limit: usize) {
        self.conversation_limit = Some(limit);
    }

    /// Inject a backend instead of constructing one from config.
    pub fn set_backend(&mut self, backend: Arc<dyn ChatBackend>) {
        self.backend_override = Some(backend);
    }

    /// Run one full cycle across all enabled connectors.
    pub async fn run(&self) -> DreamingResult {
        observability::init();
        let start = std::time::Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut result = DreamingResult::new(run_id.clone());
        let mut stats = DreamingStatistics::for_model(configured_model(&self.config));

        self.events.start(run_id.clone());
        let short_run: String = run_id.chars().take(8).collect();
        self.events.emit(AgentEvent::now(
            "orchestrator",
            "orchestrator",
            EventKind::Thinking,
            format!("Starting dreaming cycle {short_run}"),
        ));
        tracing::info!(run_id = %run_id, dry_run = self.dry_run, "starting dreaming cycle");

        if let Err(e) = self.run_inner(&run_id, &mut result, &mut stats).await {
            if e.is_auth() {
                tracing::error!(error = %e.display_with_hint(), "authentication failed");
            } else {
                tracing::error!(error = %e, "dreaming cycle failed");
            }
            result.success = false;
            result.error = Some(e.display_with_hint());
            self.events.emit(AgentEvent::now(
                "orchestrator",
                "orchestrator",
                EventKind::Error,
                result.error.clone().unwrap_or_default(),
            ));
        }

        self.events.stop();
        result.duration_seconds = start.elapsed().as_secs_f64();
        result.statistics = stats;
        result
    }

    async fn run_inner(
        &self,
        run_id: &str,
        result: &mut DreamingResult,
        stats: &mut DreamingStatistics,
    ) -> Result<()> {
        let backend = match self.backend_override.clone() {
            Some(backend) => backend,
            None => create_backend(&self.config)?,
        };
        let vectors: Option<Arc<VectorStore>> = if self.config.vector.enabled {
            Some(Arc::new(VectorStore::new(self.config.vector.clone())))
        } else {
            None
        };
        let store = Arc::new(ResolutionStore::new(&self.runtime_dir)?);

        let connector_ids = self
            .connector_filter
            .clone()
            .unwrap_or_else(|| self.config.enabled.connectors.clone());
        let connectors =
            ConnectorRegistry::builtin().create_all(&self.runtime_dir, &connector_ids);
        if connectors.is_empty() {
            return Err(Error::Config("no connectors available".into()));
        }

        let mut total_conversations = 0usize;
        let mut total_issues = 0usize;
        let mut total_resolutions = 0usize;

        for connector in &connectors {
            let connector_id = connector.connector_id().to_string();
            tracing::info!(connector = %connector_id, "processing connector");
            self.events.emit(AgentEvent::now(
                "orchestrator",
                "orchestrator",
                EventKind::Thinking,
                format!("Processing connector: {connector_id}"),
            ));

            let conversations = self.extract_conversations(connector.as_ref()).await?;
            if conversations.is_empty() {
                tracing::info!(connector = %connector_id, "no new conversations");
                continue;
            }
            total_conversations += conversations.len();
            let latest_timestamp = latest_conversation_timestamp(&conversations);
            let conversation_count = conversations.len();

            // Stage A: detection.
            let detection = DetectionStage::new(
                &self.runtime_dir,
                self.config.clone(),
                backend.clone(),
                self.events.clone(),
            );
            let report = detection
                .analyze(&connector_id, conversations, self.prompt_filter.as_deref())
                .await?;
            stats.add_usage(report.token_usage);
            total_issues += report.issues.len();

            if report.issues.is_empty() {
                tracing::info!(connector = %connector_id, "no issues found");
                self.advance_connector_state(&connector_id, latest_timestamp, conversation_count)?;
                continue;
            }

            // Stage B: filter & compare. The enriched report's usage
            // accumulates Stage A's, so only the delta is new spend.
            let stage_a_usage = report.token_usage;
            let comparison = ComparisonStage::new(
                self.config.clone(),
                backend.clone(),
                store.clone(),
                vectors.clone(),
                self.events.clone(),
            );
            let enriched = comparison.compare(report).await?;
            stats.add_usage(enriched.token_usage.since(&stage_a_usage));
            tracing::info!(
                new = enriched.new_issues().len(),
                recurring = enriched.recurring_issues().len(),
                resolved = enriched.resolved_issues().len(),
                "comparison finished"
            );

            // Stage C: resolution.
            let resolution_stage = ResolutionStage::new(
                &self.runtime_dir,
                self.config.clone(),
                backend.clone(),
                store.clone(),
                vectors.clone(),
                self.events.clone(),
            );
            if let Some((resolution, path)) = resolution_stage
                .generate(&enriched, run_id, self.dry_run)
                .await?
            {
                total_resolutions += resolution.action_count();
                result.resolution_files.push(path);
                if let Some(usage) = resolution.metadata.get("token_usage") {
                    let usage: TokenUsage =
                        serde_json::from_value(usage.clone()).unwrap_or_default();
                    stats.add_usage(usage);
                }
            }

            self.advance_connector_state(&connector_id, latest_timestamp, conversation_count)?;
        }

        if total_conversations == 0 {
            result.no_new_conversations = true;
            self.events.emit(AgentEvent::now(
                "orchestrator",
                "orchestrator",
                EventKind::Complete,
                "No new conversations to analyze",
            ));
            tracing::info!("no new conversations to analyze");
            return Ok(());
        }

        if !self.dry_run {
            self.state
                .update_dreaming_state(run_id, total_issues as u64, total_resolutions as u64)?;
        }

        result.conversations_analyzed = total_conversations;
        result.issues_found = total_issues;
        result.resolutions_generated = total_resolutions;

        self.events.emit(
            AgentEvent::now(
                "orchestrator",
                "orchestrator",
                EventKind::Complete,
                format!("Cycle complete: {total_issues} issues, {total_resolutions} resolutions"),
            )
            .with_details(serde_json::json!({
                "conversations": total_conversations,
                "issues": total_issues,
                "resolutions": total_resolutions,
                "statistics": stats.to_value(),
            })),
        );
        tracing::info!(
            conversations = total_conversations,
            issues = total_issues,
            resolutions = total_resolutions,
            "dreaming cycle completed"
        );
        Ok(())
    }

    /// Window logic: a hard limit overrides (testing); a first run
    /// looks back `initial_lookback_days`; otherwise everything since
    /// the last processed timestamp.
    async fn extract_conversations(
        &self,
        connector: &dyn SourceConnector,
    ) -> Result<Vec<Conversation>> {
        let connector_state = self.state.connector_state(connector.connector_id());

        if let Some(limit) = self.conversation_limit {
            let batch = connector
                .extract_conversations(connector_state.last_processed, None, Some(limit))
                .await?;
            return Ok(batch.conversations);
        }

        let since = match connector_state.last_processed {
            Some(last) => {
                tracing::info!(
                    connector = connector.connector_id(),
                    since = %last.to_rfc3339(),
                    "resuming from last processed timestamp"
                );
                last
            }
            None => {
                let lookback = self.config.dreaming.initial_lookback_days;
                tracing::info!(
                    connector = connector.connector_id(),
                    lookback_days = lookback,
                    "first run, applying initial lookback"
                );
                Utc::now() - Duration::days(lookback)
            }
        };

        let batch = connector.extract_conversations(Some(since), None, None).await?;
        Ok(batch.conversations)
    }

    fn advance_connector_state(
        &self,
        connector_id: &str,
        latest: Option<chrono::DateTime<Utc>>,
        conversations_processed: usize,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.state.update_connector_state(
            connector_id,
            latest,
            None,
            conversations_processed as u64,
        )
    }
}

/// Latest end (falling back to start) timestamp across a batch. All
/// connector timestamps are already UTC.
fn latest_conversation_timestamp(
    conversations: &[Conversation],
) -> Option<chrono::DateTime<Utc>> {
    conversations.iter().map(|c| c.ended_at.max(c.started_at)).max()
}
