//! Issue and report types flowing between the stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rv_domain::llm::TokenUsage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    RepeatedRequest,
    FrustrationSignal,
    StyleMismatch,
    CapabilityGap,
    KnowledgeGap,
    #[default]
    Other,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::RepeatedRequest => "repeated_request",
            IssueKind::FrustrationSignal => "frustration_signal",
            IssueKind::StyleMismatch => "style_mismatch",
            IssueKind::CapabilityGap => "capability_gap",
            IssueKind::KnowledgeGap => "knowledge_gap",
            IssueKind::Other => "other",
        }
    }

    /// Lenient parse: unknown strings fold to `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "repeated_request" => IssueKind::RepeatedRequest,
            "frustration_signal" => IssueKind::FrustrationSignal,
            "style_mismatch" => IssueKind::StyleMismatch,
            "capability_gap" => IssueKind::CapabilityGap,
            "knowledge_gap" => IssueKind::KnowledgeGap,
            _ => IssueKind::Other,
        }
    }
}

/// Severity ordered low → critical so `Ord` picks the worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse: unknown strings fold to `Medium`.
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    New,
    Recurring,
    AlreadyResolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::New => "new",
            IssueStatus::Recurring => "recurring",
            IssueStatus::AlreadyResolved => "already_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(IssueStatus::New),
            "recurring" => Some(IssueStatus::Recurring),
            "already_resolved" => Some(IssueStatus::AlreadyResolved),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pointer into a conversation supporting an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub session_id: String,
    #[serde(default)]
    pub message_index: Option<usize>,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub working_directory: String,
}

/// An issue detected in Stage A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    pub confidence: f64,
    #[serde(default)]
    pub suggested_resolution: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// True when the issue belongs to one project's conventions rather
    /// than the user globally.
    #[serde(default)]
    pub local_change: bool,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity, title: String, description: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            title,
            description,
            evidence: Vec::new(),
            confidence: 0.5,
            suggested_resolution: String::new(),
            metadata: Map::new(),
            local_change: false,
        }
    }

    pub fn short_id(&self) -> String {
        self.id.chars().take(8).collect()
    }
}

/// Link to a historical resolution found for a current issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalLink {
    pub resolution_id: String,
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub relevance: f64,
}

/// Issue enriched with Stage B's historical verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedIssue {
    #[serde(flatten)]
    pub issue: Issue,
    #[serde(default)]
    pub historical_links: Vec<HistoricalLink>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub status: IssueStatus,
}

impl EnrichedIssue {
    pub fn set_status(&mut self, status: IssueStatus) {
        self.status = status;
        self.is_recurring = status == IssueStatus::Recurring;
    }
}

impl From<Issue> for EnrichedIssue {
    fn from(issue: Issue) -> Self {
        Self {
            issue,
            historical_links: Vec::new(),
            is_recurring: false,
            status: IssueStatus::New,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stage A output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub connector_id: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub conversations_analyzed: usize,
    #[serde(default)]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl AnalysisReport {
    pub fn empty(connector_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            issues: Vec::new(),
            conversations_analyzed: 0,
            summary: summary.into(),
            created_at: Utc::now(),
            token_usage: TokenUsage::default(),
        }
    }
}

/// Stage B output: the analysis report with history annotations and
/// the include/exclude filtering applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedReport {
    pub connector_id: String,
    #[serde(default)]
    pub issues: Vec<EnrichedIssue>,
    #[serde(default)]
    pub conversations_analyzed: usize,
    #[serde(default)]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub historical_resolutions_checked: usize,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl EnrichedReport {
    pub fn from_analysis(report: AnalysisReport) -> Self {
        Self {
            connector_id: report.connector_id,
            issues: report.issues.into_iter().map(EnrichedIssue::from).collect(),
            conversations_analyzed: report.conversations_analyzed,
            summary: report.summary,
            created_at: report.created_at,
            historical_resolutions_checked: 0,
            token_usage: report.token_usage,
        }
    }

    pub fn new_issues(&self) -> Vec<&EnrichedIssue> {
        self.issues
            .iter()
            .filter(|i| i.status == IssueStatus::New)
            .collect()
    }

    pub fn recurring_issues(&self) -> Vec<&EnrichedIssue> {
        self.issues
            .iter()
            .filter(|i| i.status == IssueStatus::Recurring)
            .collect()
    }

    pub fn resolved_issues(&self) -> Vec<&EnrichedIssue> {
        self.issues
            .iter()
            .filter(|i| i.status == IssueStatus::AlreadyResolved)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_serde_round_trip_is_identity() {
        let mut issue = Issue::new(
            IssueKind::RepeatedRequest,
            Severity::High,
            "Repeats test request".into(),
            "User keeps asking for tests".into(),
        );
        issue.evidence.push(Evidence {
            session_id: "sess-1".into(),
            message_index: Some(3),
            quote: "always run tests".into(),
            context: "before commit".into(),
            working_directory: "/Users/dev/app".into(),
        });
        issue.confidence = 0.8;
        issue.local_change = true;
        issue
            .metadata
            .insert("merged_count".into(), Value::from(2));

        let json = serde_json::to_string(&issue).unwrap();
        let parsed: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, issue.id);
        assert_eq!(parsed.kind, issue.kind);
        assert_eq!(parsed.severity, issue.severity);
        assert_eq!(parsed.evidence, issue.evidence);
        assert_eq!(parsed.confidence, issue.confidence);
        assert_eq!(parsed.local_change, issue.local_change);
        assert_eq!(parsed.metadata, issue.metadata);

        // The wire field is named `type`.
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "repeated_request");
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn status_controls_is_recurring() {
        let mut enriched: EnrichedIssue = Issue::new(
            IssueKind::Other,
            Severity::Low,
            "t".into(),
            "d".into(),
        )
        .into();
        assert_eq!(enriched.status, IssueStatus::New);
        assert!(!enriched.is_recurring);

        enriched.set_status(IssueStatus::Recurring);
        assert!(enriched.is_recurring);
        enriched.set_status(IssueStatus::AlreadyResolved);
        assert!(!enriched.is_recurring);
    }

    #[test]
    fn enriched_report_partitions_by_status() {
        let mut report = EnrichedReport::from_analysis(AnalysisReport {
            connector_id: "c".into(),
            issues: vec![
                Issue::new(IssueKind::Other, Severity::Low, "a".into(), "".into()),
                Issue::new(IssueKind::Other, Severity::Low, "b".into(), "".into()),
                Issue::new(IssueKind::Other, Severity::Low, "c".into(), "".into()),
            ],
            conversations_analyzed: 3,
            summary: String::new(),
            created_at: Utc::now(),
            token_usage: TokenUsage::default(),
        });
        report.issues[1].set_status(IssueStatus::Recurring);
        report.issues[2].set_status(IssueStatus::AlreadyResolved);

        assert_eq!(report.new_issues().len(), 1);
        assert_eq!(report.recurring_issues().len(), 1);
        assert_eq!(report.resolved_issues().len(), 1);
    }

    #[test]
    fn lenient_parses_fold_unknowns() {
        assert_eq!(IssueKind::parse("weird"), IssueKind::Other);
        assert_eq!(Severity::parse("weird"), Severity::Medium);
        assert!(IssueStatus::parse("weird").is_none());
    }
}
