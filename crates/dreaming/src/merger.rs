//! Per-agent report merging and issue deduplication.
//!
//! Issues cluster when they share a kind AND their titles or
//! descriptions are similar at or above the threshold. A cluster
//! collapses into its first member, keeping the union of evidence
//! (deduplicated by session), the highest severity observed, and the
//! mean confidence.

use std::collections::BTreeSet;

use serde_json::Value;

use rv_domain::llm::TokenUsage;

use crate::report::{AnalysisReport, Issue};
use crate::similarity::text_similarity;

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub similarity_threshold: f64,
    pub combine_evidence: bool,
    pub prefer_higher_severity: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            combine_evidence: true,
            prefer_higher_severity: true,
        }
    }
}

pub struct ReportMerger {
    config: MergeConfig,
}

impl Default for ReportMerger {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

impl ReportMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge several per-agent reports into one.
    pub fn merge_reports(&self, reports: Vec<AnalysisReport>) -> AnalysisReport {
        if reports.is_empty() {
            return AnalysisReport::empty("merged", "");
        }
        if reports.len() == 1 {
            return reports.into_iter().next().expect("length checked");
        }

        let connector_ids: BTreeSet<String> =
            reports.iter().map(|r| r.connector_id.clone()).collect();
        let connector_id = if connector_ids.len() == 1 {
            connector_ids.into_iter().next().expect("length checked")
        } else {
            "merged".to_string()
        };

        let total_conversations: usize = reports.iter().map(|r| r.conversations_analyzed).sum();
        let token_usage = reports
            .iter()
            .fold(TokenUsage::default(), |acc, r| acc + r.token_usage);
        let report_count = reports.len();

        let all_issues: Vec<Issue> = reports.into_iter().flat_map(|r| r.issues).collect();
        let merged_issues = self.deduplicate_issues(all_issues);

        AnalysisReport {
            connector_id,
            summary: format!(
                "Merged {} reports with {} unique issues",
                report_count,
                merged_issues.len()
            ),
            issues: merged_issues,
            conversations_analyzed: total_conversations,
            created_at: chrono::Utc::now(),
            token_usage,
        }
    }

    pub fn deduplicate_issues(&self, issues: Vec<Issue>) -> Vec<Issue> {
        let mut groups: Vec<Vec<Issue>> = Vec::new();

        for issue in issues {
            let target = groups
                .iter_mut()
                .find(|group| self.are_similar(&issue, &group[0]));
            match target {
                Some(group) => group.push(issue),
                None => groups.push(vec![issue]),
            }
        }

        groups
            .into_iter()
            .map(|group| self.merge_group(group))
            .collect()
    }

    fn are_similar(&self, a: &Issue, b: &Issue) -> bool {
        if a.kind != b.kind {
            return false;
        }
        text_similarity(&a.title, &b.title) >= self.config.similarity_threshold
            || text_similarity(&a.description, &b.description) >= self.config.similarity_threshold
    }

    fn merge_group(&self, group: Vec<Issue>) -> Issue {
        if group.len() == 1 {
            return group.into_iter().next().expect("length checked");
        }

        let merged_from: Vec<Value> = group
            .iter()
            .map(|i| Value::String(i.id.clone()))
            .collect();
        let avg_confidence =
            group.iter().map(|i| i.confidence).sum::<f64>() / group.len() as f64;
        let highest_severity = group.iter().map(|i| i.severity).max().expect("non-empty");
        let group_len = group.len();

        let mut iter = group.into_iter();
        let mut base = iter.next().expect("non-empty");

        if self.config.combine_evidence {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut combined = Vec::new();
            for ev in std::mem::take(&mut base.evidence) {
                if seen.insert(ev.session_id.clone()) {
                    combined.push(ev);
                }
            }
            for issue in iter.by_ref() {
                for ev in issue.evidence {
                    if seen.insert(ev.session_id.clone()) {
                        combined.push(ev);
                    }
                }
            }
            base.evidence = combined;
        }

        if self.config.prefer_higher_severity {
            base.severity = highest_severity;
        }
        base.confidence = avg_confidence;
        base.metadata
            .insert("merged_count".into(), Value::from(group_len));
        base.metadata
            .insert("merged_from".into(), Value::Array(merged_from));
        base
    }
}

/// Merge with the default configuration.
pub fn merge_analysis_reports(reports: Vec<AnalysisReport>) -> AnalysisReport {
    ReportMerger::default().merge_reports(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Evidence, IssueKind, Severity};

    fn issue(kind: IssueKind, title: &str, severity: Severity, confidence: f64) -> Issue {
        let mut i = Issue::new(kind, severity, title.into(), format!("description of {title}"));
        i.confidence = confidence;
        i
    }

    fn with_evidence(mut i: Issue, sessions: &[&str]) -> Issue {
        for s in sessions {
            i.evidence.push(Evidence {
                session_id: s.to_string(),
                message_index: Some(0),
                quote: String::new(),
                context: String::new(),
                working_directory: String::new(),
            });
        }
        i
    }

    #[test]
    fn similar_titles_same_kind_merge() {
        let merger = ReportMerger::default();
        let a = issue(IssueKind::RepeatedRequest, "Run tests before commit", Severity::Medium, 0.8);
        let b = issue(IssueKind::RepeatedRequest, "Run tests before commits", Severity::High, 0.6);
        let merged = merger.deduplicate_issues(vec![a.clone(), b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, a.id);
        // Highest severity wins, confidence is the arithmetic mean.
        assert_eq!(merged[0].severity, Severity::High);
        assert!((merged[0].confidence - 0.7).abs() < 1e-12);
        assert_eq!(merged[0].metadata["merged_count"], 2);
    }

    #[test]
    fn different_kinds_never_merge() {
        let merger = ReportMerger::default();
        let a = issue(IssueKind::RepeatedRequest, "Same title", Severity::Low, 0.5);
        let b = issue(IssueKind::FrustrationSignal, "Same title", Severity::Low, 0.5);
        assert_eq!(merger.deduplicate_issues(vec![a, b]).len(), 2);
    }

    #[test]
    fn threshold_is_inclusive_at_exactly_0_7() {
        let merger = ReportMerger::default();
        // Identical description forces a merge regardless of titles;
        // here we verify the exact-threshold path through titles whose
        // similarity is exactly 0.7: "aaaaaaa" vs "aaaaaaabbbbbb"
        // (lcs 7, lengths 7+13 → 14/20 = 0.7).
        let mut a = issue(IssueKind::Other, "aaaaaaa", Severity::Low, 0.5);
        let mut b = issue(IssueKind::Other, "aaaaaaabbbbbb", Severity::Low, 0.5);
        a.description = "one thing".into();
        b.description = "entirely different words".into();
        assert!((text_similarity(&a.title, &b.title) - 0.7).abs() < 1e-12);
        assert_eq!(merger.deduplicate_issues(vec![a, b]).len(), 1);

        // Just below threshold: "aaaaaaa" vs "aaaaaaabbbbbbb"
        // (lcs 7, lengths 7+14 → 14/21 ≈ 0.667) stays separate.
        let mut c = issue(IssueKind::Other, "aaaaaaa", Severity::Low, 0.5);
        let mut d = issue(IssueKind::Other, "aaaaaaabbbbbbb", Severity::Low, 0.5);
        c.description = "one thing".into();
        d.description = "entirely different words".into();
        assert!(text_similarity(&c.title, &d.title) < 0.7);
        assert_eq!(ReportMerger::default().deduplicate_issues(vec![c, d]).len(), 2);
    }

    #[test]
    fn evidence_unions_by_session_id() {
        let merger = ReportMerger::default();
        let a = with_evidence(
            issue(IssueKind::RepeatedRequest, "Run tests", Severity::Low, 0.5),
            &["s1", "s2"],
        );
        let b = with_evidence(
            issue(IssueKind::RepeatedRequest, "Run tests", Severity::Low, 0.5),
            &["s2", "s3"],
        );
        let merged = merger.deduplicate_issues(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let sessions: Vec<&str> = merged[0]
            .evidence
            .iter()
            .map(|e| e.session_id.as_str())
            .collect();
        assert_eq!(sessions, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn merge_reports_sums_counts_and_usage() {
        let mut r1 = AnalysisReport::empty("claude-code", "");
        r1.conversations_analyzed = 2;
        r1.token_usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
            ..Default::default()
        };
        r1.issues.push(issue(IssueKind::Other, "one", Severity::Low, 0.5));

        let mut r2 = AnalysisReport::empty("claude-code", "");
        r2.conversations_analyzed = 3;
        r2.token_usage = TokenUsage {
            input_tokens: 50,
            output_tokens: 5,
            ..Default::default()
        };

        let merged = merge_analysis_reports(vec![r1, r2]);
        assert_eq!(merged.connector_id, "claude-code");
        assert_eq!(merged.conversations_analyzed, 5);
        assert_eq!(merged.token_usage.input_tokens, 150);
        assert_eq!(merged.issues.len(), 1);
    }
}
