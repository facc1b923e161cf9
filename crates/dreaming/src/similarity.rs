//! Lexical similarity scoring.
//!
//! Text similarity is the normalized longest-common-subsequence ratio
//! over lowercased characters (`2·lcs / (len_a + len_b)`). Issue-to-
//! history scoring combines title, description, and rationale
//! similarities with a bonus when the issue kind shows up in a past
//! issue reference.

use crate::report::{Issue, IssueStatus};

/// Score at or above which a past resolution means "already resolved".
pub const ALREADY_RESOLVED_THRESHOLD: f64 = 0.85;
/// Score at or above which the issue counts as recurring.
pub const RECURRING_THRESHOLD: f64 = 0.6;

/// Something a current issue can be scored against.
///
/// Past-action records project themselves onto this; anything with a
/// title, description, and rationale can be compared the same way.
pub trait Scorable {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    fn rationale(&self) -> &str;
    fn issue_refs(&self) -> &[String];
}

impl Scorable for rv_storage::ResolutionAction {
    fn title(&self) -> &str {
        self.content
            .get("title")
            .or_else(|| self.content.get("name"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }

    fn description(&self) -> &str {
        self.content
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }

    fn rationale(&self) -> &str {
        &self.rationale
    }

    fn issue_refs(&self) -> &[String] {
        &self.issue_refs
    }
}

/// Normalized LCS ratio in [0, 1]. Empty inputs score 0.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let lcs = lcs_len(&a, &b);
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Weighted similarity between a current issue and a past record:
/// 0.4·title + 0.3·description + 0.3·rationale, plus 0.2 when the
/// issue kind string appears in a past issue reference. Clamped to 1.
pub fn score_issue(issue: &Issue, past: &dyn Scorable) -> f64 {
    let mut score = 0.0;

    let title = past.title();
    if !title.is_empty() {
        score += 0.4 * text_similarity(&issue.title, title);
    }
    let description = past.description();
    if !description.is_empty() {
        score += 0.3 * text_similarity(&issue.description, description);
    }
    let rationale = past.rationale();
    if !rationale.is_empty() {
        score += 0.3 * text_similarity(&issue.description, rationale);
    }

    let kind = issue.kind.as_str();
    if past
        .issue_refs()
        .iter()
        .any(|r| r.to_lowercase().contains(kind))
    {
        score += 0.2;
    }

    score.min(1.0)
}

/// Status implied by a best-match score.
pub fn status_for_score(score: f64) -> IssueStatus {
    if score >= ALREADY_RESOLVED_THRESHOLD {
        IssueStatus::AlreadyResolved
    } else if score >= RECURRING_THRESHOLD {
        IssueStatus::Recurring
    } else {
        IssueStatus::New
    }
}

/// Recommendation string for a set of scored matches.
pub fn recommendation(best_score: Option<f64>) -> String {
    match best_score {
        None => "new - No similar historical resolutions found".into(),
        Some(score) if score >= ALREADY_RESOLVED_THRESHOLD => {
            "already_resolved - Very similar issue was previously resolved".into()
        }
        Some(score) if score >= RECURRING_THRESHOLD => {
            "recurring - Similar issue exists but may need updated resolution".into()
        }
        Some(_) => "new - Only weak matches found, consider this a new issue".into(),
    }
}
