//! LLM judges for finalized resolution actions.
//!
//! Each judge is a plain async function issuing one small JSON-only
//! completion and returning a structured verdict. Responses are parsed
//! with code-fence stripping and score clamping; any failure degrades
//! to an error-shaped value, never an abort.

use serde_json::Value;

use rv_domain::error::Result;
use rv_domain::llm::{AgentMessage, AgentRunConfig};
use rv_providers::ChatBackend;

const MAX_INPUT_CHARS: usize = 8000;

fn judge_config(max_tokens: u32) -> AgentRunConfig {
    AgentRunConfig {
        model: None,
        system_prompt: String::new(),
        max_turns: 1,
        temperature: Some(0.0),
        max_tokens,
    }
}

async fn call_judge(backend: &dyn ChatBackend, prompt: &str, max_tokens: u32) -> Result<String> {
    let turn = backend
        .complete(
            &[AgentMessage::user(prompt)],
            &judge_config(max_tokens),
            &[],
        )
        .await?;
    Ok(turn.message.content.unwrap_or_default())
}

fn truncated(content: &str, max: usize) -> String {
    if content.chars().count() > max {
        let cut: String = content.chars().take(max).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}

/// Parse a JSON object out of a judge reply, stripping Markdown code
/// fences. Falls back to `default` when nothing parses, or when the
/// reply parses to something other than an object.
pub(crate) fn parse_judge_json(text: &str, default: Value) -> Value {
    let mut body = text.trim();
    if let Some(stripped) = body.strip_prefix("```json") {
        body = stripped;
    } else if let Some(stripped) = body.strip_prefix("```") {
        body = stripped;
    }
    if let Some(stripped) = body.strip_suffix("```") {
        body = stripped;
    }
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(value) if value.is_object() => value,
        _ => default,
    }
}

fn clamp_score(value: &mut Value, key: &str) -> f64 {
    let score = value
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    value[key] = serde_json::json!(score);
    score
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Judges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan content for PII and secrets.
pub async fn detect_pii(backend: &dyn ChatBackend, content: &str) -> Result<Value> {
    let default = serde_json::json!({
        "has_pii": false, "pii_types": [], "severity": "low", "explanation": "Error",
    });
    if content.trim().is_empty() {
        let mut v = default;
        v["explanation"] = Value::String("Empty content".into());
        return Ok(v);
    }

    let prompt = format!(
        "Analyze for PII/secrets:\n---\n{}\n---\n\
         Check for: API keys, passwords, emails, phones, addresses, SSN, credit cards, \
         connection strings.\n\
         Severity: high (secrets, SSN), medium (contact info), low (uncertain).\n\
         Respond ONLY with JSON: {{\"has_pii\": bool, \"pii_types\": [], \
         \"severity\": \"low|medium|high\", \"explanation\": \"...\"}}",
        truncated(content, MAX_INPUT_CHARS),
    );
    let reply = call_judge(backend, &prompt, 500).await?;
    let mut result = parse_judge_json(&reply, default);
    if !matches!(
        result.get("severity").and_then(Value::as_str),
        Some("low" | "medium" | "high")
    ) {
        result["severity"] = Value::String("low".into());
    }
    Ok(result)
}

/// Score whether a resolution is worth keeping at all.
pub async fn judge_significance(
    backend: &dyn ChatBackend,
    resolution_description: &str,
    issue_description: &str,
    evidence: &str,
) -> Result<Value> {
    let default = serde_json::json!({
        "is_significant": false, "significance_score": 0.0, "rationale": "Error",
    });
    if resolution_description.trim().is_empty() {
        let mut v = default;
        v["rationale"] = Value::String("No resolution provided".into());
        return Ok(v);
    }

    let prompt = format!(
        "Evaluate resolution significance:\n\
         ISSUE: {}\n\
         RESOLUTION: {}\n\
         EVIDENCE: {}\n\
         Score 0-1: 0-0.3 trivial, 0.4-0.6 moderate, 0.7-0.85 significant, \
         0.86-1.0 highly significant.\n\
         Respond ONLY with JSON: {{\"is_significant\": bool, \
         \"significance_score\": 0.0-1.0, \"rationale\": \"...\"}}",
        truncated(issue_description, 3000),
        truncated(resolution_description, 3000),
        if evidence.is_empty() { "None".to_string() } else { truncated(evidence, 2000) },
    );
    let reply = call_judge(backend, &prompt, 500).await?;
    let mut result = parse_judge_json(&reply, default);
    let score = clamp_score(&mut result, "significance_score");
    result["is_significant"] = Value::Bool(score >= 0.5);
    Ok(result)
}

/// Check whether the resolution actually addresses the issue.
pub async fn judge_applicability(
    backend: &dyn ChatBackend,
    issue_title: &str,
    issue_description: &str,
    resolution_content: &Value,
) -> Result<Value> {
    let default = serde_json::json!({
        "is_applicable": false, "coverage_score": 0.0, "gaps": [], "rationale": "Error",
    });
    if issue_title.is_empty() && issue_description.is_empty() {
        let mut v = default;
        v["rationale"] = Value::String("No issue provided".into());
        return Ok(v);
    }

    let prompt = format!(
        "Evaluate if the resolution addresses the issue:\n\
         ISSUE: {issue_title} - {}\n\
         RESOLUTION: {}\n\
         Score 0-1 coverage, list gaps.\n\
         Respond ONLY with JSON: {{\"is_applicable\": bool, \"coverage_score\": 0.0-1.0, \
         \"gaps\": [], \"rationale\": \"...\"}}",
        truncated(issue_description, 2000),
        truncated(&resolution_content.to_string(), 4000),
    );
    let reply = call_judge(backend, &prompt, 600).await?;
    let mut result = parse_judge_json(&reply, default);
    let score = clamp_score(&mut result, "coverage_score");
    result["is_applicable"] = Value::Bool(score >= 0.5);
    if !result.get("gaps").map(Value::is_array).unwrap_or(false) {
        result["gaps"] = Value::Array(Vec::new());
    }
    Ok(result)
}

/// Decide whether a change belongs to one project or the user globally.
pub async fn judge_local_vs_global(
    backend: &dyn ChatBackend,
    issue_description: &str,
    resolution_description: &str,
    working_directory: &str,
) -> Result<Value> {
    let default = serde_json::json!({
        "should_be_local": false, "confidence": 0.5, "rationale": "Error",
    });
    if issue_description.is_empty() && resolution_description.is_empty() {
        let mut v = default;
        v["rationale"] = Value::String("Insufficient info".into());
        return Ok(v);
    }

    let prompt = format!(
        "Determine if LOCAL (project-specific) or GLOBAL (universal):\n\
         ISSUE: {}\n\
         RESOLUTION: {}\n\
         PATH: {}\n\
         LOCAL: project tech stack, specific files, project conventions.\n\
         GLOBAL: universal preferences, general best practices, AI behavior.\n\
         Respond ONLY with JSON: {{\"should_be_local\": bool, \"confidence\": 0.0-1.0, \
         \"rationale\": \"...\"}}",
        truncated(issue_description, 2500),
        truncated(resolution_description, 2500),
        if working_directory.is_empty() { "Not specified" } else { working_directory },
    );
    let reply = call_judge(backend, &prompt, 400).await?;
    let mut result = parse_judge_json(&reply, default);
    clamp_score(&mut result, "confidence");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_domain::llm::{TokenUsage, ToolDefinition};
    use rv_providers::ChatTurn;

    struct FixedBackend(String);

    #[async_trait::async_trait]
    impl ChatBackend for FixedBackend {
        async fn complete(
            &self,
            _messages: &[AgentMessage],
            _config: &AgentRunConfig,
            _tools: &[ToolDefinition],
        ) -> Result<ChatTurn> {
            Ok(ChatTurn {
                message: AgentMessage::assistant(self.0.clone()),
                usage: TokenUsage::default(),
                stop_reason: Some("end_turn".into()),
            })
        }

        fn provider_id(&self) -> &str {
            "fixed"
        }

        fn default_model(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn judge_json_strips_code_fences() {
        let parsed = parse_judge_json(
            "```json\n{\"has_pii\": true}\n```",
            serde_json::json!({}),
        );
        assert_eq!(parsed["has_pii"], true);

        let bare = parse_judge_json("{\"x\": 1}", serde_json::json!({}));
        assert_eq!(bare["x"], 1);

        let garbage = parse_judge_json("not json", serde_json::json!({"fallback": true}));
        assert_eq!(garbage["fallback"], true);

        // Non-object JSON falls back too.
        let array = parse_judge_json("[1, 2, 3]", serde_json::json!({"fallback": true}));
        assert_eq!(array["fallback"], true);
    }

    #[tokio::test]
    async fn significance_clamps_and_derives_flag() {
        let backend = FixedBackend(
            r#"{"is_significant": false, "significance_score": 1.7, "rationale": "big"}"#.into(),
        );
        let verdict = judge_significance(&backend, "resolution", "issue", "")
            .await
            .unwrap();
        assert_eq!(verdict["significance_score"], 1.0);
        assert_eq!(verdict["is_significant"], true);
    }

    #[tokio::test]
    async fn applicability_threshold_is_half() {
        let backend =
            FixedBackend(r#"{"coverage_score": 0.4, "gaps": "not-a-list"}"#.into());
        let verdict = judge_applicability(&backend, "t", "d", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(verdict["is_applicable"], false);
        assert!(verdict["gaps"].is_array());
    }

    #[tokio::test]
    async fn pii_normalizes_severity() {
        let backend = FixedBackend(r#"{"has_pii": true, "severity": "catastrophic"}"#.into());
        let verdict = detect_pii(&backend, "some content").await.unwrap();
        assert_eq!(verdict["severity"], "low");

        let empty = detect_pii(&backend, "  ").await.unwrap();
        assert_eq!(empty["explanation"], "Empty content");
    }

    #[tokio::test]
    async fn local_vs_global_clamps_confidence() {
        let backend =
            FixedBackend(r#"{"should_be_local": true, "confidence": -2.0}"#.into());
        let verdict = judge_local_vs_global(&backend, "issue", "resolution", "/p")
            .await
            .unwrap();
        assert_eq!(verdict["confidence"], 0.0);
        assert_eq!(verdict["should_be_local"], true);
    }
}
