//! Structural validation of the persisted resolution document.
//!
//! Collects every problem instead of failing fast so the agent gets the
//! full list in one tool response.

use std::path::Path;

use serde_json::Value;

use rv_domain::error::Result;

const VALID_OPERATIONS: [&str; 3] = ["create", "update", "append"];
const VALID_PRIORITIES: [&str; 3] = ["low", "medium", "high"];

#[derive(Default)]
pub struct ResolutionValidator;

impl ResolutionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a resolution document. Returns `(is_valid, errors)`.
    pub fn validate(&self, data: &Value) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        self.check_structure(data, &mut errors);
        self.check_action_targets(data, &mut errors);
        self.check_issue_refs(data, &mut errors);
        self.check_content_requirements(data, &mut errors);
        (errors.is_empty(), errors)
    }

    pub fn validate_file(&self, path: &Path) -> Result<(bool, Vec<String>)> {
        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(data) => Ok(self.validate(&data)),
            Err(e) => Ok((false, vec![format!("Invalid JSON: {e}")])),
        }
    }

    fn check_structure(&self, data: &Value, errors: &mut Vec<String>) {
        let Some(obj) = data.as_object() else {
            errors.push("Resolution must be an object".into());
            return;
        };
        let Some(resolutions) = obj.get("resolutions") else {
            errors.push("Missing 'resolutions' field".into());
            return;
        };
        let Some(resolutions) = resolutions.as_array() else {
            errors.push("'resolutions' must be an array".into());
            return;
        };

        for (i, res) in resolutions.iter().enumerate() {
            let prefix = format!("resolutions[{i}]");
            let Some(res) = res.as_object() else {
                errors.push(format!("{prefix}: must be an object"));
                continue;
            };
            if !res.contains_key("connector_id") {
                errors.push(format!("{prefix}: missing 'connector_id'"));
            }
            let Some(actions) = res.get("actions") else {
                errors.push(format!("{prefix}: missing 'actions'"));
                continue;
            };
            let Some(actions) = actions.as_array() else {
                errors.push(format!("{prefix}.actions: must be an array"));
                continue;
            };

            for (j, action) in actions.iter().enumerate() {
                let action_prefix = format!("{prefix}.actions[{j}]");
                let Some(action) = action.as_object() else {
                    errors.push(format!("{action_prefix}: must be an object"));
                    continue;
                };
                for field in ["type", "target", "operation", "local_change"] {
                    if !action.contains_key(field) {
                        errors.push(format!("{action_prefix}: missing '{field}'"));
                    }
                }
                if let Some(op) = action.get("operation").and_then(Value::as_str) {
                    if !VALID_OPERATIONS.contains(&op) {
                        errors.push(format!(
                            "{action_prefix}.operation: must be one of {VALID_OPERATIONS:?}"
                        ));
                    }
                }
                if let Some(priority) = action.get("priority").and_then(Value::as_str) {
                    if !VALID_PRIORITIES.contains(&priority) {
                        errors.push(format!(
                            "{action_prefix}.priority: must be one of {VALID_PRIORITIES:?}"
                        ));
                    }
                }
                if let Some(local) = action.get("local_change") {
                    if !local.is_boolean() {
                        errors.push(format!("{action_prefix}.local_change: must be a boolean"));
                    }
                }
            }
        }
    }

    fn check_action_targets(&self, data: &Value, errors: &mut Vec<String>) {
        for (i, j, action) in actions_of(data) {
            let target = action.get("target").and_then(Value::as_str).unwrap_or("");
            if target.is_empty() {
                errors.push(format!("resolutions[{i}].actions[{j}].target: cannot be empty"));
                continue;
            }
            if target.contains("..") {
                errors.push(format!(
                    "resolutions[{i}].actions[{j}].target: path traversal not allowed"
                ));
            }
        }
    }

    fn check_issue_refs(&self, data: &Value, errors: &mut Vec<String>) {
        for (i, j, action) in actions_of(data) {
            let Some(refs) = action.get("issue_refs") else {
                continue;
            };
            let Some(refs) = refs.as_array() else {
                errors.push(format!(
                    "resolutions[{i}].actions[{j}].issue_refs: must be an array"
                ));
                continue;
            };
            for (k, r) in refs.iter().enumerate() {
                if !r.is_string() {
                    errors.push(format!(
                        "resolutions[{i}].actions[{j}].issue_refs[{k}]: must be a string"
                    ));
                }
            }
        }
    }

    fn check_content_requirements(&self, data: &Value, errors: &mut Vec<String>) {
        for (i, j, action) in actions_of(data) {
            let kind = action.get("type").and_then(Value::as_str).unwrap_or("");
            let operation = action
                .get("operation")
                .and_then(Value::as_str)
                .unwrap_or("create");
            let content = action
                .get("content")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            if matches!(kind, "skill" | "skills") && operation == "create" {
                if !content.get("name").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
                    errors.push(format!(
                        "resolutions[{i}].actions[{j}].content: skill 'create' requires 'name'"
                    ));
                }
                let has_instructions = content
                    .get("instructions")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                let has_description = content
                    .get("description")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if !has_instructions && !has_description {
                    errors.push(format!(
                        "resolutions[{i}].actions[{j}].content: skill 'create' requires \
                         'instructions' or 'description'"
                    ));
                }
            }
        }
    }
}

/// Iterate `(resolution_index, action_index, action)` over a document.
fn actions_of(data: &Value) -> Vec<(usize, usize, &serde_json::Map<String, Value>)> {
    let mut out = Vec::new();
    let Some(resolutions) = data.get("resolutions").and_then(Value::as_array) else {
        return out;
    };
    for (i, res) in resolutions.iter().enumerate() {
        let Some(actions) = res.get("actions").and_then(Value::as_array) else {
            continue;
        };
        for (j, action) in actions.iter().enumerate() {
            if let Some(action) = action.as_object() {
                out.push((i, j, action));
            }
        }
    }
    out
}
