//! Preferences artifact handler.
//!
//! A single CLAUDE.md of `## Section` blocks with `- item` bullets.
//! Merging is additive and idempotent: existing sections keep their
//! order, new items are appended only when not already present (string
//! equality), and unknown sections are appended at the end. Hard cap:
//! 1000 lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use rv_domain::error::Result;

use crate::definition::ArtifactDefinition;
use crate::handler::{expand_home, Artifact, ArtifactHandler, ArtifactSettings, ContentSchema};

const MAX_LINES: usize = 1000;
const HEADER: &str = "# Project Preferences";

pub struct PreferencesHandler {
    definition: ArtifactDefinition,
}

impl PreferencesHandler {
    pub fn new(definition: ArtifactDefinition) -> Self {
        Self { definition }
    }

    fn output_path(&self) -> PathBuf {
        let settings = &self.definition.settings;
        if !settings.output_path.is_empty() {
            return expand_home(&settings.output_path);
        }
        PathBuf::from("CLAUDE.md")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Section model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered `section → lines` buckets parsed from an existing file.
type Sections = Vec<(String, Vec<String>)>;

fn parse_existing_sections(content: &str) -> Sections {
    let mut sections: Sections = Vec::new();
    let mut current = "General".to_string();
    let mut items: Vec<String> = Vec::new();

    for line in content.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if !items.is_empty() {
                sections.push((current, std::mem::take(&mut items)));
            }
            current = title.trim().to_string();
        } else if !line.trim().is_empty() && !line.starts_with("# ") {
            items.push(line.to_string());
        }
    }
    if !items.is_empty() {
        sections.push((current, items));
    }
    sections
}

/// Project an action content map into `section → items` buckets.
///
/// Accepts a `preferences` list (of `{section, items}` objects or bare
/// strings) plus arbitrary section-keyed values; `name`/`description`
/// are handler bookkeeping, not content.
fn sections_from_content(content: &Map<String, Value>) -> Sections {
    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut push = |buckets: &mut BTreeMap<String, Vec<String>>,
                    order: &mut Vec<String>,
                    section: &str,
                    item: String| {
        if !buckets.contains_key(section) {
            order.push(section.to_string());
        }
        buckets.entry(section.to_string()).or_default().push(item);
    };

    if let Some(prefs) = content.get("preferences").and_then(Value::as_array) {
        for pref in prefs {
            match pref {
                Value::Object(obj) => {
                    let section = obj
                        .get("section")
                        .and_then(Value::as_str)
                        .unwrap_or("General");
                    if let Some(items) = obj.get("items").and_then(Value::as_array) {
                        for item in items.iter().filter_map(Value::as_str) {
                            push(&mut buckets, &mut order, section, format!("- {item}"));
                        }
                    }
                }
                Value::String(s) => push(&mut buckets, &mut order, "General", format!("- {s}")),
                _ => {}
            }
        }
    }

    for (key, value) in content {
        if matches!(key.as_str(), "preferences" | "name" | "description") {
            continue;
        }
        let section = title_case(key);
        match value {
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_str) {
                    push(&mut buckets, &mut order, &section, format!("- {item}"));
                }
            }
            Value::String(s) => push(&mut buckets, &mut order, &section, s.clone()),
            _ => {}
        }
    }

    order
        .into_iter()
        .map(|section| {
            let items = buckets.remove(&section).unwrap_or_default();
            (section, items)
        })
        .collect()
}

/// Merge new buckets into existing ones: new items only when absent,
/// order preserved, new sections appended.
fn merge_sections(existing: Sections, new: Sections) -> Sections {
    let mut merged = existing;
    for (section, items) in new {
        if let Some((_, bucket)) = merged.iter_mut().find(|(name, _)| *name == section) {
            for item in items {
                if !bucket.contains(&item) {
                    bucket.push(item);
                }
            }
        } else {
            merged.push((section, items));
        }
    }
    merged
}

fn render(sections: &Sections) -> String {
    let mut lines = vec![HEADER.to_string(), String::new()];
    for (section, items) in sections {
        if items.is_empty() {
            continue;
        }
        lines.push(format!("## {section}"));
        lines.extend(items.iter().cloned());
        lines.push(String::new());
    }
    let mut out = lines.join("\n");
    out = out.trim_end().to_string();
    out.push('\n');
    out
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ArtifactHandler for PreferencesHandler {
    fn artifact_id(&self) -> &str {
        "preferences"
    }

    fn artifact_name(&self) -> &str {
        "Preferences"
    }

    fn settings(&self) -> &ArtifactSettings {
        &self.definition.settings
    }

    fn content_schema(&self) -> ContentSchema {
        if let Some(ref schema) = self.definition.content_schema {
            return schema.clone();
        }
        let required: BTreeMap<String, String> = [(
            "preferences".to_string(),
            "list - Preference entries: strings, or {section, items} objects".to_string(),
        )]
        .into_iter()
        .collect();

        ContentSchema {
            required_fields: required,
            optional_fields: BTreeMap::new(),
            example: serde_json::json!({
                "preferences": [
                    {"section": "Testing", "items": ["Always run tests before committing"]},
                    "Prefer early returns",
                ],
            }),
            hint: "For preferences, content holds a 'preferences' list (strings or \
                   {section, items} objects) and/or arbitrary section-keyed lists. Items \
                   merge into the existing file without duplication."
                .into(),
        }
    }

    fn agent_context(&self) -> String {
        let mut context = self.definition.render_agent_context("preferences");
        context.push_str(
            "\n## When to Use Preferences vs Skills\n\
             \n\
             Use preferences for STYLE and BEHAVIOR:\n\
             - \"Always use type hints\" -> preference\n\
             - \"Prefer early returns\" -> preference\n\
             \n\
             Use skills for PROCEDURES and TASKS:\n\
             - \"When deploying, do X then Y then Z\" -> skill\n\
             - \"To debug, first collect logs, then analyze\" -> skill\n",
        );
        context
    }

    fn create(&self, name: &str, content: &Map<String, Value>) -> Result<Artifact> {
        let path = self.output_path();
        if path.exists() {
            // A preferences file is a single document; creating over an
            // existing one merges instead of clobbering.
            return self.update(&path, content);
        }

        let body = render(&sections_from_content(content));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, &body)?;
        tracing::info!(path = %path.display(), "preferences written");

        let mut artifact = Artifact {
            name: if name.is_empty() { "CLAUDE.md".into() } else { name.to_string() },
            path,
            content: body,
            validation_errors: Vec::new(),
        };
        let (_, errors) = self.validate(&artifact);
        artifact.validation_errors = errors;
        Ok(artifact)
    }

    fn update(&self, path: &Path, content: &Map<String, Value>) -> Result<Artifact> {
        if !path.exists() {
            return self.create("CLAUDE.md", content);
        }

        let existing_text = std::fs::read_to_string(path)?;
        let merged = merge_sections(
            parse_existing_sections(&existing_text),
            sections_from_content(content),
        );
        let body = render(&merged);
        std::fs::write(path, &body)?;

        Ok(Artifact {
            name: "CLAUDE.md".into(),
            path: path.to_path_buf(),
            content: body,
            validation_errors: Vec::new(),
        })
    }

    fn validate(&self, artifact: &Artifact) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        let content = &artifact.content;

        if content.trim().is_empty() {
            errors.push("Preferences file is empty".into());
        }
        if !content.contains("## ") && !content.contains("# ") {
            errors.push("Missing section headers - preferences should be organized".into());
        }
        let line_count = content.lines().count();
        if line_count > MAX_LINES {
            errors.push(format!("Content too long ({line_count} lines, max {MAX_LINES})"));
        }
        if !content.contains("- ") {
            errors.push("Preferences should be specific and actionable (use list items)".into());
        }

        (errors.is_empty(), errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(path: &Path) -> PreferencesHandler {
        let mut definition = ArtifactDefinition::default();
        definition.settings.output_path = path.display().to_string();
        PreferencesHandler::new(definition)
    }

    fn prefs_content() -> Map<String, Value> {
        serde_json::from_value(serde_json::json!({
            "preferences": [
                {"section": "Testing", "items": ["Always run tests before committing"]},
                "Prefer early returns",
            ],
            "code_style": ["Use explicit error types"],
        }))
        .unwrap()
    }

    #[test]
    fn create_renders_sections_and_bullets() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("CLAUDE.md");
        let artifact = handler(&target).create("CLAUDE.md", &prefs_content()).unwrap();

        assert!(artifact.validation_errors.is_empty());
        let body = std::fs::read_to_string(&target).unwrap();
        assert!(body.starts_with("# Project Preferences"));
        assert!(body.contains("## Testing\n- Always run tests before committing"));
        assert!(body.contains("## General\n- Prefer early returns"));
        assert!(body.contains("## Code Style\n- Use explicit error types"));
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("CLAUDE.md");
        let h = handler(&target);

        h.create("CLAUDE.md", &prefs_content()).unwrap();
        let once = std::fs::read_to_string(&target).unwrap();
        h.update(&target, &prefs_content()).unwrap();
        let twice = std::fs::read_to_string(&target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_preserves_existing_items_and_appends_new_sections() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("CLAUDE.md");
        std::fs::write(
            &target,
            "# Project Preferences\n\n## Testing\n- Keep fixtures small\n",
        )
        .unwrap();

        let h = handler(&target);
        h.update(&target, &prefs_content()).unwrap();
        let body = std::fs::read_to_string(&target).unwrap();

        // Existing item first, new item appended to the same section.
        let testing_pos = body.find("- Keep fixtures small").unwrap();
        let new_pos = body.find("- Always run tests before committing").unwrap();
        assert!(testing_pos < new_pos);
        assert!(body.contains("## Code Style"));
    }

    #[test]
    fn validate_flags_missing_bullets() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(&dir.path().join("CLAUDE.md"));
        let artifact = Artifact {
            name: "CLAUDE.md".into(),
            path: dir.path().join("CLAUDE.md"),
            content: "# Project Preferences\n\nsome prose\n".into(),
            validation_errors: Vec::new(),
        };
        let (ok, errors) = h.validate(&artifact);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("list items")));
    }

    #[test]
    fn title_case_converts_snake_keys() {
        assert_eq!(title_case("code_style"), "Code Style");
        assert_eq!(title_case("general"), "General");
    }
}
