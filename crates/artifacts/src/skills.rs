//! Skill artifact handler.
//!
//! Skills are procedural instruction sets stored one-per-directory as
//! `<skills_root>/<name>/SKILL.md`: YAML front-matter (name,
//! description, version, generated_by) followed by a Markdown body with
//! standardized sections. Only sections whose content is present are
//! written. Hard cap: 500 lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use rv_domain::error::Result;

use crate::definition::ArtifactDefinition;
use crate::handler::{
    content_str, expand_home, Artifact, ArtifactHandler, ArtifactSettings, ContentSchema,
};

const MAX_LINES: usize = 500;

pub struct SkillsHandler {
    definition: ArtifactDefinition,
}

impl SkillsHandler {
    pub fn new(definition: ArtifactDefinition) -> Self {
        Self { definition }
    }

    fn output_dir(&self) -> PathBuf {
        let settings = &self.definition.settings;
        if !settings.output_path.is_empty() {
            return expand_home(&settings.output_path);
        }
        if settings.scope == "global" {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude")
                .join("skills")
        } else {
            PathBuf::from(".claude").join("skills")
        }
    }

    fn generate(&self, name: &str, content: &Map<String, Value>) -> String {
        let display_name = content_str(content, "name").unwrap_or(name);
        let description = content_str(content, "description").unwrap_or("");

        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&format!("name: {display_name}\n"));
        out.push_str(&format!("description: {description}\n"));
        out.push_str("version: 1.0.0\n");
        out.push_str("generated_by: reverie\n");
        out.push_str("---\n\n");

        out.push_str(&format!("# {display_name}\n"));
        if !description.is_empty() {
            out.push_str(&format!("\n{description}\n"));
        }
        if let Some(when) = content_str(content, "when_to_use") {
            out.push_str(&format!("\n## When to Use\n{when}\n"));
        }
        if let Some(instructions) = content_str(content, "instructions") {
            out.push_str(&format!("\n## Instructions\n{instructions}\n"));
        }
        if let Some(examples) = content_str(content, "examples") {
            out.push_str(&format!("\n## Examples\n{examples}\n"));
        }
        out
    }
}

impl ArtifactHandler for SkillsHandler {
    fn artifact_id(&self) -> &str {
        "skills"
    }

    fn artifact_name(&self) -> &str {
        "Skills"
    }

    fn settings(&self) -> &ArtifactSettings {
        &self.definition.settings
    }

    fn content_schema(&self) -> ContentSchema {
        if let Some(ref schema) = self.definition.content_schema {
            return schema.clone();
        }
        let required: BTreeMap<String, String> = [
            ("name", "string - The skill name (used as directory name)"),
            ("description", "string - What this skill does"),
            (
                "instructions",
                "string - Step-by-step instructions for executing the skill",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let optional: BTreeMap<String, String> = [
            ("when_to_use", "string - Conditions when this skill should be invoked"),
            ("examples", "string - Example usages or scenarios"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        ContentSchema {
            required_fields: required,
            optional_fields: optional,
            example: serde_json::json!({
                "name": "run-tests",
                "description": "Run the project test suite with coverage",
                "instructions": "1. Activate the environment\n2. Run the suite\n3. Report failures",
                "when_to_use": "When the user asks to run tests or validate changes",
            }),
            hint: "For skills, content must be an object with 'name', 'description', and \
                   'instructions' as required fields. Skills define reusable, procedural \
                   instructions for specific tasks."
                .into(),
        }
    }

    fn agent_context(&self) -> String {
        self.definition.render_agent_context("skills")
    }

    fn create(&self, name: &str, content: &Map<String, Value>) -> Result<Artifact> {
        let skill_dir = self.output_dir().join(name);
        std::fs::create_dir_all(&skill_dir)?;

        let body = self.generate(name, content);
        let path = skill_dir.join("SKILL.md");
        std::fs::write(&path, &body)?;
        tracing::info!(path = %path.display(), "skill written");

        let mut artifact = Artifact {
            name: name.to_string(),
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
            let name = skill_name_from_path(path, content);
            return self.create(&name, content);
        }

        let name = skill_name_from_path(path, content);
        let body = self.generate(&name, content);
        std::fs::write(path, &body)?;

        Ok(Artifact {
            name,
            path: path.to_path_buf(),
            content: body,
            validation_errors: Vec::new(),
        })
    }

    fn append(&self, path: &Path, content: &Map<String, Value>) -> Result<Artifact> {
        if !path.exists() {
            let name = skill_name_from_path(path, content);
            return self.create(&name, content);
        }

        let existing = std::fs::read_to_string(path)?;
        let mut additions = String::new();
        if let Some(instructions) = content_str(content, "additional_instructions") {
            additions.push_str(&format!("\n## Additional Instructions\n{instructions}\n"));
        }
        if let Some(examples) = content_str(content, "additional_examples") {
            additions.push_str(&format!("\n## More Examples\n{examples}\n"));
        }

        let body = if additions.is_empty() {
            existing
        } else {
            let merged = format!("{}\n{additions}", existing.trim_end());
            std::fs::write(path, &merged)?;
            merged
        };

        Ok(Artifact {
            name: skill_name_from_path(path, content),
            path: path.to_path_buf(),
            content: body,
            validation_errors: Vec::new(),
        })
    }

    fn validate(&self, artifact: &Artifact) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        let content = &artifact.content;

        if !content.starts_with("---") {
            errors.push("Missing YAML frontmatter".into());
        } else {
            if !content.contains("name:") {
                errors.push("Missing 'name' in frontmatter".into());
            }
            if !content.contains("description:") {
                errors.push("Missing 'description' in frontmatter".into());
            }
        }

        if !content.contains("## When to Use") && !content.contains("## Instructions") {
            errors.push("Missing 'When to Use' or 'Instructions' section".into());
        }

        let line_count = content.lines().count();
        if line_count > MAX_LINES {
            errors.push(format!("Content too long ({line_count} lines, max {MAX_LINES})"));
        }

        (errors.is_empty(), errors)
    }
}

/// Skill directory name for an existing path: the parent directory for
/// `SKILL.md` targets, the file stem otherwise.
fn skill_name_from_path(path: &Path, content: &Map<String, Value>) -> String {
    if path.file_name().and_then(|n| n.to_str()) == Some("SKILL.md") {
        if let Some(parent) = path.parent().and_then(|p| p.file_name()) {
            return parent.to_string_lossy().to_string();
        }
    }
    content_str(content, "name")
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "skill".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(output: &Path) -> SkillsHandler {
        let mut definition = ArtifactDefinition::default();
        definition.settings.output_path = output.display().to_string();
        SkillsHandler::new(definition)
    }

    fn content(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn create_writes_frontmatter_and_sections() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let artifact = h
            .create(
                "run-tests-before-commit",
                &content(&[
                    ("name", "Run Tests Before Commit"),
                    ("description", "Always run the suite first"),
                    ("instructions", "1. Run tests\n2. Fix failures\n3. Commit"),
                    ("when_to_use", "Before any commit"),
                ]),
            )
            .unwrap();

        assert!(artifact.validation_errors.is_empty());
        assert_eq!(
            artifact.path,
            dir.path().join("run-tests-before-commit").join("SKILL.md")
        );
        let body = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(body.starts_with("---\nname: Run Tests Before Commit\n"));
        assert!(body.contains("generated_by: reverie"));
        assert!(body.contains("# Run Tests Before Commit"));
        assert!(body.contains("## When to Use"));
        assert!(body.contains("## Instructions"));
        // No examples were provided, so no Examples section.
        assert!(!body.contains("## Examples"));
    }

    #[test]
    fn update_replaces_and_append_adds_sections() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let created = h
            .create(
                "deploy",
                &content(&[("name", "Deploy"), ("description", "d"), ("instructions", "x")]),
            )
            .unwrap();

        let updated = h
            .update(
                &created.path,
                &content(&[("name", "Deploy"), ("description", "new"), ("instructions", "y")]),
            )
            .unwrap();
        assert!(updated.content.contains("description: new"));
        assert!(!updated.content.contains("instructions\nx"));

        let appended = h
            .append(
                &created.path,
                &content(&[("additional_instructions", "Also check logs")]),
            )
            .unwrap();
        assert!(appended.content.contains("## Additional Instructions"));
        assert!(appended.content.contains("Also check logs"));
    }

    #[test]
    fn validate_rejects_oversized_and_sectionless_content() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());

        let long_body = format!("---\nname: x\ndescription: y\n---\n{}", "line\n".repeat(600));
        let artifact = Artifact {
            name: "x".into(),
            path: dir.path().join("SKILL.md"),
            content: long_body,
            validation_errors: Vec::new(),
        };
        let (ok, errors) = h.validate(&artifact);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("too long")));
        assert!(errors.iter().any(|e| e.contains("When to Use")));

        let no_frontmatter = Artifact {
            name: "x".into(),
            path: dir.path().join("SKILL.md"),
            content: "# title\n## Instructions\ndo it\n".into(),
            validation_errors: Vec::new(),
        };
        let (ok, errors) = h.validate(&no_frontmatter);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("frontmatter")));
    }
}
