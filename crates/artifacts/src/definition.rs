//! Markdown artifact definitions.
//!
//! Each artifact type may carry a definition file at
//! `<runtime>/artifacts/<id>.md` refining its settings and documenting
//! it for the resolution agent. Recognized sections: `## Description`,
//! `## Settings` (bullet list), `## Validation Rules` (bullet list),
//! `## File Format`, `## For Resolution Agent`, and `## Content Schema`
//! holding a YAML code block with required/optional fields, an example,
//! and a hint.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde_json::Value;

use rv_domain::error::{Error, Result};

use crate::handler::{ArtifactSettings, ContentSchema};

#[derive(Debug, Clone, Default)]
pub struct ArtifactDefinition {
    pub description: String,
    pub settings: ArtifactSettings,
    pub validation_rules: Vec<String>,
    pub file_format: String,
    pub agent_context: String,
    pub content_schema: Option<ContentSchema>,
}

impl ArtifactDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "artifact definition not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let sections = split_sections(content);
        let mut definition = ArtifactDefinition::default();

        if let Some(desc) = sections.get("Description") {
            definition.description = desc.trim().lines().next().unwrap_or("").to_string();
        }
        if let Some(settings) = sections.get("Settings") {
            definition.settings = parse_settings(settings);
        }
        if let Some(rules) = sections.get("Validation Rules") {
            definition.validation_rules = parse_bullets(rules);
        }
        if let Some(format) = sections.get("File Format") {
            definition.file_format = format.trim().to_string();
        }
        if let Some(context) = sections.get("For Resolution Agent") {
            definition.agent_context = context.trim().to_string();
        }
        if let Some(schema) = sections.get("Content Schema") {
            definition.content_schema = parse_content_schema(schema);
        }

        definition
    }

    /// Render the context block handed to the resolution agent.
    pub fn render_agent_context(&self, artifact_id: &str) -> String {
        let mut out = format!("Artifact Type: {artifact_id}\n");
        if !self.agent_context.is_empty() {
            out.push_str(&format!("\n{}\n", self.agent_context));
        }
        if !self.file_format.is_empty() {
            out.push_str(&format!("\nFile Format:\n{}\n", self.file_format));
        }
        if !self.validation_rules.is_empty() {
            out.push_str("\nValidation Rules:\n");
            for rule in &self.validation_rules {
                out.push_str(&format!("- {rule}\n"));
            }
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Section parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split a Markdown document on `## ` headers.
pub fn split_sections(content: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in content.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if let Some(section) = current.take() {
                sections.insert(section, buffer.join("\n"));
            }
            current = Some(title.trim().to_string());
            buffer.clear();
        } else {
            buffer.push(line);
        }
    }
    if let Some(section) = current {
        sections.insert(section, buffer.join("\n"));
    }
    sections
}

fn parse_bullets(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(str::to_string)
        .collect()
}

fn parse_settings(content: &str) -> ArtifactSettings {
    let mut settings = ArtifactSettings::default();
    let re = Regex::new(r"^-\s+(\w+):\s*(.+)$").expect("static regex");

    for line in content.lines() {
        let Some(caps) = re.captures(line.trim_end()) else {
            continue;
        };
        let key = caps[1].trim();
        let value = caps[2].trim();
        match key {
            "enabled" => settings.enabled = value.eq_ignore_ascii_case("true"),
            "output_path" => settings.output_path = value.to_string(),
            "scope" => settings.scope = value.to_string(),
            other => {
                settings.extra.insert(other.to_string(), parse_scalar(value));
            }
        }
    }
    settings
}

fn parse_scalar(value: &str) -> Value {
    if value.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = value.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(value.to_string())
}

fn parse_content_schema(content: &str) -> Option<ContentSchema> {
    let re = Regex::new(r"(?s)```ya?ml\s*\n(.+?)```").expect("static regex");
    let yaml = re.captures(content)?.get(1)?.as_str();
    let data: serde_yaml::Value = serde_yaml::from_str(yaml).ok()?;

    let fields_of = |key: &str| -> BTreeMap<String, String> {
        data.get(key)
            .and_then(|v| v.as_mapping())
            .map(|mapping| {
                mapping
                    .iter()
                    .filter_map(|(k, v)| {
                        Some((k.as_str()?.to_string(), v.as_str().unwrap_or("").to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let example = data
        .get("example")
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Object(Default::default()));
    let hint = data
        .get("hint")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Some(ContentSchema {
        required_fields: fields_of("required_fields"),
        optional_fields: fields_of("optional_fields"),
        example,
        hint,
    })
}
