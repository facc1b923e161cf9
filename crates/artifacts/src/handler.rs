use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use rv_domain::error::{Error, Result};
use rv_storage::resolutions::{Operation, ResolutionAction};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings parsed from an artifact definition's `## Settings` section.
#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub enabled: bool,
    pub output_path: String,
    pub scope: String,
    pub extra: BTreeMap<String, Value>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_path: String::new(),
            scope: "global".into(),
            extra: BTreeMap::new(),
        }
    }
}

/// A file produced (or updated) by a handler.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    pub validation_errors: Vec<String>,
}

/// What the resolution agent must put in an action's `content` map.
#[derive(Debug, Clone, Default)]
pub struct ContentSchema {
    /// field name → description
    pub required_fields: BTreeMap<String, String>,
    pub optional_fields: BTreeMap<String, String>,
    pub example: Value,
    pub hint: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A remediation artifact type.
///
/// Handlers own their output-path convention and file format; the
/// resolution stage only hands them validated content maps.
pub trait ArtifactHandler: Send + Sync {
    fn artifact_id(&self) -> &str;

    fn artifact_name(&self) -> &str;

    fn settings(&self) -> &ArtifactSettings;

    fn content_schema(&self) -> ContentSchema;

    /// Context text handed to the resolution agent: what this type is
    /// for, its file format, and its validation rules.
    fn agent_context(&self) -> String;

    fn create(&self, name: &str, content: &Map<String, Value>) -> Result<Artifact>;

    fn update(&self, path: &Path, content: &Map<String, Value>) -> Result<Artifact>;

    fn append(&self, path: &Path, content: &Map<String, Value>) -> Result<Artifact> {
        self.update(path, content)
    }

    /// Validate generated file content. Returns `(is_valid, errors)`.
    fn validate(&self, artifact: &Artifact) -> (bool, Vec<String>);

    /// Apply a resolution action by dispatching on its operation.
    fn apply_action(&self, action: &ResolutionAction) -> Result<Artifact> {
        let target = expand_home(&action.target);
        match action.operation {
            Operation::Create => {
                let name = target
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        Error::Storage(format!("no artifact name in target '{}'", action.target))
                    })?;
                self.create(&name, &action.content)
            }
            Operation::Update => self.update(&target, &action.content),
            Operation::Append => self.append(&target, &action.content),
        }
    }
}

pub(crate) fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Shared helper: pull a string field from a content map.
pub(crate) fn content_str<'a>(content: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    content.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
