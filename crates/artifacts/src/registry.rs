//! Type-indexed registry of artifact handler constructors.
//!
//! An artifact type is enabled by the presence of its definition file
//! at `<runtime>/artifacts/<id>.md`. When that directory is missing
//! entirely (fresh install), the built-in types are assumed enabled
//! with default settings.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rv_domain::error::{Error, Result};

use crate::definition::ArtifactDefinition;
use crate::handler::ArtifactHandler;
use crate::preferences::PreferencesHandler;
use crate::skills::SkillsHandler;

type Constructor = fn(ArtifactDefinition) -> Arc<dyn ArtifactHandler>;

pub struct ArtifactRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ArtifactRegistry {
    pub fn builtin() -> Self {
        let mut constructors: BTreeMap<String, Constructor> = BTreeMap::new();
        constructors.insert("skills".into(), |def| Arc::new(SkillsHandler::new(def)));
        // Legacy alias kept for definition files named after the type.
        constructors.insert("skill".into(), |def| Arc::new(SkillsHandler::new(def)));
        constructors.insert("preferences".into(), |def| {
            Arc::new(PreferencesHandler::new(def))
        });
        Self { constructors }
    }

    pub fn register(&mut self, id: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(id.into(), constructor);
    }

    pub fn available(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Build a handler, loading its definition file when present.
    pub fn create(&self, artifact_id: &str, runtime_dir: &Path) -> Result<Arc<dyn ArtifactHandler>> {
        let constructor = self.constructors.get(artifact_id).ok_or_else(|| {
            Error::Config(format!(
                "unknown artifact type '{}', available: {:?}",
                artifact_id,
                self.available()
            ))
        })?;

        let definition_path = runtime_dir.join("artifacts").join(format!("{artifact_id}.md"));
        let definition = if definition_path.exists() {
            ArtifactDefinition::load(&definition_path)?
        } else {
            ArtifactDefinition::default()
        };
        Ok(constructor(definition))
    }

    /// Enabled artifact ids for a runtime dir: definition-file stems
    /// that are registered and enabled, or the built-ins when no
    /// artifacts directory exists.
    pub fn enabled_ids(&self, runtime_dir: &Path) -> Vec<String> {
        let artifacts_dir = runtime_dir.join("artifacts");
        if !artifacts_dir.is_dir() {
            return vec!["skills".into(), "preferences".into()];
        }

        let mut ids = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&artifacts_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                    continue;
                };
                if !self.constructors.contains_key(&id) {
                    tracing::warn!(artifact = %id, "definition file for unknown artifact type");
                    continue;
                }
                match self.create(&id, runtime_dir) {
                    Ok(handler) if handler.settings().enabled => ids.push(id),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(artifact = %id, error = %e, "skipping artifact type"),
                }
            }
        }
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_assumed_without_artifacts_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::builtin();
        let ids = registry.enabled_ids(dir.path());
        assert_eq!(ids, vec!["preferences".to_string(), "skills".to_string()]);
    }

    #[test]
    fn definition_files_control_enablement() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(
            artifacts.join("skills.md"),
            "# Skills\n\n## Settings\n- enabled: true\n- output_path: /tmp/sk\n",
        )
        .unwrap();
        std::fs::write(
            artifacts.join("preferences.md"),
            "# Preferences\n\n## Settings\n- enabled: false\n",
        )
        .unwrap();
        std::fs::write(artifacts.join("unknown-type.md"), "# Unknown\n").unwrap();

        let registry = ArtifactRegistry::builtin();
        assert_eq!(registry.enabled_ids(dir.path()), vec!["skills".to_string()]);

        let handler = registry.create("skills", dir.path()).unwrap();
        assert_eq!(handler.settings().output_path, "/tmp/sk");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::builtin();
        assert!(registry.create("nope", dir.path()).is_err());
    }
}
