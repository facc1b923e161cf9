//! Type-indexed registry of connector constructors.
//!
//! Each connector id maps to a constructor taking the runtime dir and
//! the settings parsed from `<runtime>/connectors/<id>.md` (defaults
//! when the definition file is absent). Disabled connectors are
//! skipped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rv_domain::error::{Error, Result};

use crate::claude_code::ClaudeCodeConnector;
use crate::definition::load_settings;
use crate::types::ConnectorSettings;
use crate::SourceConnector;

type Constructor = fn(&Path, ConnectorSettings) -> Arc<dyn SourceConnector>;

pub struct ConnectorRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ConnectorRegistry {
    /// Registry with the built-in connectors.
    pub fn builtin() -> Self {
        let mut constructors: BTreeMap<String, Constructor> = BTreeMap::new();
        constructors.insert("claude-code".into(), |runtime_dir, settings| {
            Arc::new(ClaudeCodeConnector::with_settings(runtime_dir, settings))
        });
        Self { constructors }
    }

    pub fn register(&mut self, id: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(id.into(), constructor);
    }

    pub fn available(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Create a connector, honoring its definition file when present.
    /// Returns `Ok(None)` for a connector disabled by its definition.
    pub fn create(
        &self,
        id: &str,
        runtime_dir: &Path,
    ) -> Result<Option<Arc<dyn SourceConnector>>> {
        let constructor = self.constructors.get(id).ok_or_else(|| {
            Error::Config(format!(
                "unknown connector '{}', available: {:?}",
                id,
                self.available()
            ))
        })?;

        let definition_path = runtime_dir.join("connectors").join(format!("{id}.md"));
        let settings = if definition_path.exists() {
            load_settings(&definition_path)?
        } else {
            ConnectorSettings::default()
        };
        if !settings.enabled {
            tracing::debug!(connector = %id, "connector disabled by definition");
            return Ok(None);
        }
        Ok(Some(constructor(runtime_dir, settings)))
    }

    /// Create every requested connector, skipping unknown or disabled
    /// ids with a warning so one bad config entry does not sink the
    /// cycle.
    pub fn create_all(&self, runtime_dir: &Path, ids: &[String]) -> Vec<Arc<dyn SourceConnector>> {
        let mut connectors = Vec::new();
        for id in ids {
            match self.create(id, runtime_dir) {
                Ok(Some(connector)) => connectors.push(connector),
                Ok(None) => {}
                Err(e) => tracing::warn!(connector = %id, error = %e, "skipping connector"),
            }
        }
        connectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_creates_claude_code() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectorRegistry::builtin();
        let connector = registry.create("claude-code", dir.path()).unwrap().unwrap();
        assert_eq!(connector.connector_id(), "claude-code");
    }

    #[test]
    fn definition_file_can_disable_a_connector() {
        let dir = tempfile::tempdir().unwrap();
        let connectors_dir = dir.path().join("connectors");
        std::fs::create_dir_all(&connectors_dir).unwrap();
        std::fs::write(
            connectors_dir.join("claude-code.md"),
            "# Claude Code\n\n## Settings\n- enabled: false\n",
        )
        .unwrap();

        let registry = ConnectorRegistry::builtin();
        assert!(registry.create("claude-code", dir.path()).unwrap().is_none());
        assert!(registry
            .create_all(dir.path(), &["claude-code".into()])
            .is_empty());
    }

    #[test]
    fn unknown_ids_are_skipped_in_create_all() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectorRegistry::builtin();
        let connectors =
            registry.create_all(dir.path(), &["claude-code".into(), "nonexistent".into()]);
        assert_eq!(connectors.len(), 1);
    }
}
