//! Processing-state store.
//!
//! One JSON document, whole-document rewrites, single writer (the
//! orchestrator). Tracks per-connector progress plus aggregate cycle
//! counters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use rv_domain::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectorState {
    #[serde(default)]
    pub last_processed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub conversations_processed: u64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DreamingState {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub last_run_id: Option<String>,
    #[serde(default)]
    pub issues_found_total: u64,
    #[serde(default)]
    pub resolutions_generated_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingState {
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorState>,
    #[serde(default)]
    pub dreaming: DreamingState,
    #[serde(default = "d_version")]
    pub version: u32,
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self {
            connectors: BTreeMap::new(),
            dreaming: DreamingState::default(),
            version: d_version(),
        }
    }
}

fn d_version() -> u32 {
    1
}

pub struct StateStore {
    path: PathBuf,
    state: Mutex<ProcessingState>,
}

impl StateStore {
    /// Load from `<runtime_dir>/state.json`; missing or corrupt files
    /// yield the default state.
    pub fn new(runtime_dir: &Path) -> Self {
        let path = runtime_dir.join("state.json");
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> ProcessingState {
        self.state.lock().clone()
    }

    pub fn connector_state(&self, connector_id: &str) -> ConnectorState {
        self.state
            .lock()
            .connectors
            .get(connector_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Update one connector's record and persist the whole document.
    pub fn update_connector_state(
        &self,
        connector_id: &str,
        last_processed: Option<DateTime<Utc>>,
        cursor: Option<String>,
        conversations_processed: u64,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            let entry = state.connectors.entry(connector_id.to_string()).or_default();
            if last_processed.is_some() {
                entry.last_processed = last_processed;
            }
            if cursor.is_some() {
                entry.cursor = cursor;
            }
            entry.conversations_processed += conversations_processed;
            entry.last_run = Some(Utc::now());
        }
        self.save()
    }

    /// Bump the aggregate counters after a completed cycle.
    pub fn update_dreaming_state(
        &self,
        run_id: &str,
        issues_found: u64,
        resolutions_generated: u64,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.dreaming.last_run = Some(Utc::now());
            state.dreaming.total_runs += 1;
            state.dreaming.last_run_id = Some(run_id.to_string());
            state.dreaming.issues_found_total += issues_found;
            state.dreaming.resolutions_generated_total += resolutions_generated;
        }
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&*self.state.lock())?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = store.snapshot();
        assert_eq!(state.version, 1);
        assert!(state.connectors.is_empty());
        assert_eq!(state.dreaming.total_runs, 0);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), "{{{{").unwrap();
        let store = StateStore::new(dir.path());
        assert_eq!(store.snapshot().version, 1);
    }

    #[test]
    fn connector_updates_accumulate_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let ts = Utc::now();

        store
            .update_connector_state("claude-code", Some(ts), None, 3)
            .unwrap();
        store
            .update_connector_state("claude-code", None, Some("cursor-1".into()), 2)
            .unwrap();

        let reloaded = StateStore::new(dir.path());
        let state = reloaded.connector_state("claude-code");
        assert_eq!(state.conversations_processed, 5);
        assert_eq!(state.cursor.as_deref(), Some("cursor-1"));
        assert_eq!(
            state.last_processed.unwrap().timestamp_millis(),
            ts.timestamp_millis()
        );
        assert!(state.last_run.is_some());
    }

    #[test]
    fn dreaming_totals_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.update_dreaming_state("run-1", 4, 2).unwrap();
        store.update_dreaming_state("run-2", 1, 0).unwrap();

        let state = store.snapshot().dreaming;
        assert_eq!(state.total_runs, 2);
        assert_eq!(state.last_run_id.as_deref(), Some("run-2"));
        assert_eq!(state.issues_found_total, 5);
        assert_eq!(state.resolutions_generated_total, 2);
    }
}
