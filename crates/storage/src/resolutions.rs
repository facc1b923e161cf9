//! Resolution records and their file-backed store.
//!
//! One JSON file per resolution, named `YYYY-MM-DD-<short-id>.json`
//! where the short id is the first 8 characters of the record id.
//! Dry-run records go to a sibling directory and never show up in
//! `list_recent`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rv_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Append,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Append => "append",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "append" => Some(Operation::Append),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// Pointer back to a conversation that motivated an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationReference {
    pub session_id: String,
    #[serde(default)]
    pub working_directory: String,
}

/// A single remediation action within a resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub operation: Operation,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub issue_refs: Vec<String>,
    #[serde(default)]
    pub references: Vec<ConversationReference>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub local_change: bool,
}

/// Actions grouped per connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorResolution {
    pub connector_id: String,
    #[serde(default)]
    pub actions: Vec<ResolutionAction>,
}

/// A complete resolution record: one per completed cycle per connector.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub resolutions: Vec<ConnectorResolution>,
    pub metadata: Map<String, Value>,
}

impl Resolution {
    pub fn new(run_id: impl Into<String>, resolutions: Vec<ConnectorResolution>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            run_id: run_id.into(),
            resolutions,
            metadata: Map::new(),
        }
    }

    pub fn action_count(&self) -> usize {
        self.resolutions.iter().map(|cr| cr.actions.len()).sum()
    }

    /// Serialize to the on-disk document shape: record identity fields
    /// flattened into a `metadata` object alongside any extra metadata.
    pub fn to_value(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("id".into(), Value::String(self.id.clone()));
        metadata.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        metadata.insert("dreaming_run_id".into(), Value::String(self.run_id.clone()));
        for (key, value) in &self.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        serde_json::json!({
            "metadata": metadata,
            "resolutions": self.resolutions,
        })
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let metadata = value
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let id = metadata
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let created_at = metadata
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let run_id = metadata
            .get("dreaming_run_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let extra: Map<String, Value> = metadata
            .into_iter()
            .filter(|(k, _)| !matches!(k.as_str(), "id" | "created_at" | "dreaming_run_id"))
            .collect();

        let resolutions: Vec<ConnectorResolution> = value
            .get("resolutions")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            id,
            created_at,
            run_id,
            resolutions,
            metadata: extra,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ResolutionStore {
    resolutions_dir: PathBuf,
    dry_runs_dir: PathBuf,
}

impl ResolutionStore {
    pub fn new(runtime_dir: &Path) -> Result<Self> {
        let resolutions_dir = runtime_dir.join("resolutions");
        let dry_runs_dir = runtime_dir.join("dry-runs");
        std::fs::create_dir_all(&resolutions_dir)?;
        std::fs::create_dir_all(&dry_runs_dir)?;
        Ok(Self {
            resolutions_dir,
            dry_runs_dir,
        })
    }

    fn filename(resolution: &Resolution) -> String {
        let date = resolution.created_at.format("%Y-%m-%d");
        let short_id: String = resolution.id.chars().take(8).collect();
        format!("{date}-{short_id}.json")
    }

    /// Save a resolution. Dry-run records land in the sibling dry-runs
    /// directory, invisible to history queries.
    pub fn save(&self, resolution: &Resolution, dry_run: bool) -> Result<PathBuf> {
        let dir = if dry_run {
            &self.dry_runs_dir
        } else {
            &self.resolutions_dir
        };
        let path = dir.join(Self::filename(resolution));
        let body = serde_json::to_string_pretty(&resolution.to_value())?;
        write_atomic(&path, body.as_bytes())?;
        tracing::info!(path = %path.display(), actions = resolution.action_count(), "resolution saved");
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Resolution> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        Resolution::from_value(&value)
    }

    /// Load by full or partial (prefix) id.
    pub fn load_by_id(&self, resolution_id: &str) -> Option<Resolution> {
        let short: String = resolution_id.chars().take(8).collect();
        let suffix = format!("-{short}.json");
        let entries = std::fs::read_dir(&self.resolutions_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&suffix) {
                continue;
            }
            if let Ok(resolution) = self.load(&entry.path()) {
                if resolution.id == resolution_id || resolution.id.starts_with(resolution_id) {
                    return Some(resolution);
                }
            }
        }
        None
    }

    /// Most recent resolutions, newest first. Corrupt files are skipped.
    pub fn list_recent(&self, limit: usize) -> Vec<Resolution> {
        let mut names: Vec<PathBuf> = match std::fs::read_dir(&self.resolutions_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect(),
            Err(_) => return Vec::new(),
        };
        // Date-prefixed filenames sort chronologically.
        names.sort();
        names.reverse();

        names
            .into_iter()
            .take(limit)
            .filter_map(|path| self.load(&path).ok())
            .collect()
    }

    pub fn list_by_date_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<Resolution> {
        let mut results: Vec<Resolution> = self
            .list_recent(usize::MAX)
            .into_iter()
            .filter(|r| start.map_or(true, |s| r.created_at >= s))
            .filter(|r| end.map_or(true, |e| r.created_at <= e))
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results
    }

    /// All actions that targeted a specific path, across recent history.
    pub fn actions_for_target(&self, target: &str) -> Vec<ResolutionAction> {
        self.list_recent(100)
            .into_iter()
            .flat_map(|r| r.resolutions)
            .flat_map(|cr| cr.actions)
            .filter(|a| a.target == target)
            .collect()
    }
}

/// Write-temp-fsync-rename so observers never see a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("no parent directory for {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Storage(format!("persisting {}: {}", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resolution() -> Resolution {
        let mut content = Map::new();
        content.insert("name".into(), Value::String("Run Tests".into()));
        content.insert(
            "instructions".into(),
            Value::String("Run the suite before committing".into()),
        );
        Resolution::new(
            "run-123",
            vec![ConnectorResolution {
                connector_id: "claude-code".into(),
                actions: vec![ResolutionAction {
                    kind: "skills".into(),
                    target: "/tmp/skills/run-tests".into(),
                    operation: Operation::Create,
                    content,
                    issue_refs: vec!["issue-1".into()],
                    references: vec![ConversationReference {
                        session_id: "sess-1".into(),
                        working_directory: "/Users/dev/app".into(),
                    }],
                    priority: Priority::High,
                    rationale: "Repeated request".into(),
                    local_change: false,
                }],
            }],
        )
    }

    #[test]
    fn filename_uses_date_and_short_id() {
        let resolution = sample_resolution();
        let name = ResolutionStore::filename(&resolution);
        let short: String = resolution.id.chars().take(8).collect();
        assert!(name.ends_with(&format!("-{short}.json")));
        assert_eq!(name.len(), "YYYY-MM-DD-".len() + 8 + ".json".len());
    }

    #[test]
    fn round_trip_preserves_every_action_field() {
        let original = sample_resolution();
        let value = original.to_value();
        let parsed = Resolution::from_value(&value).unwrap();

        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.run_id, "run-123");
        assert_eq!(
            parsed.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
        let action = &parsed.resolutions[0].actions[0];
        let orig = &original.resolutions[0].actions[0];
        assert_eq!(action.kind, orig.kind);
        assert_eq!(action.target, orig.target);
        assert_eq!(action.operation, orig.operation);
        assert_eq!(action.content, orig.content);
        assert_eq!(action.issue_refs, orig.issue_refs);
        assert_eq!(action.references, orig.references);
        assert_eq!(action.priority, orig.priority);
        assert_eq!(action.rationale, orig.rationale);
        assert_eq!(action.local_change, orig.local_change);
    }

    #[test]
    fn document_shape_matches_wire_format() {
        let value = sample_resolution().to_value();
        assert!(value["metadata"]["id"].is_string());
        assert!(value["metadata"]["created_at"].is_string());
        assert!(value["metadata"]["dreaming_run_id"].is_string());
        let action = &value["resolutions"][0]["actions"][0];
        assert_eq!(action["type"], "skills");
        assert_eq!(action["operation"], "create");
        assert_eq!(action["priority"], "high");
        assert_eq!(action["local_change"], false);
        assert_eq!(action["references"][0]["session_id"], "sess-1");
    }

    #[test]
    fn save_load_and_short_id_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResolutionStore::new(dir.path()).unwrap();
        let resolution = sample_resolution();
        let path = store.save(&resolution, false).unwrap();
        assert!(path.exists());

        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.id, resolution.id);

        let by_full = store.load_by_id(&resolution.id).unwrap();
        assert_eq!(by_full.id, resolution.id);
        let short: String = resolution.id.chars().take(8).collect();
        let by_prefix = store.load_by_id(&short).unwrap();
        assert_eq!(by_prefix.id, resolution.id);
        assert!(store.load_by_id("ffffffff").is_none());
    }

    #[test]
    fn dry_runs_never_appear_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResolutionStore::new(dir.path()).unwrap();
        store.save(&sample_resolution(), true).unwrap();
        assert!(store.list_recent(10).is_empty());

        store.save(&sample_resolution(), false).unwrap();
        assert_eq!(store.list_recent(10).len(), 1);
    }

    #[test]
    fn actions_for_target_filters_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResolutionStore::new(dir.path()).unwrap();
        let resolution = sample_resolution();
        store.save(&resolution, false).unwrap();

        let hits = store.actions_for_target("/tmp/skills/run-tests");
        assert_eq!(hits.len(), 1);
        assert!(store.actions_for_target("/elsewhere").is_empty());
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResolutionStore::new(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("resolutions").join("2024-01-01-deadbeef.json"),
            "{ not json",
        )
        .unwrap();
        store.save(&sample_resolution(), false).unwrap();
        assert_eq!(store.list_recent(10).len(), 1);
    }
}
