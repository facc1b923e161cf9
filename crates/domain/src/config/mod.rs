mod api;
mod daemon;
mod dreaming;
mod enabled;
mod provider;
mod vector;

pub use api::*;
pub use daemon::*;
pub use dreaming::*;
pub use enabled::*;
pub use provider::*;
pub use vector::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dreaming: DreamingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub enabled: EnabledComponents,
}

/// Load configuration from `<runtime_dir>/config.yaml`.
///
/// A missing file yields the defaults; a malformed file is an error.
pub fn load_config(runtime_dir: &Path) -> Result<Config> {
    let path = runtime_dir.join("config.yaml");
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let config: Config = serde_yaml::from_str(&raw)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}
