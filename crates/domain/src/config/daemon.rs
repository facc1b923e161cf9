use serde::{Deserialize, Serialize};

/// Settings consumed by the daemon supervisor (external collaborator):
/// poll cadence, cycle cadence, log level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "d_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "d_dream_interval")]
    pub dream_interval_secs: u64,
    #[serde(default = "d_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: d_poll_interval(),
            dream_interval_secs: d_dream_interval(),
            log_level: d_log_level(),
        }
    }
}

fn d_poll_interval() -> u64 {
    60
}
fn d_dream_interval() -> u64 {
    3600
}
fn d_log_level() -> String {
    "info".into()
}
