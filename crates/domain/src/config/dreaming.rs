use serde::{Deserialize, Serialize};

/// Knobs for the three-stage reflection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamingConfig {
    /// How many recent resolutions Stage B loads for lexical comparison.
    #[serde(default = "d_7")]
    pub historical_lookback: usize,
    /// Days to look back on the very first run of a connector.
    #[serde(default = "d_7i")]
    pub initial_lookback_days: i64,
    #[serde(default = "d_detection_turns")]
    pub detection_max_turns: u32,
    #[serde(default = "d_comparison_turns")]
    pub comparison_max_turns: u32,
    #[serde(default = "d_resolution_turns")]
    pub resolution_max_turns: u32,
    /// Run LLM judges over every finalized action. Off by default:
    /// each judge adds one completion per action.
    #[serde(default)]
    pub judges_enabled: bool,
}

impl Default for DreamingConfig {
    fn default() -> Self {
        Self {
            historical_lookback: 7,
            initial_lookback_days: 7,
            detection_max_turns: d_detection_turns(),
            comparison_max_turns: d_comparison_turns(),
            resolution_max_turns: d_resolution_turns(),
            judges_enabled: false,
        }
    }
}

fn d_7() -> usize {
    7
}
fn d_7i() -> i64 {
    7
}
fn d_detection_turns() -> u32 {
    30
}
fn d_comparison_turns() -> u32 {
    40
}
fn d_resolution_turns() -> u32 {
    20
}
