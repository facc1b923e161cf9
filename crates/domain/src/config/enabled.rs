use serde::{Deserialize, Serialize};

/// Which pluggable components run in a cycle.
///
/// Artifact types are not listed here: a type is enabled by the
/// presence of its definition file under `<runtime>/artifacts/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledComponents {
    #[serde(default = "d_connectors")]
    pub connectors: Vec<String>,
    /// Prompt modules appended to the detection system prompt.
    #[serde(default = "d_prompts")]
    pub prompts: Vec<String>,
}

impl Default for EnabledComponents {
    fn default() -> Self {
        Self {
            connectors: d_connectors(),
            prompts: d_prompts(),
        }
    }
}

fn d_connectors() -> Vec<String> {
    vec!["claude-code".into()]
}
fn d_prompts() -> Vec<String> {
    vec!["pattern-detection".into(), "frustration-signals".into()]
}
