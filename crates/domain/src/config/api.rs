use serde::{Deserialize, Serialize};

/// Bind settings for the local control surface (external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: d_host(),
            port: d_port(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    7777
}
