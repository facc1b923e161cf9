use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[default]
    Bedrock,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// Which backend drives the agents.
    #[serde(default)]
    pub default: ProviderKind,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub bedrock: BedrockConfig,
}

/// Direct Anthropic Messages API backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Environment variable holding the API key.
    #[serde(default = "d_anthropic_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_anthropic_model")]
    pub model: String,
    #[serde(default = "d_anthropic_base_url")]
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_env: d_anthropic_key_env(),
            model: d_anthropic_model(),
            base_url: d_anthropic_base_url(),
        }
    }
}

/// AWS Bedrock gateway backend (bearer-token HTTP access).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockConfig {
    #[serde(default = "d_bedrock_region")]
    pub region: String,
    #[serde(default = "d_bedrock_model")]
    pub model: String,
    /// Environment variable holding the Bedrock API bearer token.
    #[serde(default = "d_bedrock_token_env")]
    pub token_env: String,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: d_bedrock_region(),
            model: d_bedrock_model(),
            token_env: d_bedrock_token_env(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn d_anthropic_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_anthropic_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_bedrock_region() -> String {
    "us-east-1".into()
}
fn d_bedrock_model() -> String {
    "us.anthropic.claude-sonnet-4-5-20250929-v1:0".into()
}
fn d_bedrock_token_env() -> String {
    "AWS_BEARER_TOKEN_BEDROCK".into()
}
