use serde::{Deserialize, Serialize};

/// Semantic-recall backend settings (Redis index + embeddings endpoint).
///
/// Disabled by default: the pipeline falls back to lexical comparison
/// when no vector backend is configured or reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_redis_url")]
    pub redis_url: String,
    /// OpenAI-compatible embeddings endpoint base URL.
    #[serde(default = "d_embeddings_endpoint")]
    pub embeddings_endpoint: String,
    #[serde(default = "d_embeddings_model")]
    pub embeddings_model: String,
    /// Environment variable holding the embeddings API key (optional).
    #[serde(default)]
    pub embeddings_api_key_env: Option<String>,
    #[serde(default = "d_dimension")]
    pub dimension: usize,
    /// Similarity floor: results scoring below this are dropped.
    #[serde(default = "d_min_score")]
    pub min_score: f64,
    /// Only recall resolutions older than this many days, keeping the
    /// current lookback window out of its own results.
    #[serde(default = "d_min_age_days")]
    pub min_age_days: i64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: d_redis_url(),
            embeddings_endpoint: d_embeddings_endpoint(),
            embeddings_model: d_embeddings_model(),
            embeddings_api_key_env: None,
            dimension: d_dimension(),
            min_score: d_min_score(),
            min_age_days: d_min_age_days(),
        }
    }
}

fn d_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn d_embeddings_endpoint() -> String {
    "http://localhost:11434/v1".into()
}
fn d_embeddings_model() -> String {
    "all-minilm".into()
}
fn d_dimension() -> usize {
    384
}
fn d_min_score() -> f64 {
    0.5
}
fn d_min_age_days() -> i64 {
    7
}
