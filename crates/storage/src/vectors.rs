//! Semantic recall over past resolution actions.
//!
//! Each action is indexed as a Redis Search JSON document carrying its
//! metadata and a FLAT FLOAT32 COSINE embedding (384 dimensions by
//! default). Queries prefilter by age (and optionally connector) before
//! the KNN step, so the current lookback window never recalls itself.
//!
//! The whole backend is best-effort: the client connects lazily, every
//! failure is logged and degrades to "no results" / "stored nothing",
//! and the pipeline falls back to lexical comparison. Blocking Redis
//! commands run on the worker pool so the scheduler is never blocked.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use rv_domain::config::VectorConfig;
use rv_domain::error::{Error, Result};

use crate::resolutions::ResolutionAction;

const INDEX_NAME: &str = "idx:resolutions_vss";
const KEY_PREFIX: &str = "resolution:";

/// A recalled resolution action with its similarity score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VectorMatch {
    pub score: f64,
    pub resolution_id: String,
    pub connector_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub issue_refs: Vec<String>,
    pub local_change: bool,
    pub operation: String,
    pub created_at: String,
}

pub struct VectorStore {
    cfg: VectorConfig,
    http: reqwest::Client,
    client: Mutex<Option<redis::Client>>,
    index_ready: AtomicBool,
}

impl VectorStore {
    pub fn new(cfg: VectorConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
            client: Mutex::new(None),
            index_ready: AtomicBool::new(false),
        }
    }

    pub fn min_score(&self) -> f64 {
        self.cfg.min_score
    }

    /// Lazily opened Redis client, shared thereafter.
    fn client(&self) -> Result<redis::Client> {
        let mut guard = self.client.lock();
        if let Some(ref client) = *guard {
            return Ok(client.clone());
        }
        let client = redis::Client::open(self.cfg.redis_url.as_str())
            .map_err(|e| Error::Storage(format!("redis client: {e}")))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn ensure_index(&self) -> Result<()> {
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let client = self.client()?;
        let dimension = self.cfg.dimension;

        let created: Result<()> = tokio::task::spawn_blocking(move || {
            let mut con = client
                .get_connection()
                .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;

            let exists: std::result::Result<redis::Value, _> =
                redis::cmd("FT.INFO").arg(INDEX_NAME).query(&mut con);
            if exists.is_ok() {
                return Ok(());
            }

            redis::cmd("FT.CREATE")
                .arg(INDEX_NAME)
                .arg("ON").arg("JSON")
                .arg("PREFIX").arg(1).arg(KEY_PREFIX)
                .arg("SCHEMA")
                .arg("$.title").arg("AS").arg("title").arg("TEXT")
                .arg("$.description").arg("AS").arg("description").arg("TEXT")
                .arg("$.rationale").arg("AS").arg("rationale").arg("TEXT")
                .arg("$.resolution_id").arg("AS").arg("resolution_id").arg("TEXT").arg("NOSTEM")
                .arg("$.target").arg("AS").arg("target").arg("TEXT").arg("NOSTEM")
                .arg("$.operation").arg("AS").arg("operation").arg("TEXT").arg("NOSTEM")
                .arg("$.created_at").arg("AS").arg("created_at").arg("TEXT").arg("NOSTEM")
                .arg("$.type").arg("AS").arg("type").arg("TAG")
                .arg("$.connector_id").arg("AS").arg("connector_id").arg("TAG")
                .arg("$.local_change").arg("AS").arg("local_change").arg("TAG")
                .arg("$.created_at_ts").arg("AS").arg("created_at_ts").arg("NUMERIC")
                .arg("$.embedding").arg("AS").arg("vector")
                .arg("VECTOR").arg("FLAT").arg(6)
                .arg("TYPE").arg("FLOAT32")
                .arg("DIM").arg(dimension)
                .arg("DISTANCE_METRIC").arg("COSINE")
                .query::<()>(&mut con)
                .map_err(|e| Error::Storage(format!("FT.CREATE: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Storage(format!("join: {e}")))?;

        created?;
        self.index_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/embeddings",
            self.cfg.embeddings_endpoint.trim_end_matches('/')
        );
        let mut request = self.http.post(&url).json(&serde_json::json!({
            "model": self.cfg.embeddings_model,
            "input": text,
            "encoding_format": "float",
        }));
        if let Some(ref env) = self.cfg.embeddings_api_key_env {
            if let Ok(key) = std::env::var(env) {
                request = request.bearer_auth(key);
            }
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "embeddings endpoint returned {}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let embedding: Vec<f32> = body["data"][0]["embedding"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        if embedding.len() != self.cfg.dimension {
            return Err(Error::Storage(format!(
                "unexpected embedding dimension {} (expected {})",
                embedding.len(),
                self.cfg.dimension
            )));
        }
        Ok(embedding)
    }

    /// Index one resolution action. Returns whether it was stored;
    /// failures are logged, never raised.
    pub async fn store_action(
        &self,
        resolution_id: &str,
        connector_id: &str,
        action: &ResolutionAction,
        created_at: DateTime<Utc>,
    ) -> bool {
        match self
            .try_store_action(resolution_id, connector_id, action, created_at)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(resolution_id, error = %e, "vector store write failed");
                false
            }
        }
    }

    async fn try_store_action(
        &self,
        resolution_id: &str,
        connector_id: &str,
        action: &ResolutionAction,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_index().await?;

        let text = document_text(action);
        if text.trim().is_empty() {
            return Err(Error::Storage("empty document text".into()));
        }
        let embedding = self.embed(&text).await?;

        let content_str = |key: &str| {
            action
                .content
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let title = match content_str("title") {
            t if t.is_empty() => content_str("name"),
            t => t,
        };
        let doc = serde_json::json!({
            "resolution_id": resolution_id,
            "connector_id": connector_id,
            "type": action.kind,
            "target": action.target,
            "title": title,
            "description": content_str("description"),
            "rationale": action.rationale,
            "issue_refs": action.issue_refs,
            "local_change": action.local_change,
            "operation": action.operation.as_str(),
            "created_at": created_at.to_rfc3339(),
            "created_at_ts": created_at.timestamp(),
            "embedding": embedding,
        });

        let key = format!("{KEY_PREFIX}{resolution_id}:{}", action.target);
        let body = serde_json::to_string(&doc)?;
        let client = self.client()?;

        tokio::task::spawn_blocking(move || {
            let mut con = client
                .get_connection()
                .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;
            redis::cmd("JSON.SET")
                .arg(&key)
                .arg("$")
                .arg(&body)
                .query::<()>(&mut con)
                .map_err(|e| Error::Storage(format!("JSON.SET: {e}")))
        })
        .await
        .map_err(|e| Error::Storage(format!("join: {e}")))??;

        tracing::info!(resolution_id, "stored resolution action vector");
        Ok(())
    }

    /// KNN search with an age prefilter. Empty on any failure.
    pub async fn search_similar(
        &self,
        query_text: &str,
        k: usize,
        min_age_days: i64,
        connector_id: Option<&str>,
    ) -> Vec<VectorMatch> {
        match self
            .try_search(query_text, k, min_age_days, connector_id)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "vector search failed");
                Vec::new()
            }
        }
    }

    async fn try_search(
        &self,
        query_text: &str,
        k: usize,
        min_age_days: i64,
        connector_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_index().await?;
        let embedding = self.embed(query_text).await?;
        let query_bytes = f32s_to_bytes(&embedding);

        let cutoff_ts = (Utc::now() - Duration::days(min_age_days)).timestamp();
        let mut filter = format!("@created_at_ts:[-inf {cutoff_ts}]");
        if let Some(connector) = connector_id {
            filter.push_str(&format!(" @connector_id:{{{connector}}}"));
        }
        let query = format!("({filter})=>[KNN {k} @vector $query_vector AS vector_score]");

        let client = self.client()?;
        let reply: redis::Value = tokio::task::spawn_blocking(move || {
            let mut con = client
                .get_connection()
                .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;
            redis::cmd("FT.SEARCH")
                .arg(INDEX_NAME)
                .arg(&query)
                .arg("PARAMS").arg(2).arg("query_vector").arg(&query_bytes)
                .arg("SORTBY").arg("vector_score")
                .arg("DIALECT").arg(2)
                .query::<redis::Value>(&mut con)
                .map_err(|e| Error::Storage(format!("FT.SEARCH: {e}")))
        })
        .await
        .map_err(|e| Error::Storage(format!("join: {e}")))??;

        Ok(parse_search_reply(&reply, self.cfg.min_score))
    }

    /// Search with query text assembled from an issue's kind, title,
    /// and description.
    pub async fn search_by_issue(
        &self,
        kind: &str,
        title: &str,
        description: &str,
        k: usize,
        min_age_days: i64,
    ) -> Vec<VectorMatch> {
        let query = issue_query_text(kind, title, description);
        if query.trim().is_empty() {
            return Vec::new();
        }
        self.search_similar(&query, k, min_age_days, None).await
    }

    /// Index statistics, or an error-shaped document when unreachable.
    pub async fn stats(&self) -> Value {
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return serde_json::json!({ "error": e.to_string() }),
        };
        let info = tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>> {
            let mut con = client
                .get_connection()
                .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;
            let reply = redis::cmd("FT.INFO")
                .arg(INDEX_NAME)
                .query::<redis::Value>(&mut con)
                .map_err(|e| Error::Storage(format!("FT.INFO: {e}")))?;

            let mut pairs = Vec::new();
            if let redis::Value::Array(items) = reply {
                let mut i = 0;
                while i + 1 < items.len() {
                    if let (Some(key), Some(value)) =
                        (value_as_string(&items[i]), value_as_string(&items[i + 1]))
                    {
                        pairs.push((key, value));
                    }
                    i += 2;
                }
            }
            Ok(pairs)
        })
        .await;

        match info {
            Ok(Ok(pairs)) => {
                let field = |name: &str| {
                    pairs
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                serde_json::json!({
                    "index_name": INDEX_NAME,
                    "num_docs": field("num_docs"),
                    "indexing_failures": field("hash_indexing_failures"),
                })
            }
            Ok(Err(e)) => serde_json::json!({ "error": e.to_string() }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        }
    }

    /// Delete every indexed action of a resolution. Returns the count.
    pub async fn delete_resolution(&self, resolution_id: &str) -> usize {
        let pattern = format!("{KEY_PREFIX}{resolution_id}:*");
        let client = match self.client() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        let deleted = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut con = client
                .get_connection()
                .map_err(|e| Error::Storage(format!("redis connect: {e}")))?;
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(&pattern)
                .query(&mut con)
                .map_err(|e| Error::Storage(format!("KEYS: {e}")))?;
            if keys.is_empty() {
                return Ok(0);
            }
            let mut cmd = redis::cmd("DEL");
            for key in &keys {
                cmd.arg(key);
            }
            let n: usize = cmd
                .query(&mut con)
                .map_err(|e| Error::Storage(format!("DEL: {e}")))?;
            Ok(n)
        })
        .await;

        match deleted {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "vector delete failed");
                0
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector delete join failed");
                0
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Concatenated text an action is embedded under.
pub(crate) fn document_text(action: &ResolutionAction) -> String {
    let mut parts = Vec::new();
    if !action.kind.is_empty() {
        parts.push(format!("Type: {}", action.kind));
    }
    if !action.target.is_empty() {
        parts.push(format!("Target: {}", action.target));
    }
    if let Some(title) = action
        .content
        .get("title")
        .or_else(|| action.content.get("name"))
        .and_then(Value::as_str)
    {
        parts.push(format!("Title: {title}"));
    }
    if let Some(description) = action.content.get("description").and_then(Value::as_str) {
        parts.push(format!("Description: {description}"));
    }
    if !action.rationale.is_empty() {
        parts.push(format!("Rationale: {}", action.rationale));
    }
    if !action.issue_refs.is_empty() {
        parts.push(format!("Issues: {}", action.issue_refs.join(", ")));
    }
    parts.join("\n")
}

pub(crate) fn issue_query_text(kind: &str, title: &str, description: &str) -> String {
    let mut parts = Vec::new();
    if !kind.is_empty() {
        parts.push(format!("Type: {kind}"));
    }
    if !title.is_empty() {
        parts.push(format!("Title: {title}"));
    }
    if !description.is_empty() {
        parts.push(format!("Description: {description}"));
    }
    parts.join("\n")
}

pub(crate) fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn value_as_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(i) => Some(i.to_string()),
        redis::Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

/// Parse an `FT.SEARCH` reply: `[count, key1, fields1, key2, fields2,
/// ...]` where each fields array alternates name/value. The JSON
/// document rides under the `$` field; cosine distance under
/// `vector_score` is converted to similarity `1 − d` and floored.
pub(crate) fn parse_search_reply(reply: &redis::Value, min_score: f64) -> Vec<VectorMatch> {
    let redis::Value::Array(items) = reply else {
        return Vec::new();
    };
    let mut matches = Vec::new();

    // Skip the leading count, then step over (key, fields) pairs.
    let mut i = 1;
    while i + 1 < items.len() {
        let fields = &items[i + 1];
        i += 2;
        let redis::Value::Array(fields) = fields else {
            continue;
        };

        let mut distance: Option<f64> = None;
        let mut doc: Option<Value> = None;
        let mut j = 0;
        while j + 1 < fields.len() {
            let name = value_as_string(&fields[j]).unwrap_or_default();
            let raw = value_as_string(&fields[j + 1]).unwrap_or_default();
            match name.as_str() {
                "vector_score" => distance = raw.parse().ok(),
                "$" | "json" => doc = serde_json::from_str(&raw).ok(),
                _ => {}
            }
            j += 2;
        }

        let Some(doc) = doc else { continue };
        let score = 1.0 - distance.unwrap_or(1.0);
        if score < min_score {
            continue;
        }

        let str_of = |key: &str| {
            doc.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        matches.push(VectorMatch {
            score: (score * 1000.0).round() / 1000.0,
            resolution_id: str_of("resolution_id"),
            connector_id: str_of("connector_id"),
            kind: str_of("type"),
            target: str_of("target"),
            title: str_of("title"),
            description: str_of("description"),
            rationale: str_of("rationale"),
            issue_refs: doc
                .get("issue_refs")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            local_change: doc
                .get("local_change")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            operation: str_of("operation"),
            created_at: str_of("created_at"),
        });
    }

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches
}
