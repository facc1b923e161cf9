//! Conversation sources for the reflection pipeline.
//!
//! A connector enumerates and parses per-session logs into immutable
//! [`types::Conversation`] values. The only built-in source reads
//! Claude Code project session logs; new sources register through
//! [`registry::ConnectorRegistry`].

pub mod claude_code;
pub mod definition;
pub mod registry;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rv_domain::error::Result;

use types::ConversationBatch;

/// A source of conversations.
///
/// Implementations are read-only over their source material; the
/// last-processed timestamp is the only thing they persist, and it is
/// kept outside the main state store so the connector can recover
/// independently.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Stable identifier used in config and state (e.g. `claude-code`).
    fn connector_id(&self) -> &str;

    /// Human-readable name.
    fn connector_name(&self) -> &str;

    /// Extract conversations modified since `since`, newest first.
    ///
    /// `cursor` is an opaque continuation token (a file path here):
    /// results begin strictly after it. `limit` truncates the batch and
    /// sets `has_more` plus the next cursor.
    async fn extract_conversations(
        &self,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ConversationBatch>;

    async fn last_processed(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_processed(&self, timestamp: DateTime<Utc>) -> Result<()>;
}
