//! The three-stage reflection pipeline.
//!
//! Detection (per-project agents over a read-only conversation store) →
//! filter & compare (one agent cross-referencing history) → resolution
//! (draft, validate, persist remediation artifacts). The
//! [`orchestrator::DreamingOrchestrator`] wires the stages together
//! with event streaming, token accounting, and incremental-progress
//! bookkeeping.

pub mod compare;
pub mod detect;
pub mod events;
pub mod judges;
pub mod merger;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod resolve;
pub mod similarity;
pub mod tools;

pub use events::{AgentEvent, AgentEventStream, EventKind};
pub use orchestrator::{DreamingOrchestrator, DreamingResult, DreamingStatistics};
pub use report::{
    AnalysisReport, EnrichedIssue, EnrichedReport, Evidence, HistoricalLink, Issue, IssueKind,
    IssueStatus, Severity,
};
