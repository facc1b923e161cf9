//! Shared domain types for the Reverie reflection service.
//!
//! Everything the other crates agree on lives here: the error type, the
//! YAML configuration, the provider-agnostic LLM message/tool types, and
//! the idempotent observability init.

pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
