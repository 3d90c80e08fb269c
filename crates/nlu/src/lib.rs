//! NLU adapter for the dialogue orchestrator
//!
//! Wraps an external intent classifier behind the `NluBackend` trait. The
//! adapter applies the inner timeout, maps the raw wire response into ranked
//! `NluOutcome` candidates, and fills in display names and priorities from
//! the active-intent hints the caller passes. The knowledge-base fallback
//! client lives here too: both are out-of-process language collaborators.

pub mod adapter;
pub mod backend;
pub mod knowledge;

pub use adapter::{IntentHint, NluAdapter};
pub use backend::{HttpNluBackend, KeywordNluBackend, NluBackend, RawEntity, RawIntent, RawNluResponse};
pub use knowledge::{HttpKnowledgeBase, KnowledgeBase};

use thiserror::Error;

/// NLU-side errors
#[derive(Error, Debug)]
pub enum NluError {
    #[error("NLU backend unavailable: {0}")]
    Unavailable(String),

    #[error("NLU call timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid NLU response: {0}")]
    InvalidResponse(String),

    #[error("Knowledge base error: {0}")]
    Knowledge(String),
}
