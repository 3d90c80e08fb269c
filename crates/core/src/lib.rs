//! Core types for the dialogue orchestrator
//!
//! This crate provides foundational types used across all other crates:
//! - Turn vocabulary (status, response kind, next-action hints)
//! - NLU outcome types (ranked intent candidates, entity spans)
//! - Knowledge-base fallback types
//! - The slot wire format (the API-facing slot representation)
//! - Error types

pub mod error;
pub mod knowledge;
pub mod nlu_types;
pub mod slot_wire;
pub mod turn;

pub use error::{Error, Result};
pub use knowledge::KbAnswer;
pub use nlu_types::{EntitySpan, IntentCandidate, NluOutcome};
pub use slot_wire::SlotPayload;
pub use turn::{NextAction, ResponseKind, TurnRequest, TurnResult, TurnStatus};
