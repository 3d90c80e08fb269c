//! Text processing for the dialogue orchestrator
//!
//! Three concerns:
//! - `normalize`: converting raw extracted slot strings into the canonical
//!   form required by the slot's type (the data-transformer half of the slot
//!   subsystem — the engine forbids type conversions anywhere else)
//! - `extract`: heuristic pattern-based slot extraction over raw input, used
//!   when the NLU returns no entity for a slot and for slot-supplement turns
//! - `similarity`: string similarity primitives shared by the choice parser

pub mod extract;
pub mod normalize;
pub mod similarity;

pub use extract::{bare_value_candidate, extract_slots, ExtractedSlot};
pub use normalize::{normalize_value, Normalized};
pub use similarity::{jaccard, keyword_match, ratio, tokenize};
