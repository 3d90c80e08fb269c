//! NLU outcome types
//!
//! The NLU adapter returns ranked intent candidates with confidences plus any
//! entity spans the classifier extracted. Candidate ordering is normative:
//! confidence descending, then intent priority descending, then name
//! ascending — the adapter applies it before anything downstream sees the
//! list.

use serde::{Deserialize, Serialize};

/// One ranked intent candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub name: String,
    pub display_name: String,
    pub confidence: f32,
    /// Intent priority from config; tie-break after confidence
    #[serde(default)]
    pub priority: i32,
}

impl IntentCandidate {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            confidence,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Entity span extracted alongside classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub name: String,
    pub value: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

/// Result of one NLU invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NluOutcome {
    /// Best candidate, absent when the classifier returned "unknown"
    pub top: Option<IntentCandidate>,
    /// Remaining candidates, already ordered
    #[serde(default)]
    pub alternatives: Vec<IntentCandidate>,
    #[serde(default)]
    pub entities: Vec<EntitySpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl NluOutcome {
    /// All candidates including the top one, in rank order.
    pub fn candidates(&self) -> Vec<IntentCandidate> {
        let mut out = Vec::with_capacity(1 + self.alternatives.len());
        if let Some(top) = &self.top {
            out.push(top.clone());
        }
        out.extend(self.alternatives.iter().cloned());
        out
    }

    pub fn is_unknown(&self) -> bool {
        self.top.is_none()
    }
}

/// Sort candidates by confidence desc, priority desc, name asc.
pub fn rank_candidates(candidates: &mut [IntentCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.priority.cmp(&a.priority))
            .then(a.name.cmp(&b.name))
    });
}
