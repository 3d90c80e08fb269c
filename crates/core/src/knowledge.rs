//! Knowledge-base fallback types
//!
//! When classification yields no usable intent and no pending slot, ambiguity
//! or confirmation applies, the orchestrator queries an external knowledge
//! base. Only the answer contract lives here.

use serde::{Deserialize, Serialize};

/// Answer from the external knowledge base
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbAnswer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub elapsed_ms: u64,
    pub confidence: f32,
}

impl KbAnswer {
    pub fn is_usable(&self) -> bool {
        self.answer.as_deref().map(|a| !a.trim().is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_answer() {
        let answer = KbAnswer {
            answer: Some("可办理时间为工作日 9:00-17:00".to_string()),
            confidence: 0.8,
            ..Default::default()
        };
        assert!(answer.is_usable());

        let empty = KbAnswer {
            answer: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!empty.is_usable());
        assert!(!KbAnswer::default().is_usable());
    }
}
