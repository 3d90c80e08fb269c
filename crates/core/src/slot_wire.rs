//! Slot wire format
//!
//! The API-facing slot representation. The engine's transformer is the single
//! crossing point between this, the authoritative store row, and the per
//! session cache entry; nothing else converts between the three.

use serde::{Deserialize, Serialize};

/// A slot value as it crosses the API boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotPayload {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Extraction provenance (nlu, regex, default, correction, migration)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

impl SlotPayload {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            confidence: None,
            source: None,
            original_text: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_original_text(mut self, text: impl Into<String>) -> Self {
        self.original_text = Some(text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serde_omits_empty_fields() {
        let payload = SlotPayload::new("departure_city", "北京");
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("confidence"));
        assert!(!json.contains("original_text"));

        let full = payload.with_confidence(0.92).with_source("nlu");
        let json = serde_json::to_string(&full).unwrap();
        assert!(json.contains("0.92"));
        assert!(json.contains("nlu"));
    }
}
