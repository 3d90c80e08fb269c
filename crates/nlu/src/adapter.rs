//! NLU adapter
//!
//! Bridges an `NluBackend` to the orchestrator: applies the inner NLU
//! timeout, resolves display names and priorities from the active-intent
//! hints, and emits candidates in the normative order (confidence desc,
//! priority desc, name asc).

use std::sync::Arc;
use std::time::Duration;

use dialogue_core::nlu_types::{rank_candidates, EntitySpan, IntentCandidate, NluOutcome};

use crate::backend::{NluBackend, RawNluResponse};
use crate::NluError;

/// Metadata for one active intent, passed per call so the adapter never
/// holds config state of its own
#[derive(Debug, Clone)]
pub struct IntentHint {
    pub name: String,
    pub display_name: String,
    pub priority: i32,
    pub examples: Vec<String>,
}

/// The single entry point for classification
pub struct NluAdapter {
    backend: Arc<dyn NluBackend>,
    timeout: Duration,
}

impl NluAdapter {
    pub fn new(backend: Arc<dyn NluBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Classify input against the active intents. Timeout and transport
    /// failures surface as errors; the orchestrator maps them to the
    /// no-recognized-intent path.
    pub async fn recognize(
        &self,
        text: &str,
        intents: &[IntentHint],
        context: Option<&serde_json::Value>,
    ) -> Result<NluOutcome, NluError> {
        let started = std::time::Instant::now();

        let raw = tokio::time::timeout(self.timeout, self.backend.recognize(text, intents, context))
            .await
            .map_err(|_| NluError::Timeout(self.timeout.as_millis() as u64))??;

        let outcome = Self::to_outcome(raw, intents);

        tracing::debug!(
            backend = self.backend.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            top = outcome.top.as_ref().map(|t| t.name.as_str()).unwrap_or("unknown"),
            candidates = outcome.candidates().len(),
            "NLU recognition complete"
        );

        Ok(outcome)
    }

    fn to_outcome(raw: RawNluResponse, intents: &[IntentHint]) -> NluOutcome {
        let lookup = |name: &str| intents.iter().find(|h| h.name == name);

        let mut candidates: Vec<IntentCandidate> = raw
            .top_intent
            .into_iter()
            .chain(raw.alternatives.into_iter())
            // Names the registry does not know are dropped, not guessed at
            .filter_map(|ri| {
                lookup(&ri.name).map(|hint| IntentCandidate {
                    name: ri.name,
                    display_name: hint.display_name.clone(),
                    confidence: ri.confidence.clamp(0.0, 1.0),
                    priority: hint.priority,
                })
            })
            .collect();

        rank_candidates(&mut candidates);

        let mut iter = candidates.into_iter();
        NluOutcome {
            top: iter.next(),
            alternatives: iter.collect(),
            entities: raw
                .entities
                .into_iter()
                .map(|e| EntitySpan {
                    name: e.name,
                    value: e.value,
                    confidence: e.confidence,
                    start: e.start,
                    end: e.end,
                })
                .collect(),
            reasoning: raw.reasoning,
        }
    }
}
