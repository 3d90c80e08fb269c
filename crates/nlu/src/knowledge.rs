//! Knowledge-base fallback client
//!
//! Invoked only when classification yields no usable intent and no pending
//! slot, ambiguity or confirmation applies. The knowledge base is an
//! external HTTP collaborator; only the query contract lives here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use dialogue_core::KbAnswer;

use crate::NluError;

/// Knowledge-base query contract
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn query(
        &self,
        text: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<KbAnswer, NluError>;
}

/// HTTP knowledge-base client
pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct KbRequest<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
struct KbResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
}

impl HttpKnowledgeBase {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Confidence from answer shape: sourced answers rate higher, one-liners
    /// lower. The knowledge base itself reports no confidence.
    fn estimate_confidence(answer: &Option<String>, sources: &[String]) -> f32 {
        let Some(text) = answer else { return 0.0 };
        if text.trim().is_empty() {
            return 0.0;
        }
        let mut confidence: f32 = 0.5;
        if !sources.is_empty() {
            confidence += 0.2;
        }
        if text.chars().count() > 50 {
            confidence += 0.1;
        }
        confidence.min(0.9)
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn query(
        &self,
        text: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<KbAnswer, NluError> {
        let started = std::time::Instant::now();

        let request = KbRequest {
            question: text,
            context,
        };

        let send = self.client.post(&self.endpoint).json(&request).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| NluError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| NluError::Knowledge(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NluError::Knowledge(format!(
                "knowledge base returned HTTP {}",
                response.status()
            )));
        }

        let body: KbResponse = response
            .json()
            .await
            .map_err(|e| NluError::Knowledge(e.to_string()))?;

        let confidence = Self::estimate_confidence(&body.answer, &body.sources);

        Ok(KbAnswer {
            answer: body.answer,
            sources: body.sources,
            elapsed_ms: started.elapsed().as_millis() as u64,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_estimate() {
        assert_eq!(HttpKnowledgeBase::estimate_confidence(&None, &[]), 0.0);
        assert_eq!(
            HttpKnowledgeBase::estimate_confidence(&Some("  ".to_string()), &[]),
            0.0
        );
        assert_eq!(
            HttpKnowledgeBase::estimate_confidence(&Some("短答案".to_string()), &[]),
            0.5
        );
        let long = "办理值机手续需要携带有效身份证件，提前两小时到达机场柜台，行李托运截止时间为起飞前四十五分钟。".to_string();
        let confidence = HttpKnowledgeBase::estimate_confidence(
            &Some(long),
            &["faq.md".to_string()],
        );
        assert!((confidence - 0.8).abs() < 1e-6);
    }
}
