//! NLU backends
//!
//! `HttpNluBackend` talks to the external classifier. `KeywordNluBackend`
//! scores intents by example similarity and keyword overlap; it backs tests
//! and degraded operation when no classifier endpoint is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::IntentHint;
use crate::NluError;

/// Raw wire response from the external classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNluResponse {
    #[serde(default)]
    pub top_intent: Option<RawIntent>,
    #[serde(default)]
    pub alternatives: Vec<RawIntent>,
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIntent {
    pub name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    pub value: String,
    pub confidence: f32,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
}

/// Pluggable classifier backend
#[async_trait]
pub trait NluBackend: Send + Sync {
    async fn recognize(
        &self,
        text: &str,
        intents: &[IntentHint],
        context: Option<&serde_json::Value>,
    ) -> Result<RawNluResponse, NluError>;

    fn name(&self) -> &str;

    async fn is_available(&self) -> bool {
        true
    }
}

/// HTTP classifier backend
pub struct HttpNluBackend {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    text: &'a str,
    active_intents: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a serde_json::Value>,
}

impl HttpNluBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl NluBackend for HttpNluBackend {
    async fn recognize(
        &self,
        text: &str,
        intents: &[IntentHint],
        context: Option<&serde_json::Value>,
    ) -> Result<RawNluResponse, NluError> {
        let request = RecognizeRequest {
            text,
            active_intents: intents.iter().map(|i| i.name.as_str()).collect(),
            context,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| NluError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NluError::Unavailable(format!(
                "classifier returned HTTP {}",
                response.status()
            )));
        }

        let mut raw: RawNluResponse = response
            .json()
            .await
            .map_err(|e| NluError::InvalidResponse(e.to_string()))?;

        // The wire contract spells "no intent" as a literal unknown
        if raw
            .top_intent
            .as_ref()
            .map(|t| t.name == "unknown")
            .unwrap_or(false)
        {
            raw.top_intent = None;
        }

        Ok(raw)
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .send()
            .await
            .map(|r| !r.status().is_server_error())
            .unwrap_or(false)
    }
}

/// Example-similarity fallback classifier
///
/// Scores each active intent by the best Jaccard similarity between the
/// input and the intent's example utterances, boosted by display-name
/// keyword containment. Deterministic for fixed input and hints.
#[derive(Default)]
pub struct KeywordNluBackend;

impl KeywordNluBackend {
    pub fn new() -> Self {
        Self
    }

    fn score(text: &str, hint: &IntentHint) -> f32 {
        let example_score = hint
            .examples
            .iter()
            .map(|example| dialogue_text::jaccard(text, example))
            .fold(0.0f64, f64::max);

        let name_tokens = dialogue_text::tokenize(&hint.display_name);
        let keyword_score = dialogue_text::keyword_match(&name_tokens, text);

        (example_score * 0.6 + keyword_score * 0.4) as f32
    }
}

const KEYWORD_FLOOR: f32 = 0.30;

#[async_trait]
impl NluBackend for KeywordNluBackend {
    async fn recognize(
        &self,
        text: &str,
        intents: &[IntentHint],
        _context: Option<&serde_json::Value>,
    ) -> Result<RawNluResponse, NluError> {
        let mut scored: Vec<RawIntent> = intents
            .iter()
            .map(|hint| RawIntent {
                name: hint.name.clone(),
                confidence: Self::score(text, hint).min(0.95),
            })
            .filter(|candidate| candidate.confidence >= KEYWORD_FLOOR)
            .collect();

        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.name.cmp(&b.name))
        });

        let mut iter = scored.into_iter();
        let top_intent = iter.next();
        Ok(RawNluResponse {
            top_intent,
            alternatives: iter.collect(),
            entities: Vec::new(),
            reasoning: Some("keyword-similarity fallback".to_string()),
        })
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> Vec<IntentHint> {
        vec![
            IntentHint {
                name: "book_flight".to_string(),
                display_name: "预订机票".to_string(),
                priority: 0,
                examples: vec!["我要订机票".to_string(), "帮我订张机票".to_string()],
            },
            IntentHint {
                name: "check_balance".to_string(),
                display_name: "查询余额".to_string(),
                priority: 0,
                examples: vec!["查一下余额".to_string()],
            },
        ]
    }

    #[tokio::test]
    async fn test_keyword_backend_picks_best_match() {
        let backend = KeywordNluBackend::new();
        let result = backend.recognize("我要订机票", &hints(), None).await.unwrap();
        let top = result.top_intent.unwrap();
        assert_eq!(top.name, "book_flight");
        assert!(top.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_keyword_backend_unknown_for_chitchat() {
        let backend = KeywordNluBackend::new();
        let result = backend.recognize("今天天气怎么样", &hints(), None).await.unwrap();
        assert!(result.top_intent.is_none());
    }

    #[tokio::test]
    async fn test_keyword_backend_deterministic() {
        let backend = KeywordNluBackend::new();
        let first = backend.recognize("查询余额", &hints(), None).await.unwrap();
        let second = backend.recognize("查询余额", &hints(), None).await.unwrap();
        assert_eq!(
            first.top_intent.as_ref().map(|t| (&t.name, t.confidence)),
            second.top_intent.as_ref().map(|t| (&t.name, t.confidence)),
        );
    }
}
