//! Handler binding configuration
//!
//! Each intent binds to exactly one action handler. Handler configs are a
//! tagged variant dispatched on `type`; adding a handler kind means adding a
//! variant here and an implementation in the handlers crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::DomainConfigError;

/// Handler bindings loaded from handlers.yaml, keyed by intent name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlersConfig {
    #[serde(default)]
    pub handlers: HashMap<String, HandlerBinding>,
}

impl HandlersConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DomainConfigError::FileNotFound(path.as_ref().display().to_string(), e.to_string())
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            DomainConfigError::ParseError(path.as_ref().display().to_string(), e.to_string())
        })
    }

    pub fn binding(&self, intent: &str) -> Option<&HandlerBinding> {
        self.handlers.get(intent)
    }
}

/// Tagged handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerBinding {
    /// Simulated service with configurable latency and success rate
    MockService {
        service_name: String,
        #[serde(default = "default_mock_delay_ms")]
        delay_ms: u64,
        #[serde(default = "default_success_rate")]
        success_rate: f64,
    },
    /// HTTP call with `{slot}` placeholder expansion in url/headers/body
    ApiCall {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body_template: serde_json::Value,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        retry: RetryPolicy,
    },
    /// Scoped data operation against the authoritative store
    Database {
        operation: String,
        #[serde(default)]
        scope: String,
    },
}

fn default_mock_delay_ms() -> u64 {
    200
}

fn default_success_rate() -> f64 {
    0.95
}

fn default_method() -> String {
    "POST".to_string()
}

/// Retry policy for transient handler failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_binding_deserialization() {
        let yaml = r#"
handlers:
  book_flight:
    type: mock_service
    service_name: book_flight_service
    delay_ms: 100
    success_rate: 0.98
  check_balance:
    type: api_call
    method: GET
    url: "https://bank.example.com/accounts/{account_id}/balance"
    headers:
      Authorization: "Bearer {api_token}"
    timeout_ms: 5000
  save_note:
    type: database
    operation: upsert_user_context
    scope: conversation
"#;
        let config: HandlersConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.handlers.len(), 3);

        match config.binding("book_flight").unwrap() {
            HandlerBinding::MockService { service_name, success_rate, .. } => {
                assert_eq!(service_name, "book_flight_service");
                assert_eq!(*success_rate, 0.98);
            }
            other => panic!("unexpected binding {:?}", other),
        }

        match config.binding("check_balance").unwrap() {
            HandlerBinding::ApiCall { method, url, retry, .. } => {
                assert_eq!(method, "GET");
                assert!(url.contains("{account_id}"));
                assert_eq!(retry.max_retries, 1);
            }
            other => panic!("unexpected binding {:?}", other),
        }
    }

    #[test]
    fn test_missing_binding() {
        let config = HandlersConfig::default();
        assert!(config.binding("anything").is_none());
    }
}
