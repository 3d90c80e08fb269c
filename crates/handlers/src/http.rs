//! HTTP action handler
//!
//! Executes `api_call` bindings: method, url, headers and JSON body all
//! support `{slot}` placeholder expansion. Any 2xx response with a valid
//! JSON body is success; 4xx is a rejection, 5xx and transport faults are
//! transient and honor the binding's retry policy.

use std::collections::HashMap;
use std::time::Duration;

use dialogue_config::RetryPolicy;

use crate::registry::HandlerResult;
use crate::template::{render_template, render_value};
use crate::HandlerError;

pub struct ApiCallHandler {
    client: reqwest::Client,
}

impl ApiCallHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body_template: &serde_json::Value,
        timeout: Duration,
        retry: &RetryPolicy,
        vars: &HashMap<String, String>,
    ) -> Result<HandlerResult, HandlerError> {
        let mut attempt = 0u32;
        loop {
            match self
                .call_once(method, url, headers, body_template, timeout, vars)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %e,
                        "Transient handler failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body_template: &serde_json::Value,
        timeout: Duration,
        vars: &HashMap<String, String>,
    ) -> Result<HandlerResult, HandlerError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| HandlerError::InvalidConfig(format!("bad method {}", method)))?;
        let url = render_template(url, vars);

        let mut request = self.client.request(method.clone(), &url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, render_template(value, vars));
        }
        if !body_template.is_null() && method != reqwest::Method::GET {
            request = request.json(&render_value(body_template, vars));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HandlerError::Timeout {
                    handler: "api_call".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                HandlerError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let data: serde_json::Value = response
                .json()
                .await
                .map_err(|e| HandlerError::Rejected(format!("invalid JSON body: {}", e)))?;
            Ok(HandlerResult::success(data))
        } else if status.is_server_error() {
            Err(HandlerError::Transient(format!("HTTP {}", status.as_u16())))
        } else {
            Err(HandlerError::Rejected(format!("HTTP {}", status.as_u16())))
        }
    }
}

impl Default for ApiCallHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_expansion() {
        let vars: HashMap<String, String> =
            [("account_id".to_string(), "a-42".to_string())].into();
        let url = render_template("https://bank.example.com/accounts/{account_id}/balance", &vars);
        assert_eq!(url, "https://bank.example.com/accounts/a-42/balance");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let handler = ApiCallHandler::new();
        let result = handler
            .execute(
                "POST",
                "http://127.0.0.1:1/never",
                &HashMap::new(),
                &serde_json::Value::Null,
                Duration::from_millis(200),
                &RetryPolicy {
                    max_retries: 0,
                    backoff_ms: 1,
                },
                &HashMap::new(),
            )
            .await;
        match result {
            Err(e) => assert!(e.is_transient()),
            Ok(_) => panic!("expected transport failure"),
        }
    }

    #[tokio::test]
    async fn test_bad_method_is_config_error() {
        let handler = ApiCallHandler::new();
        let result = handler
            .execute(
                "NOT A METHOD",
                "http://127.0.0.1:1/never",
                &HashMap::new(),
                &serde_json::Value::Null,
                Duration::from_millis(200),
                &RetryPolicy::default(),
                &HashMap::new(),
            )
            .await;
        assert!(matches!(result, Err(HandlerError::InvalidConfig(_))));
    }
}
