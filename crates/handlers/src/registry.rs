//! Handler dispatch
//!
//! Looks up the binding tag and routes to the matching handler with a
//! timeout wrap. The orchestrator talks to this type only; individual
//! handlers stay private to the crate surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dialogue_config::HandlerBinding;
use dialogue_persistence::UserContextStore;

use crate::database::DatabaseHandler;
use crate::http::ApiCallHandler;
use crate::mock::MockServiceHandler;
use crate::HandlerError;

/// Outcome of one handler invocation
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl HandlerResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Dispatches intent executions to the bound handler
pub struct HandlerDispatcher {
    mock: MockServiceHandler,
    api: ApiCallHandler,
    database: DatabaseHandler,
    default_timeout: Duration,
}

impl HandlerDispatcher {
    pub fn new(contexts: Arc<dyn UserContextStore>, default_timeout: Duration) -> Self {
        Self {
            mock: MockServiceHandler::new(),
            api: ApiCallHandler::new(),
            database: DatabaseHandler::new(contexts),
            default_timeout,
        }
    }

    /// Execute the binding for `intent` with the normalized slot snapshot.
    /// The whole invocation runs under the binding's timeout (or the
    /// default); elapsing it is a transient failure.
    pub async fn execute(
        &self,
        binding: &HandlerBinding,
        intent: &str,
        user_id: &str,
        slots: &HashMap<String, String>,
    ) -> Result<HandlerResult, HandlerError> {
        let timeout = match binding {
            HandlerBinding::ApiCall { timeout_ms, .. } => timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout),
            _ => self.default_timeout,
        };

        tracing::debug!(intent = %intent, timeout_ms = timeout.as_millis() as u64, "Dispatching handler");

        let invocation = self.execute_inner(binding, intent, user_id, slots, timeout);
        match tokio::time::timeout(timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout {
                handler: Self::tag(binding).to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn tag(binding: &HandlerBinding) -> &'static str {
        match binding {
            HandlerBinding::MockService { .. } => "mock_service",
            HandlerBinding::ApiCall { .. } => "api_call",
            HandlerBinding::Database { .. } => "database",
        }
    }

    async fn execute_inner(
        &self,
        binding: &HandlerBinding,
        intent: &str,
        user_id: &str,
        slots: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<HandlerResult, HandlerError> {
        match binding {
            HandlerBinding::MockService {
                service_name,
                delay_ms,
                success_rate,
            } => {
                self.mock
                    .execute(service_name, *delay_ms, *success_rate, slots)
                    .await
            }
            HandlerBinding::ApiCall {
                method,
                url,
                headers,
                body_template,
                retry,
                ..
            } => {
                self.api
                    .execute(method, url, headers, body_template, timeout, retry, slots)
                    .await
            }
            HandlerBinding::Database { operation, scope } => {
                self.database
                    .execute(operation, scope, intent, user_id, slots)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_persistence::InMemoryUserContextStore;

    fn dispatcher() -> HandlerDispatcher {
        HandlerDispatcher::new(
            Arc::new(InMemoryUserContextStore::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_mock_binding_dispatch() {
        let binding = HandlerBinding::MockService {
            service_name: "book_flight_service".to_string(),
            delay_ms: 0,
            success_rate: 1.0,
        };
        let slots: HashMap<String, String> =
            [("departure_city".to_string(), "北京".to_string())].into();

        let result = dispatcher()
            .execute(&binding, "book_flight", "u1", &slots)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.data["order_id"].as_str().unwrap().starts_with("FL"));
    }

    #[tokio::test]
    async fn test_slow_mock_times_out() {
        let binding = HandlerBinding::MockService {
            service_name: "book_flight_service".to_string(),
            delay_ms: 10_000,
            success_rate: 1.0,
        };
        let dispatcher = HandlerDispatcher::new(
            Arc::new(InMemoryUserContextStore::new()),
            Duration::from_millis(50),
        );
        let result = dispatcher
            .execute(&binding, "book_flight", "u1", &HashMap::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_database_binding_dispatch() {
        let binding = HandlerBinding::Database {
            operation: "save_slots".to_string(),
            scope: "global".to_string(),
        };
        let result = dispatcher()
            .execute(&binding, "book_flight", "u1", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.data["saved"], true);
    }
}
