//! Database action handler
//!
//! Scoped data operations against the user context store. Kept deliberately
//! narrow: an intent may persist its slot snapshot as a user context row or
//! read one back, nothing more.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use dialogue_persistence::{UserContextRecord, UserContextStore};

use crate::registry::HandlerResult;
use crate::HandlerError;

pub struct DatabaseHandler {
    contexts: Arc<dyn UserContextStore>,
}

impl DatabaseHandler {
    pub fn new(contexts: Arc<dyn UserContextStore>) -> Self {
        Self { contexts }
    }

    pub async fn execute(
        &self,
        operation: &str,
        scope: &str,
        intent: &str,
        user_id: &str,
        slots: &HashMap<String, String>,
    ) -> Result<HandlerResult, HandlerError> {
        match operation {
            "save_slots" => {
                let record = UserContextRecord {
                    user_id: user_id.to_string(),
                    context_type: "history".to_string(),
                    key: format!("last_{}", intent),
                    value: serde_json::to_value(slots)
                        .map_err(|e| HandlerError::Rejected(e.to_string()))?,
                    scope: if scope.is_empty() { "global".to_string() } else { scope.to_string() },
                    priority: 0,
                    is_active: true,
                    updated_at: Utc::now(),
                    expires_at: None,
                };
                self.contexts
                    .upsert(&record)
                    .await
                    .map_err(|e| HandlerError::Transient(e.to_string()))?;
                Ok(HandlerResult::success(serde_json::json!({
                    "saved": true,
                    "key": record.key,
                })))
            }
            "load_slots" => {
                let row = self
                    .contexts
                    .get(user_id, "history", &format!("last_{}", intent))
                    .await
                    .map_err(|e| HandlerError::Transient(e.to_string()))?;
                match row {
                    Some(record) => Ok(HandlerResult::success(record.value)),
                    None => Err(HandlerError::Rejected("no saved data for intent".to_string())),
                }
            }
            other => Err(HandlerError::InvalidConfig(format!(
                "unknown database operation {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_persistence::InMemoryUserContextStore;

    #[tokio::test]
    async fn test_save_then_load() {
        let store = Arc::new(InMemoryUserContextStore::new());
        let handler = DatabaseHandler::new(store);

        let slots: HashMap<String, String> =
            [("departure_city".to_string(), "北京".to_string())].into();

        let saved = handler
            .execute("save_slots", "global", "book_flight", "u1", &slots)
            .await
            .unwrap();
        assert_eq!(saved.data["saved"], true);

        let loaded = handler
            .execute("load_slots", "global", "book_flight", "u1", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(loaded.data["departure_city"], "北京");
    }

    #[tokio::test]
    async fn test_load_missing_rejects() {
        let handler = DatabaseHandler::new(Arc::new(InMemoryUserContextStore::new()));
        let result = handler
            .execute("load_slots", "global", "book_flight", "u1", &HashMap::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let handler = DatabaseHandler::new(Arc::new(InMemoryUserContextStore::new()));
        let result = handler
            .execute("drop_everything", "", "x", "u1", &HashMap::new())
            .await;
        assert!(matches!(result, Err(HandlerError::InvalidConfig(_))));
    }
}
