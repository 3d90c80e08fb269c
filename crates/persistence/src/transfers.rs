//! Intent transfer records
//!
//! A transfer is a mid-session intent switch. `transfer_type = user_request`
//! with no `resumed_at` is an interruption eligible to resume; the intent
//! stack is the query over those rows, never a mutable in-memory list.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// Why the switch happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    UserRequest,
    SystemRedirect,
    Fallback,
    Escalation,
    Completion,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::SystemRedirect => "system_redirect",
            Self::Fallback => "fallback",
            Self::Escalation => "escalation",
            Self::Completion => "completion",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "user_request" => Self::UserRequest,
            "system_redirect" => Self::SystemRedirect,
            "escalation" => Self::Escalation,
            "completion" => Self::Completion,
            _ => Self::Fallback,
        }
    }
}

/// One transfer row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: Uuid,
    pub session_id: String,
    pub from_intent: String,
    pub to_intent: String,
    pub transfer_type: TransferType,
    pub reason: String,
    /// Slot/context snapshot preserved for resumption
    pub saved_context: serde_json::Value,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    pub fn is_interruption(&self) -> bool {
        self.transfer_type == TransferType::UserRequest && self.resumed_at.is_none()
    }
}

/// Transfer store contract
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn record(&self, record: &TransferRecord) -> Result<(), PersistenceError>;

    /// Unresumed interruptions, newest first: the logical intent stack
    async fn intent_stack(
        &self,
        session_id: &str,
    ) -> Result<Vec<TransferRecord>, PersistenceError>;

    async fn mark_resumed(
        &self,
        session_id: &str,
        transfer_id: Uuid,
    ) -> Result<(), PersistenceError>;
}

/// In-memory transfer store
#[derive(Default)]
pub struct InMemoryTransferStore {
    records: DashMap<(String, Uuid), TransferRecord>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn record(&self, record: &TransferRecord) -> Result<(), PersistenceError> {
        self.records.insert(
            (record.session_id.clone(), record.transfer_id),
            record.clone(),
        );
        Ok(())
    }

    async fn intent_stack(
        &self,
        session_id: &str,
    ) -> Result<Vec<TransferRecord>, PersistenceError> {
        let mut stack: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|e| e.value().session_id == session_id && e.value().is_interruption())
            .map(|e| e.value().clone())
            .collect();
        stack.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stack)
    }

    async fn mark_resumed(
        &self,
        session_id: &str,
        transfer_id: Uuid,
    ) -> Result<(), PersistenceError> {
        let mut record = self
            .records
            .get_mut(&(session_id.to_string(), transfer_id))
            .ok_or_else(|| PersistenceError::NotFound(format!("transfer {}", transfer_id)))?;
        record.resumed_at = Some(Utc::now());
        Ok(())
    }
}

/// ScyllaDB transfer store
#[derive(Clone)]
pub struct ScyllaTransferStore {
    client: ScyllaClient,
}

impl ScyllaTransferStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    const COLUMNS: &'static str = "session_id, transfer_id, from_intent, to_intent, transfer_type, \
        reason, saved_context_json, confidence, created_at, resumed_at";
}

#[async_trait]
impl TransferStore for ScyllaTransferStore {
    async fn record(&self, record: &TransferRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.intent_transfers ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::COLUMNS
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.session_id,
                    record.transfer_id,
                    &record.from_intent,
                    &record.to_intent,
                    record.transfer_type.as_str(),
                    &record.reason,
                    serde_json::to_string(&record.saved_context)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    record.confidence as f64,
                    record.created_at.timestamp_millis(),
                    record.resumed_at.map(|t| t.timestamp_millis()),
                ),
            )
            .await?;
        Ok(())
    }

    async fn intent_stack(
        &self,
        session_id: &str,
    ) -> Result<Vec<TransferRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.intent_transfers WHERE session_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        let mut stack = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (
                    session_id,
                    transfer_id,
                    from_intent,
                    to_intent,
                    transfer_type,
                    reason,
                    saved_context_json,
                    confidence,
                    created_at,
                    resumed_at,
                ): (
                    String,
                    Uuid,
                    String,
                    String,
                    String,
                    String,
                    String,
                    f64,
                    i64,
                    Option<i64>,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let record = TransferRecord {
                    transfer_id,
                    session_id,
                    from_intent,
                    to_intent,
                    transfer_type: TransferType::from_str(&transfer_type),
                    reason,
                    saved_context: serde_json::from_str(&saved_context_json)
                        .unwrap_or_else(|_| serde_json::json!({})),
                    confidence: confidence as f32,
                    created_at: Utc
                        .timestamp_millis_opt(created_at)
                        .single()
                        .unwrap_or_else(Utc::now),
                    resumed_at: resumed_at.and_then(|t| Utc.timestamp_millis_opt(t).single()),
                };
                if record.is_interruption() {
                    stack.push(record);
                }
            }
        }
        stack.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stack)
    }

    async fn mark_resumed(
        &self,
        session_id: &str,
        transfer_id: Uuid,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.intent_transfers SET resumed_at = ? WHERE session_id = ? AND transfer_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (Utc::now().timestamp_millis(), session_id, transfer_id),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(session_id: &str, from: &str, to: &str, kind: TransferType) -> TransferRecord {
        TransferRecord {
            transfer_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            from_intent: from.to_string(),
            to_intent: to.to_string(),
            transfer_type: kind,
            reason: "test".to_string(),
            saved_context: serde_json::json!({"slots": {"departure_city": "北京"}}),
            confidence: 0.8,
            created_at: Utc::now(),
            resumed_at: None,
        }
    }

    #[tokio::test]
    async fn test_intent_stack_contains_only_interruptions() {
        let store = InMemoryTransferStore::new();
        store
            .record(&transfer("s1", "book_flight", "check_balance", TransferType::UserRequest))
            .await
            .unwrap();
        store
            .record(&transfer("s1", "check_balance", "unknown", TransferType::Fallback))
            .await
            .unwrap();

        let stack = store.intent_stack("s1").await.unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].from_intent, "book_flight");
        assert!(stack[0].is_interruption());
    }

    #[tokio::test]
    async fn test_resume_pops_stack() {
        let store = InMemoryTransferStore::new();
        let interruption =
            transfer("s1", "book_flight", "check_balance", TransferType::UserRequest);
        store.record(&interruption).await.unwrap();

        store.mark_resumed("s1", interruption.transfer_id).await.unwrap();
        assert!(store.intent_stack("s1").await.unwrap().is_empty());
    }
}
