//! Confirmation request rows
//!
//! Pending confirmations before high-impact actions. Requests expire;
//! expiry is treated as implicit cancel by the engine.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// One confirmation request row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub request_id: String,
    pub session_id: String,
    pub intent: String,
    /// Proposed slot snapshot as shown to the user
    pub slots: serde_json::Value,
    /// explicit | implicit | risk_based
    pub strategy: String,
    /// low | medium | high
    pub risk: String,
    pub triggers: Vec<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConfirmationRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Confirmation store contract
#[async_trait]
pub trait ConfirmationStore: Send + Sync {
    async fn create(&self, record: &ConfirmationRecord) -> Result<(), PersistenceError>;

    /// Lookup; expired requests read as absent
    async fn get(&self, request_id: &str) -> Result<Option<ConfirmationRecord>, PersistenceError>;

    async fn increment_retry(&self, request_id: &str) -> Result<u32, PersistenceError>;

    async fn delete(&self, request_id: &str) -> Result<(), PersistenceError>;
}

/// In-memory confirmation store
#[derive(Default)]
pub struct InMemoryConfirmationStore {
    records: DashMap<String, ConfirmationRecord>,
}

impl InMemoryConfirmationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfirmationStore for InMemoryConfirmationStore {
    async fn create(&self, record: &ConfirmationRecord) -> Result<(), PersistenceError> {
        self.records.insert(record.request_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<ConfirmationRecord>, PersistenceError> {
        Ok(self
            .records
            .get(request_id)
            .map(|r| r.clone())
            .filter(|r| !r.is_expired_at(Utc::now())))
    }

    async fn increment_retry(&self, request_id: &str) -> Result<u32, PersistenceError> {
        let mut record = self
            .records
            .get_mut(request_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("confirmation {}", request_id)))?;
        record.retry_count += 1;
        Ok(record.retry_count)
    }

    async fn delete(&self, request_id: &str) -> Result<(), PersistenceError> {
        self.records.remove(request_id);
        Ok(())
    }
}

/// ScyllaDB confirmation store
#[derive(Clone)]
pub struct ScyllaConfirmationStore {
    client: ScyllaClient,
}

impl ScyllaConfirmationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    const COLUMNS: &'static str = "request_id, session_id, intent, slots_json, strategy, risk, \
        triggers_json, retry_count, created_at, expires_at";
}

#[async_trait]
impl ConfirmationStore for ScyllaConfirmationStore {
    async fn create(&self, record: &ConfirmationRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.confirmation_requests ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::COLUMNS
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.request_id,
                    &record.session_id,
                    &record.intent,
                    serde_json::to_string(&record.slots)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    &record.strategy,
                    &record.risk,
                    serde_json::to_string(&record.triggers)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    record.retry_count as i32,
                    record.created_at.timestamp_millis(),
                    record.expires_at.timestamp_millis(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<ConfirmationRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.confirmation_requests WHERE request_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (request_id,))
            .await?;
        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (
                    request_id,
                    session_id,
                    intent,
                    slots_json,
                    strategy,
                    risk,
                    triggers_json,
                    retry_count,
                    created_at,
                    expires_at,
                ): (
                    String,
                    String,
                    String,
                    String,
                    String,
                    String,
                    String,
                    i32,
                    i64,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let record = ConfirmationRecord {
                    request_id,
                    session_id,
                    intent,
                    slots: serde_json::from_str(&slots_json)
                        .unwrap_or_else(|_| serde_json::json!({})),
                    strategy,
                    risk,
                    triggers: serde_json::from_str(&triggers_json).unwrap_or_default(),
                    retry_count: retry_count as u32,
                    created_at: Utc
                        .timestamp_millis_opt(created_at)
                        .single()
                        .unwrap_or_else(Utc::now),
                    expires_at: Utc
                        .timestamp_millis_opt(expires_at)
                        .single()
                        .unwrap_or_else(Utc::now),
                };
                if !record.is_expired_at(Utc::now()) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn increment_retry(&self, request_id: &str) -> Result<u32, PersistenceError> {
        let record = self
            .get(request_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("confirmation {}", request_id)))?;
        let retries = record.retry_count + 1;
        let query = format!(
            "UPDATE {}.confirmation_requests SET retry_count = ? WHERE request_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (retries as i32, request_id))
            .await?;
        Ok(retries)
    }

    async fn delete(&self, request_id: &str) -> Result<(), PersistenceError> {
        let query = format!(
            "DELETE FROM {}.confirmation_requests WHERE request_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (request_id,))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_id: &str, expires_in_secs: i64) -> ConfirmationRecord {
        ConfirmationRecord {
            request_id: request_id.to_string(),
            session_id: "s1".to_string(),
            intent: "book_flight".to_string(),
            slots: serde_json::json!({"departure_city": "北京"}),
            strategy: "explicit".to_string(),
            risk: "high".to_string(),
            triggers: vec!["monetary_action".to_string()],
            retry_count: 0,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = InMemoryConfirmationStore::new();
        store.create(&request("r1", 300)).await.unwrap();
        assert!(store.get("r1").await.unwrap().is_some());

        store.delete("r1").await.unwrap();
        assert!(store.get("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_request_reads_absent() {
        let store = InMemoryConfirmationStore::new();
        store.create(&request("r1", -10)).await.unwrap();
        assert!(store.get("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_counter() {
        let store = InMemoryConfirmationStore::new();
        store.create(&request("r1", 300)).await.unwrap();
        assert_eq!(store.increment_retry("r1").await.unwrap(), 1);
        assert_eq!(store.increment_retry("r1").await.unwrap(), 2);
    }
}
