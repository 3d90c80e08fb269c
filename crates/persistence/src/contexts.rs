//! User context rows
//!
//! Scoped key-value pairs per user (preferences, profile facts, temporary
//! flags). Unique on `(user_id, type, key)`; expired or inactive rows are
//! invisible to readers.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// One user context row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContextRecord {
    pub user_id: String,
    /// preference | history | profile | session | temporary
    pub context_type: String,
    pub key: String,
    pub value: serde_json::Value,
    /// global | session | conversation
    pub scope: String,
    pub priority: i32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserContextRecord {
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map(|e| now <= e).unwrap_or(true)
    }
}

/// User context store contract
#[async_trait]
pub trait UserContextStore: Send + Sync {
    /// Insert or replace on `(user_id, type, key)`
    async fn upsert(&self, record: &UserContextRecord) -> Result<(), PersistenceError>;

    async fn get(
        &self,
        user_id: &str,
        context_type: &str,
        key: &str,
    ) -> Result<Option<UserContextRecord>, PersistenceError>;

    /// All visible rows for a user, highest priority first
    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserContextRecord>, PersistenceError>;

    /// Cleanup: drop expired rows
    async fn delete_expired(&self, limit: usize) -> Result<usize, PersistenceError>;
}

/// In-memory user context store
#[derive(Default)]
pub struct InMemoryUserContextStore {
    records: DashMap<(String, String, String), UserContextRecord>,
}

impl InMemoryUserContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserContextStore for InMemoryUserContextStore {
    async fn upsert(&self, record: &UserContextRecord) -> Result<(), PersistenceError> {
        self.records.insert(
            (
                record.user_id.clone(),
                record.context_type.clone(),
                record.key.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        context_type: &str,
        key: &str,
    ) -> Result<Option<UserContextRecord>, PersistenceError> {
        let now = Utc::now();
        Ok(self
            .records
            .get(&(
                user_id.to_string(),
                context_type.to_string(),
                key.to_string(),
            ))
            .map(|r| r.clone())
            .filter(|r| r.is_visible_at(now)))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserContextRecord>, PersistenceError> {
        let now = Utc::now();
        let mut rows: Vec<UserContextRecord> = self
            .records
            .iter()
            .filter(|e| e.value().user_id == user_id && e.value().is_visible_at(now))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rows)
    }

    async fn delete_expired(&self, limit: usize) -> Result<usize, PersistenceError> {
        let now = Utc::now();
        let expired: Vec<(String, String, String)> = self
            .records
            .iter()
            .filter(|e| e.value().expires_at.map(|x| now > x).unwrap_or(false))
            .take(limit)
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.records.remove(&key);
        }
        Ok(count)
    }
}

/// ScyllaDB user context store
#[derive(Clone)]
pub struct ScyllaUserContextStore {
    client: ScyllaClient,
}

impl ScyllaUserContextStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    const COLUMNS: &'static str = "user_id, context_type, context_key, value_json, scope, priority, \
        is_active, updated_at, expires_at";

    fn row_to_record(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<UserContextRecord, PersistenceError> {
        let (user_id, context_type, key, value_json, scope, priority, is_active, updated_at, expires_at): (
            String,
            String,
            String,
            String,
            String,
            i32,
            bool,
            i64,
            Option<i64>,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(UserContextRecord {
            user_id,
            context_type,
            key,
            value: serde_json::from_str(&value_json).unwrap_or(serde_json::Value::Null),
            scope,
            priority,
            is_active,
            updated_at: Utc
                .timestamp_millis_opt(updated_at)
                .single()
                .unwrap_or_else(Utc::now),
            expires_at: expires_at.and_then(|t| Utc.timestamp_millis_opt(t).single()),
        })
    }
}

#[async_trait]
impl UserContextStore for ScyllaUserContextStore {
    async fn upsert(&self, record: &UserContextRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.user_contexts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::COLUMNS
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.user_id,
                    &record.context_type,
                    &record.key,
                    serde_json::to_string(&record.value)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    &record.scope,
                    record.priority,
                    record.is_active,
                    record.updated_at.timestamp_millis(),
                    record.expires_at.map(|t| t.timestamp_millis()),
                ),
            )
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        context_type: &str,
        key: &str,
    ) -> Result<Option<UserContextRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.user_contexts WHERE user_id = ? AND context_type = ? AND context_key = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (user_id, context_type, key))
            .await?;
        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let record = self.row_to_record(row)?;
                if record.is_visible_at(Utc::now()) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserContextRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.user_contexts WHERE user_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(query, (user_id,)).await?;
        let now = Utc::now();
        let mut records = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let record = self.row_to_record(row)?;
                if record.is_visible_at(now) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(records)
    }

    async fn delete_expired(&self, _limit: usize) -> Result<usize, PersistenceError> {
        // Handled by TTL semantics when rows are written with expires_at.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preference(user_id: &str, key: &str, value: &str, priority: i32) -> UserContextRecord {
        UserContextRecord {
            user_id: user_id.to_string(),
            context_type: "preference".to_string(),
            key: key.to_string(),
            value: serde_json::json!(value),
            scope: "global".to_string(),
            priority,
            is_active: true,
            updated_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_natural_key() {
        let store = InMemoryUserContextStore::new();
        store.upsert(&preference("u1", "seat", "window", 1)).await.unwrap();
        store.upsert(&preference("u1", "seat", "aisle", 1)).await.unwrap();

        let row = store.get("u1", "preference", "seat").await.unwrap().unwrap();
        assert_eq!(row.value, serde_json::json!("aisle"));
        assert_eq!(store.list_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let store = InMemoryUserContextStore::new();
        store.upsert(&preference("u1", "a", "1", 1)).await.unwrap();
        store.upsert(&preference("u1", "b", "2", 9)).await.unwrap();

        let rows = store.list_for_user("u1").await.unwrap();
        assert_eq!(rows[0].key, "b");
    }

    #[tokio::test]
    async fn test_expired_rows_hidden_and_cleaned() {
        let store = InMemoryUserContextStore::new();
        let mut stale = preference("u1", "temp", "x", 1);
        stale.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.upsert(&stale).await.unwrap();

        assert!(store.get("u1", "preference", "temp").await.unwrap().is_none());
        assert_eq!(store.delete_expired(10).await.unwrap(), 1);
    }
}
