//! Conversation turn store
//!
//! One immutable record per user utterance, written after the turn
//! completes. Within a session turn ids are strictly monotonic; `history`
//! returns the most recent turns first.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// One conversation turn row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_id: u32,
    pub user_id: String,
    pub user_input: String,
    pub intent: Option<String>,
    pub confidence: f32,
    pub system_response: String,
    pub response_kind: String,
    pub status: String,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Conversation store contract
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append the turn record. Turn ids must be strictly increasing per
    /// session; a duplicate id is a conflict.
    async fn append(&self, record: &TurnRecord) -> Result<(), PersistenceError>;

    /// Most recent turns first, at most `limit`.
    ///
    /// This is the raw, audit-grade view: error turns included. Callers
    /// feeding history into classification context must use the cached
    /// error-filtered view in the engine instead.
    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, PersistenceError>;

    /// Highest turn id for a session, 0 when empty
    async fn latest_turn_id(&self, session_id: &str) -> Result<u32, PersistenceError>;

    /// Cleanup: drop turns older than the cutoff, bounded by `limit` rows.
    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError>;
}

/// In-memory conversation store
#[derive(Default)]
pub struct InMemoryConversationStore {
    turns: DashMap<String, Vec<TurnRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, record: &TurnRecord) -> Result<(), PersistenceError> {
        let mut entry = self.turns.entry(record.session_id.clone()).or_default();
        if entry.iter().any(|t| t.turn_id == record.turn_id) {
            return Err(PersistenceError::Conflict(format!(
                "turn {} already recorded for session {}",
                record.turn_id, record.session_id
            )));
        }
        entry.push(record.clone());
        entry.sort_by_key(|t| t.turn_id);
        Ok(())
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, PersistenceError> {
        Ok(self
            .turns
            .get(session_id)
            .map(|turns| turns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_turn_id(&self, session_id: &str) -> Result<u32, PersistenceError> {
        Ok(self
            .turns
            .get(session_id)
            .and_then(|turns| turns.last().map(|t| t.turn_id))
            .unwrap_or(0))
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError> {
        let mut deleted = 0usize;
        for mut entry in self.turns.iter_mut() {
            if deleted >= limit {
                break;
            }
            let mut budget = limit - deleted;
            entry.retain(|t| {
                if budget > 0 && t.created_at < cutoff {
                    budget -= 1;
                    false
                } else {
                    true
                }
            });
            deleted += (limit - deleted) - budget;
        }
        Ok(deleted)
    }
}

/// ScyllaDB conversation store
#[derive(Clone)]
pub struct ScyllaConversationStore {
    client: ScyllaClient,
}

impl ScyllaConversationStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_record(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<TurnRecord, PersistenceError> {
        let (
            session_id,
            turn_id,
            user_id,
            user_input,
            intent,
            confidence,
            system_response,
            response_kind,
            status,
            processing_time_ms,
            created_at,
        ): (
            String,
            i32,
            String,
            String,
            Option<String>,
            f64,
            String,
            String,
            String,
            i64,
            i64,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(TurnRecord {
            session_id,
            turn_id: turn_id as u32,
            user_id,
            user_input,
            intent,
            confidence: confidence as f32,
            system_response,
            response_kind,
            status,
            processing_time_ms: processing_time_ms as u64,
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ConversationStore for ScyllaConversationStore {
    async fn append(&self, record: &TurnRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.conversations (session_id, turn_id, user_id, user_input, intent,
                confidence, system_response, response_kind, status, processing_time_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.session_id,
                    record.turn_id as i32,
                    &record.user_id,
                    &record.user_input,
                    &record.intent,
                    record.confidence as f64,
                    &record.system_response,
                    &record.response_kind,
                    &record.status,
                    record.processing_time_ms as i64,
                    record.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::debug!(
            session_id = %record.session_id,
            turn_id = record.turn_id,
            status = %record.status,
            "Turn recorded"
        );
        Ok(())
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, PersistenceError> {
        let query = format!(
            "SELECT session_id, turn_id, user_id, user_input, intent, confidence,
                    system_response, response_kind, status, processing_time_ms, created_at
             FROM {}.conversations WHERE session_id = ? LIMIT ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id, limit as i32))
            .await?;

        let mut records = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                records.push(self.row_to_record(row)?);
            }
        }
        Ok(records)
    }

    async fn latest_turn_id(&self, session_id: &str) -> Result<u32, PersistenceError> {
        let query = format!(
            "SELECT turn_id FROM {}.conversations WHERE session_id = ? LIMIT 1",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (turn_id,): (i32,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(turn_id as u32);
            }
        }
        Ok(0)
    }

    async fn delete_older_than(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<usize, PersistenceError> {
        // Retention in Scylla deployments is handled by table TTL; a scan
        // delete over all partitions is not worth the read amplification.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(session_id: &str, turn_id: u32, status: &str) -> TurnRecord {
        TurnRecord {
            session_id: session_id.to_string(),
            turn_id,
            user_id: "u1".to_string(),
            user_input: format!("input {}", turn_id),
            intent: Some("book_flight".to_string()),
            confidence: 0.9,
            system_response: "ok".to_string(),
            response_kind: "slot_prompt".to_string(),
            status: status.to_string(),
            processing_time_ms: 12,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_history_order() {
        let store = InMemoryConversationStore::new();
        for i in 1..=5 {
            store.append(&turn("s1", i, "completed")).await.unwrap();
        }

        let history = store.history("s1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        // Most recent first
        assert_eq!(history[0].turn_id, 5);
        assert_eq!(history[2].turn_id, 3);
    }

    #[tokio::test]
    async fn test_duplicate_turn_id_conflicts() {
        let store = InMemoryConversationStore::new();
        store.append(&turn("s1", 1, "completed")).await.unwrap();
        let result = store.append(&turn("s1", 1, "completed")).await;
        assert!(matches!(result, Err(PersistenceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_latest_turn_id() {
        let store = InMemoryConversationStore::new();
        assert_eq!(store.latest_turn_id("s1").await.unwrap(), 0);
        store.append(&turn("s1", 1, "completed")).await.unwrap();
        store.append(&turn("s1", 2, "incomplete")).await.unwrap();
        assert_eq!(store.latest_turn_id("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let store = InMemoryConversationStore::new();
        let mut old = turn("s1", 1, "completed");
        old.created_at = Utc::now() - chrono::Duration::days(100);
        store.append(&old).await.unwrap();
        store.append(&turn("s1", 2, "completed")).await.unwrap();

        let deleted = store
            .delete_older_than(Utc::now() - chrono::Duration::days(90), 100)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.history("s1", 10).await.unwrap().len(), 1);
    }
}
