//! Intent ambiguity records
//!
//! One row per clarification question. A session has at most one open
//! ambiguity; closing it records how it was resolved.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// How an ambiguity was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    UserChoice,
    AutoResolve,
    Fallback,
    Escalate,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserChoice => "user_choice",
            Self::AutoResolve => "auto_resolve",
            Self::Fallback => "fallback",
            Self::Escalate => "escalate",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "user_choice" => Self::UserChoice,
            "auto_resolve" => Self::AutoResolve,
            "escalate" => Self::Escalate,
            _ => Self::Fallback,
        }
    }
}

/// One ambiguity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguityRecord {
    pub ambiguity_id: Uuid,
    pub session_id: String,
    pub turn_id: u32,
    pub user_input: String,
    /// Candidate list as shown to the user: [{name, display, confidence}]
    pub candidates: serde_json::Value,
    pub question: String,
    pub user_choice: Option<String>,
    pub resolution_method: Option<ResolutionMethod>,
    pub resolved_intent: Option<String>,
    pub resolved: bool,
    /// Re-ask attempts consumed by unparseable replies
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Ambiguity store contract
#[async_trait]
pub trait AmbiguityStore: Send + Sync {
    async fn create(&self, record: &AmbiguityRecord) -> Result<(), PersistenceError>;

    async fn get(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError>;

    /// The open (unresolved) ambiguity for a session, if any
    async fn open_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError>;

    async fn resolve(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
        method: ResolutionMethod,
        resolved_intent: Option<&str>,
        user_choice: Option<&str>,
    ) -> Result<(), PersistenceError>;

    /// Bump the re-ask counter, returning the new value
    async fn increment_attempts(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<u32, PersistenceError>;
}

/// In-memory ambiguity store
#[derive(Default)]
pub struct InMemoryAmbiguityStore {
    records: DashMap<(String, Uuid), AmbiguityRecord>,
}

impl InMemoryAmbiguityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AmbiguityStore for InMemoryAmbiguityStore {
    async fn create(&self, record: &AmbiguityRecord) -> Result<(), PersistenceError> {
        self.records.insert(
            (record.session_id.clone(), record.ambiguity_id),
            record.clone(),
        );
        Ok(())
    }

    async fn get(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError> {
        Ok(self
            .records
            .get(&(session_id.to_string(), ambiguity_id))
            .map(|r| r.clone()))
    }

    async fn open_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError> {
        let mut open: Option<AmbiguityRecord> = None;
        for entry in self.records.iter() {
            let record = entry.value();
            if record.session_id == session_id && !record.resolved {
                if open
                    .as_ref()
                    .map(|o| record.created_at > o.created_at)
                    .unwrap_or(true)
                {
                    open = Some(record.clone());
                }
            }
        }
        Ok(open)
    }

    async fn resolve(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
        method: ResolutionMethod,
        resolved_intent: Option<&str>,
        user_choice: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let mut record = self
            .records
            .get_mut(&(session_id.to_string(), ambiguity_id))
            .ok_or_else(|| PersistenceError::NotFound(format!("ambiguity {}", ambiguity_id)))?;
        record.resolved = true;
        record.resolution_method = Some(method);
        record.resolved_intent = resolved_intent.map(|s| s.to_string());
        record.user_choice = user_choice.map(|s| s.to_string());
        record.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn increment_attempts(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<u32, PersistenceError> {
        let mut record = self
            .records
            .get_mut(&(session_id.to_string(), ambiguity_id))
            .ok_or_else(|| PersistenceError::NotFound(format!("ambiguity {}", ambiguity_id)))?;
        record.attempts += 1;
        Ok(record.attempts)
    }
}

/// ScyllaDB ambiguity store
#[derive(Clone)]
pub struct ScyllaAmbiguityStore {
    client: ScyllaClient,
}

impl ScyllaAmbiguityStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    const COLUMNS: &'static str = "session_id, ambiguity_id, turn_id, user_input, candidates_json, \
        question, user_choice, resolution_method, resolved_intent, resolved, attempts, created_at, resolved_at";

    fn row_to_record(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<AmbiguityRecord, PersistenceError> {
        let (
            session_id,
            ambiguity_id,
            turn_id,
            user_input,
            candidates_json,
            question,
            user_choice,
            resolution_method,
            resolved_intent,
            resolved,
            attempts,
            created_at,
            resolved_at,
        ): (
            String,
            Uuid,
            i32,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            bool,
            i32,
            i64,
            Option<i64>,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(AmbiguityRecord {
            ambiguity_id,
            session_id,
            turn_id: turn_id as u32,
            user_input,
            candidates: serde_json::from_str(&candidates_json)
                .unwrap_or_else(|_| serde_json::json!([])),
            question,
            user_choice,
            resolution_method: resolution_method.as_deref().map(ResolutionMethod::from_str),
            resolved_intent,
            resolved,
            attempts: attempts as u32,
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .unwrap_or_else(Utc::now),
            resolved_at: resolved_at.and_then(|t| Utc.timestamp_millis_opt(t).single()),
        })
    }
}

#[async_trait]
impl AmbiguityStore for ScyllaAmbiguityStore {
    async fn create(&self, record: &AmbiguityRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.intent_ambiguities ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::COLUMNS
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.session_id,
                    record.ambiguity_id,
                    record.turn_id as i32,
                    &record.user_input,
                    serde_json::to_string(&record.candidates)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    &record.question,
                    &record.user_choice,
                    record.resolution_method.map(|m| m.as_str()),
                    &record.resolved_intent,
                    record.resolved,
                    record.attempts as i32,
                    record.created_at.timestamp_millis(),
                    record.resolved_at.map(|t| t.timestamp_millis()),
                ),
            )
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.intent_ambiguities WHERE session_id = ? AND ambiguity_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id, ambiguity_id))
            .await?;
        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(self.row_to_record(row)?));
            }
        }
        Ok(None)
    }

    async fn open_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<AmbiguityRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.intent_ambiguities WHERE session_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;
        let mut open: Option<AmbiguityRecord> = None;
        if let Some(rows) = result.rows {
            for row in rows {
                let record = self.row_to_record(row)?;
                if !record.resolved
                    && open
                        .as_ref()
                        .map(|o| record.created_at > o.created_at)
                        .unwrap_or(true)
                {
                    open = Some(record);
                }
            }
        }
        Ok(open)
    }

    async fn resolve(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
        method: ResolutionMethod,
        resolved_intent: Option<&str>,
        user_choice: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.intent_ambiguities
             SET resolved = true, resolution_method = ?, resolved_intent = ?, user_choice = ?, resolved_at = ?
             WHERE session_id = ? AND ambiguity_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    method.as_str(),
                    resolved_intent,
                    user_choice,
                    Utc::now().timestamp_millis(),
                    session_id,
                    ambiguity_id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn increment_attempts(
        &self,
        session_id: &str,
        ambiguity_id: Uuid,
    ) -> Result<u32, PersistenceError> {
        let record = self
            .get(session_id, ambiguity_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("ambiguity {}", ambiguity_id)))?;
        let attempts = record.attempts + 1;
        let query = format!(
            "UPDATE {}.intent_ambiguities SET attempts = ? WHERE session_id = ? AND ambiguity_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (attempts as i32, session_id, ambiguity_id))
            .await?;
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str) -> AmbiguityRecord {
        AmbiguityRecord {
            ambiguity_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            turn_id: 1,
            user_input: "订票".to_string(),
            candidates: serde_json::json!([
                {"name": "book_flight", "display": "预订机票", "confidence": 0.72},
                {"name": "book_train", "display": "预订火车票", "confidence": 0.66},
            ]),
            question: "请问您想要哪种服务？1. 预订机票 2. 预订火车票".to_string(),
            user_choice: None,
            resolution_method: None,
            resolved_intent: None,
            resolved: false,
            attempts: 0,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_open_then_resolve() {
        let store = InMemoryAmbiguityStore::new();
        let ambiguity = record("s1");
        store.create(&ambiguity).await.unwrap();

        let open = store.open_for_session("s1").await.unwrap().unwrap();
        assert_eq!(open.ambiguity_id, ambiguity.ambiguity_id);

        store
            .resolve(
                "s1",
                ambiguity.ambiguity_id,
                ResolutionMethod::UserChoice,
                Some("book_train"),
                Some("2"),
            )
            .await
            .unwrap();

        assert!(store.open_for_session("s1").await.unwrap().is_none());
        let resolved = store.get("s1", ambiguity.ambiguity_id).await.unwrap().unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolved_intent.as_deref(), Some("book_train"));
        assert_eq!(resolved.resolution_method, Some(ResolutionMethod::UserChoice));
    }

    #[tokio::test]
    async fn test_attempts_counter() {
        let store = InMemoryAmbiguityStore::new();
        let ambiguity = record("s1");
        store.create(&ambiguity).await.unwrap();

        assert_eq!(store.increment_attempts("s1", ambiguity.ambiguity_id).await.unwrap(), 1);
        assert_eq!(store.increment_attempts("s1", ambiguity.ambiguity_id).await.unwrap(), 2);
    }
}
