//! Session store
//!
//! Sessions are the root of the per-conversation DAG. At most one active
//! session per user is recycled on each new turn: `most_recent_active`
//! returns the latest-updated active session, and expiry is applied lazily
//! on read before anything downstream sees the record.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Completed,
    Expired,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "expired" => Self::Expired,
            _ => Self::Error,
        }
    }
}

/// One session row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub state: SessionState,
    /// Free-form dialogue state: current intent, pending ambiguity id,
    /// pending confirmation id, loaded preferences
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now > e).unwrap_or(false)
    }
}

/// Session store contract
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<(), PersistenceError>;

    /// Lookup by id; `active -> expired` transition is applied implicitly
    /// when `now > expires_at`.
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError>;

    /// Most recently updated active session for the user
    async fn most_recent_active(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionRecord>, PersistenceError>;

    /// Replace the context map and bump `updated_at`
    async fn update_context(
        &self,
        session_id: &str,
        context: &serde_json::Value,
    ) -> Result<(), PersistenceError>;

    async fn set_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> Result<(), PersistenceError>;

    /// Expire sessions whose deadline passed; returns how many changed.
    async fn expire_stale(&self, limit: usize) -> Result<usize, PersistenceError>;
}

/// In-memory session store (default)
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expired_view(mut record: SessionRecord) -> SessionRecord {
        if record.state == SessionState::Active && record.is_expired_at(Utc::now()) {
            record.state = SessionState::Expired;
        }
        record
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        self.sessions.insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|r| Self::expired_view(r.clone())))
    }

    async fn most_recent_active(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionRecord>, PersistenceError> {
        let now = Utc::now();
        let mut best: Option<SessionRecord> = None;
        for entry in self.sessions.iter() {
            let record = entry.value();
            if record.user_id != user_id
                || record.state != SessionState::Active
                || record.is_expired_at(now)
            {
                continue;
            }
            if best
                .as_ref()
                .map(|b| record.updated_at > b.updated_at)
                .unwrap_or(true)
            {
                best = Some(record.clone());
            }
        }
        Ok(best)
    }

    async fn update_context(
        &self,
        session_id: &str,
        context: &serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("session {}", session_id)))?;
        entry.context = context.clone();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn set_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> Result<(), PersistenceError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("session {}", session_id)))?;
        entry.state = state;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn expire_stale(&self, limit: usize) -> Result<usize, PersistenceError> {
        let now = Utc::now();
        let mut expired = 0usize;
        for mut entry in self.sessions.iter_mut() {
            if expired >= limit {
                break;
            }
            if entry.state == SessionState::Active && entry.is_expired_at(now) {
                entry.state = SessionState::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

/// ScyllaDB session store
#[derive(Clone)]
pub struct ScyllaSessionStore {
    client: ScyllaClient,
}

impl ScyllaSessionStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_record(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<SessionRecord, PersistenceError> {
        let (session_id, user_id, state, context_json, created_at, updated_at, expires_at): (
            String,
            String,
            String,
            Option<String>,
            i64,
            i64,
            Option<i64>,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(SessionRecord {
            session_id,
            user_id,
            state: SessionState::from_str(&state),
            context: context_json
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok())
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_millis_opt(updated_at)
                .single()
                .unwrap_or_else(Utc::now),
            expires_at: expires_at.and_then(|e| Utc.timestamp_millis_opt(e).single()),
        })
    }

    async fn upsert_by_user(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.sessions_by_user (user_id, updated_at, session_id, state) VALUES (?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.user_id,
                    record.updated_at.timestamp_millis(),
                    &record.session_id,
                    record.state.as_str(),
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for ScyllaSessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.sessions (session_id, user_id, state, context_json, created_at, updated_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.session_id,
                    &record.user_id,
                    record.state.as_str(),
                    serde_json::to_string(&record.context)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    record.created_at.timestamp_millis(),
                    record.updated_at.timestamp_millis(),
                    record.expires_at.map(|e| e.timestamp_millis()),
                ),
            )
            .await?;

        self.upsert_by_user(record).await?;

        tracing::debug!(session_id = %record.session_id, user_id = %record.user_id, "Session persisted");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        let query = format!(
            "SELECT session_id, user_id, state, context_json, created_at, updated_at, expires_at
             FROM {}.sessions WHERE session_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let mut record = self.row_to_record(row)?;
                if record.state == SessionState::Active && record.is_expired_at(Utc::now()) {
                    record.state = SessionState::Expired;
                    self.set_state(&record.session_id, SessionState::Expired).await?;
                }
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    async fn most_recent_active(
        &self,
        user_id: &str,
    ) -> Result<Option<SessionRecord>, PersistenceError> {
        let query = format!(
            "SELECT session_id, state FROM {}.sessions_by_user WHERE user_id = ? LIMIT 20",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (user_id,)).await?;

        if let Some(rows) = result.rows {
            for row in rows {
                let (session_id, state): (String, String) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                if SessionState::from_str(&state) != SessionState::Active {
                    continue;
                }
                // Re-read the authoritative row; the by-user view may lag
                if let Some(record) = self.get(&session_id).await? {
                    if record.state == SessionState::Active {
                        return Ok(Some(record));
                    }
                }
            }
        }

        Ok(None)
    }

    async fn update_context(
        &self,
        session_id: &str,
        context: &serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.sessions SET context_json = ?, updated_at = ? WHERE session_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    serde_json::to_string(context)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                    Utc::now().timestamp_millis(),
                    session_id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn set_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.sessions SET state = ?, updated_at = ? WHERE session_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (state.as_str(), Utc::now().timestamp_millis(), session_id),
            )
            .await?;
        Ok(())
    }

    async fn expire_stale(&self, _limit: usize) -> Result<usize, PersistenceError> {
        // Expiry is applied lazily on read; rows age out via the table TTL.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, user_id: &str, updated_offset_secs: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            state: SessionState::Active,
            context: serde_json::json!({}),
            created_at: now,
            updated_at: now + chrono::Duration::seconds(updated_offset_secs),
            expires_at: Some(now + chrono::Duration::hours(24)),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySessionStore::new();
        store.create(&record("s1", "u1", 0)).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.state, SessionState::Active);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_most_recent_active_prefers_latest() {
        let store = InMemorySessionStore::new();
        store.create(&record("s1", "u1", 0)).await.unwrap();
        store.create(&record("s2", "u1", 10)).await.unwrap();
        store.create(&record("s3", "u2", 20)).await.unwrap();

        let best = store.most_recent_active("u1").await.unwrap().unwrap();
        assert_eq!(best.session_id, "s2");
    }

    #[tokio::test]
    async fn test_expired_session_transitions_on_read() {
        let store = InMemorySessionStore::new();
        let mut stale = record("s1", "u1", 0);
        stale.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.create(&stale).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Expired);
        assert!(store.most_recent_active("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_stale_batch() {
        let store = InMemorySessionStore::new();
        for i in 0..3 {
            let mut stale = record(&format!("s{}", i), "u1", 0);
            stale.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
            store.create(&stale).await.unwrap();
        }
        assert_eq!(store.expire_stale(2).await.unwrap(), 2);
        assert_eq!(store.expire_stale(10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_context() {
        let store = InMemorySessionStore::new();
        store.create(&record("s1", "u1", 0)).await.unwrap();
        store
            .update_context("s1", &serde_json::json!({"current_intent": "book_flight"}))
            .await
            .unwrap();
        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.context["current_intent"], "book_flight");
    }
}
