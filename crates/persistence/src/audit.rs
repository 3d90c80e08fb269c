//! Audit log
//!
//! Append-only entries for turn completion, confirmations, config reloads
//! and cleanup runs. Partitioned by date and session so recent activity for
//! one conversation is one partition read.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// One audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub session_id: String,
    /// turn_completed | confirmation | config_reload | cleanup_run | ...
    pub event_type: String,
    /// user id or "system"
    pub actor: String,
    pub action: String,
    /// success | failure | implicit | cancelled
    pub outcome: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        session_id: &str,
        event_type: &str,
        actor: &str,
        action: &str,
        outcome: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            outcome: outcome.to_string(),
            details,
            created_at: Utc::now(),
        }
    }
}

/// Audit log contract
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), PersistenceError>;

    /// Recent entries for a session, newest first
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, PersistenceError>;

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError>;
}

/// In-memory audit log
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), PersistenceError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, PersistenceError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        let mut budget = limit;
        entries.retain(|e| {
            if budget > 0 && e.created_at < cutoff {
                budget -= 1;
                false
            } else {
                true
            }
        });
        Ok(before - entries.len())
    }
}

/// ScyllaDB audit log
#[derive(Clone)]
pub struct ScyllaAuditLog {
    client: ScyllaClient,
}

impl ScyllaAuditLog {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn partition_date(at: DateTime<Utc>) -> String {
        at.format("%Y-%m-%d").to_string()
    }
}

#[async_trait]
impl AuditLog for ScyllaAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.audit_log (partition_date, session_id, created_at, id, event_type, actor, action, outcome, details_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    Self::partition_date(entry.created_at),
                    &entry.session_id,
                    entry.created_at.timestamp_millis(),
                    entry.id,
                    &entry.event_type,
                    &entry.actor,
                    &entry.action,
                    &entry.outcome,
                    serde_json::to_string(&entry.details)
                        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?,
                ),
            )
            .await?;
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, PersistenceError> {
        let query = format!(
            "SELECT session_id, created_at, id, event_type, actor, action, outcome, details_json
             FROM {}.audit_log WHERE partition_date = ? AND session_id = ? LIMIT ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(
                query,
                (Self::partition_date(Utc::now()), session_id, limit as i32),
            )
            .await?;

        let mut entries = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (session_id, created_at, id, event_type, actor, action, outcome, details_json): (
                    String,
                    i64,
                    Uuid,
                    String,
                    String,
                    String,
                    String,
                    String,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                entries.push(AuditEntry {
                    id,
                    session_id,
                    event_type,
                    actor,
                    action,
                    outcome,
                    details: serde_json::from_str(&details_json)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: Utc
                        .timestamp_millis_opt(created_at)
                        .single()
                        .unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(entries)
    }

    async fn delete_older_than(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<usize, PersistenceError> {
        // Retention handled by table TTL / partition-date expiry.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_recent() {
        let log = InMemoryAuditLog::new();
        for i in 0..3 {
            log.append(&AuditEntry::new(
                "s1",
                "turn_completed",
                "u1",
                &format!("turn {}", i),
                "success",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        }
        log.append(&AuditEntry::new(
            "s2",
            "turn_completed",
            "u2",
            "other",
            "success",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let recent = log.recent("s1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "turn 2");
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let log = InMemoryAuditLog::new();
        let mut old = AuditEntry::new("s1", "cleanup_run", "system", "run", "success", serde_json::json!({}));
        old.created_at = Utc::now() - chrono::Duration::days(200);
        log.append(&old).await.unwrap();
        log.append(&AuditEntry::new(
            "s1",
            "turn_completed",
            "u1",
            "turn",
            "success",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let deleted = log
            .delete_older_than(Utc::now() - chrono::Duration::days(180), 10)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(log.recent("s1", 10).await.unwrap().len(), 1);
    }
}
