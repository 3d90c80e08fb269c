//! Per-session cache
//!
//! Hot read path in front of the authoritative stores. Entries are keyed
//! `(session_id, key)`; invalidations for a given key are serialized with
//! writes to that key by the per-entry locking of the underlying map, and
//! every invalidation is logged for diagnostics and cleanup.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// One logged invalidation
#[derive(Debug, Clone)]
pub struct InvalidationRecord {
    pub id: Uuid,
    pub session_id: String,
    pub cache_key: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// In-process session cache with an invalidation log
#[derive(Default)]
pub struct SessionCache {
    entries: DashMap<(String, String), serde_json::Value>,
    log: RwLock<Vec<InvalidationRecord>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str, key: &str) -> Option<serde_json::Value> {
        self.entries
            .get(&(session_id.to_string(), key.to_string()))
            .map(|v| v.clone())
    }

    pub fn put(&self, session_id: &str, key: &str, value: serde_json::Value) {
        self.entries
            .insert((session_id.to_string(), key.to_string()), value);
    }

    /// Drop one key and log the event
    pub fn invalidate(&self, session_id: &str, key: &str, reason: &str) {
        self.entries
            .remove(&(session_id.to_string(), key.to_string()));
        self.log.write().push(InvalidationRecord {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            cache_key: key.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Drop every key of a session (session end, expiry)
    pub fn invalidate_session(&self, session_id: &str, reason: &str) {
        let keys: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.key().clone())
            .collect();
        for (sid, key) in keys {
            self.invalidate(&sid, &key, reason);
        }
    }

    /// Cleanup: drop log rows older than the cutoff
    pub fn prune_log(&self, cutoff: DateTime<Utc>, limit: usize) -> usize {
        let mut log = self.log.write();
        let before = log.len();
        let mut budget = limit;
        log.retain(|r| {
            if budget > 0 && r.created_at < cutoff {
                budget -= 1;
                false
            } else {
                true
            }
        });
        before - log.len()
    }

    pub fn log_len(&self) -> usize {
        self.log.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_invalidate() {
        let cache = SessionCache::new();
        cache.put("s1", "history", serde_json::json!([1, 2, 3]));
        assert!(cache.get("s1", "history").is_some());

        cache.invalidate("s1", "history", "slot_write");
        assert!(cache.get("s1", "history").is_none());
        assert_eq!(cache.log_len(), 1);
    }

    #[test]
    fn test_invalidate_session_clears_all_keys() {
        let cache = SessionCache::new();
        cache.put("s1", "history", serde_json::json!([]));
        cache.put("s1", "slots", serde_json::json!({}));
        cache.put("s2", "slots", serde_json::json!({}));

        cache.invalidate_session("s1", "session_expired");
        assert!(cache.get("s1", "history").is_none());
        assert!(cache.get("s1", "slots").is_none());
        assert!(cache.get("s2", "slots").is_some());
    }

    #[test]
    fn test_prune_log() {
        let cache = SessionCache::new();
        cache.put("s1", "k", serde_json::json!(1));
        cache.invalidate("s1", "k", "test");
        assert_eq!(cache.prune_log(Utc::now() + chrono::Duration::seconds(1), 10), 1);
        assert_eq!(cache.log_len(), 0);
    }
}
