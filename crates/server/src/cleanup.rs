//! Background cleanup scheduler
//!
//! Periodic maintenance over the stores: expired sessions and user
//! contexts, old conversations, old audit rows, the cache-invalidation log
//! and invalid slot values. Tasks run sequentially with a bounded batch
//! size and a yield between batches so turn workers are never starved.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use dialogue_config::CleanupSettings;
use dialogue_persistence::{AuditEntry, PersistenceLayer};

/// Typed cleanup task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupKind {
    ExpiredSessions,
    ExpiredUserContexts,
    OldConversations,
    OldAuditLogs,
    OldCacheLogs,
    InvalidSlotValues,
}

impl CleanupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiredSessions => "expired_sessions",
            Self::ExpiredUserContexts => "expired_user_contexts",
            Self::OldConversations => "old_conversations",
            Self::OldAuditLogs => "old_audit_logs",
            Self::OldCacheLogs => "old_cache_logs",
            Self::InvalidSlotValues => "invalid_slot_values",
        }
    }

    fn all() -> [CleanupKind; 6] {
        [
            Self::ExpiredSessions,
            Self::ExpiredUserContexts,
            Self::OldConversations,
            Self::OldAuditLogs,
            Self::OldCacheLogs,
            Self::InvalidSlotValues,
        ]
    }
}

/// The scheduler; one instance per process
pub struct CleanupScheduler {
    persistence: PersistenceLayer,
    settings: CleanupSettings,
}

impl CleanupScheduler {
    pub fn new(persistence: PersistenceLayer, settings: CleanupSettings) -> Self {
        Self {
            persistence,
            settings,
        }
    }

    /// Start the periodic task. Returns a shutdown sender; flipping it to
    /// `true` stops the loop.
    pub fn start(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let interval = Duration::from_secs(scheduler.settings.interval_hours * 3600);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would run cleanup at boot
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        scheduler.run_all().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Cleanup scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Run every task once, sequentially.
    pub async fn run_all(&self) {
        let started = std::time::Instant::now();
        let mut total_removed = 0usize;

        for kind in CleanupKind::all() {
            match self.run_task(kind).await {
                Ok(removed) => {
                    total_removed += removed;
                    if removed > 0 {
                        tracing::info!(task = kind.as_str(), removed, "Cleanup task finished");
                    }
                }
                Err(e) => {
                    tracing::warn!(task = kind.as_str(), error = %e, "Cleanup task failed");
                }
            }
            // Brief yield between tasks so turn workers keep flowing
            tokio::task::yield_now().await;
        }

        let entry = AuditEntry::new(
            "system",
            "cleanup_run",
            "system",
            "run_all",
            "success",
            serde_json::json!({
                "removed": total_removed,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        );
        if let Err(e) = self.persistence.audit.append(&entry).await {
            tracing::warn!(error = %e, "Cleanup audit append failed");
        }
    }

    /// Run one task, returning how many rows it removed or transitioned.
    pub async fn run_task(&self, kind: CleanupKind) -> Result<usize, String> {
        let batch = self.settings.batch_size;
        let now = Utc::now();

        let removed = match kind {
            CleanupKind::ExpiredSessions => self
                .persistence
                .sessions
                .expire_stale(batch)
                .await
                .map_err(|e| e.to_string())?,
            CleanupKind::ExpiredUserContexts => self
                .persistence
                .user_contexts
                .delete_expired(batch)
                .await
                .map_err(|e| e.to_string())?,
            CleanupKind::OldConversations => {
                let cutoff = now - ChronoDuration::days(self.settings.retention_days_conversations);
                self.persistence
                    .conversations
                    .delete_older_than(cutoff, batch)
                    .await
                    .map_err(|e| e.to_string())?
            }
            CleanupKind::OldAuditLogs => {
                let cutoff = now - ChronoDuration::days(self.settings.retention_days_audit);
                self.persistence
                    .audit
                    .delete_older_than(cutoff, batch)
                    .await
                    .map_err(|e| e.to_string())?
            }
            CleanupKind::OldCacheLogs => {
                let cutoff = now - ChronoDuration::days(self.settings.retention_days_cache_log);
                self.persistence.cache.prune_log(cutoff, batch)
            }
            CleanupKind::InvalidSlotValues => {
                let cutoff = now - ChronoDuration::days(self.settings.retention_days_slot_values);
                self.persistence
                    .slot_values
                    .delete_invalid_older_than(cutoff, batch)
                    .await
                    .map_err(|e| e.to_string())?
            }
        };

        Ok(removed)
    }
}
