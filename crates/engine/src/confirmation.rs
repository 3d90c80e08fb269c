//! Confirmation manager
//!
//! Risk-scored confirmation before high-impact actions. Risk combines the
//! intent's action class, the confidence band and the user profile;
//! explicit confirmation applies at medium risk and above, or when a write
//! action sits below the high-confidence band. Requests expire, and expiry
//! reads as an implicit cancel.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use dialogue_config::IntentDefinition;
use dialogue_persistence::{ConfirmationRecord, ConfirmationStore, PersistenceError};

use crate::confidence::ConfidenceLevel;

/// Risk classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Confirmation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStrategy {
    Explicit,
    Implicit,
}

impl ConfirmationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

/// Classified user reply to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Confirm,
    Modify,
    Cancel,
    Unclear,
}

const CONFIRM_WORDS: &[&str] = &[
    "确认", "是", "对", "正确", "好的", "可以", "yes", "ok", "是的", "确认订票", "确认预订",
];
const MODIFY_WORDS: &[&str] = &["修改", "改", "重新", "不对", "错了", "不是", "no", "修正"];
const CANCEL_WORDS: &[&str] = &["取消", "不要", "算了", "退出", "cancel"];

/// The manager; owns the request store
pub struct ConfirmationManager {
    store: Arc<dyn ConfirmationStore>,
    ttl: Duration,
}

impl ConfirmationManager {
    pub fn new(store: Arc<dyn ConfirmationStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Compute risk and the triggers that contributed.
    pub fn assess_risk(
        &self,
        intent: &IntentDefinition,
        confidence_level: ConfidenceLevel,
        novice_user: bool,
    ) -> (RiskLevel, Vec<String>) {
        let mut triggers = Vec::new();

        let mut risk = match intent.action_class.as_str() {
            "monetary" => {
                triggers.push("monetary_action".to_string());
                RiskLevel::High
            }
            "write" => {
                triggers.push("write_action".to_string());
                RiskLevel::Medium
            }
            _ => RiskLevel::Low,
        };

        if matches!(confidence_level, ConfidenceLevel::Low | ConfidenceLevel::Reject) {
            triggers.push("low_confidence".to_string());
            risk = risk.bump();
        }

        if novice_user && risk != RiskLevel::Low {
            triggers.push("novice_user".to_string());
            risk = risk.bump();
        }

        (risk, triggers)
    }

    /// Strategy decision per policy.
    pub fn strategy(
        &self,
        risk: RiskLevel,
        confidence_level: ConfidenceLevel,
        intent: &IntentDefinition,
    ) -> ConfirmationStrategy {
        if risk >= RiskLevel::Medium {
            return ConfirmationStrategy::Explicit;
        }
        if intent.is_write_action() && confidence_level != ConfidenceLevel::High {
            return ConfirmationStrategy::Explicit;
        }
        ConfirmationStrategy::Implicit
    }

    /// Create and persist a pending request; the caller renders the prompt
    /// and records the request id in session context.
    pub async fn create_request(
        &self,
        session_id: &str,
        intent: &str,
        slots: serde_json::Value,
        strategy: ConfirmationStrategy,
        risk: RiskLevel,
        triggers: Vec<String>,
    ) -> Result<ConfirmationRecord, PersistenceError> {
        let now = Utc::now();
        let record = ConfirmationRecord {
            request_id: format!("cfm_{}", Uuid::new_v4().simple()),
            session_id: session_id.to_string(),
            intent: intent.to_string(),
            slots,
            strategy: strategy.as_str().to_string(),
            risk: risk.as_str().to_string(),
            triggers,
            retry_count: 0,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store.create(&record).await?;

        tracing::debug!(
            request_id = %record.request_id,
            intent = intent,
            risk = risk.as_str(),
            "Confirmation request created"
        );
        Ok(record)
    }

    /// Fetch a pending request; expired requests read as absent (implicit
    /// cancel at the call site).
    pub async fn pending(
        &self,
        request_id: &str,
    ) -> Result<Option<ConfirmationRecord>, PersistenceError> {
        self.store.get(request_id).await
    }

    pub async fn close(&self, request_id: &str) -> Result<(), PersistenceError> {
        self.store.delete(request_id).await
    }

    /// Classify a reply by keyword containment. Modify words are checked
    /// before confirm words: "不对" must not read as "对".
    pub fn classify_reply(&self, input: &str) -> ConfirmationReply {
        let lower = input.trim().to_lowercase();
        if CANCEL_WORDS.iter().any(|w| lower.contains(w)) {
            return ConfirmationReply::Cancel;
        }
        if MODIFY_WORDS.iter().any(|w| lower.contains(w)) {
            return ConfirmationReply::Modify;
        }
        if CONFIRM_WORDS.iter().any(|w| lower.contains(w)) {
            return ConfirmationReply::Confirm;
        }
        ConfirmationReply::Unclear
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_persistence::InMemoryConfirmationStore;

    fn intent(action_class: &str) -> IntentDefinition {
        IntentDefinition {
            name: "book_flight".to_string(),
            display_name: "预订机票".to_string(),
            description: String::new(),
            confidence_threshold: None,
            priority: 0,
            category: "booking".to_string(),
            is_active: true,
            examples: Vec::new(),
            fallback_response: None,
            action_class: action_class.to_string(),
        }
    }

    fn manager() -> ConfirmationManager {
        ConfirmationManager::new(Arc::new(InMemoryConfirmationStore::new()), 300)
    }

    #[test]
    fn test_risk_assessment() {
        let manager = manager();

        let (risk, triggers) = manager.assess_risk(&intent("monetary"), ConfidenceLevel::High, false);
        assert_eq!(risk, RiskLevel::High);
        assert!(triggers.contains(&"monetary_action".to_string()));

        let (risk, _) = manager.assess_risk(&intent("read"), ConfidenceLevel::High, false);
        assert_eq!(risk, RiskLevel::Low);

        // Low confidence bumps a write one level
        let (risk, triggers) = manager.assess_risk(&intent("write"), ConfidenceLevel::Low, false);
        assert_eq!(risk, RiskLevel::High);
        assert!(triggers.contains(&"low_confidence".to_string()));
    }

    #[test]
    fn test_strategy_decision() {
        let manager = manager();

        assert_eq!(
            manager.strategy(RiskLevel::High, ConfidenceLevel::High, &intent("monetary")),
            ConfirmationStrategy::Explicit
        );
        assert_eq!(
            manager.strategy(RiskLevel::Low, ConfidenceLevel::High, &intent("read")),
            ConfirmationStrategy::Implicit
        );
        // Write below the high band confirms explicitly even at low risk
        assert_eq!(
            manager.strategy(RiskLevel::Low, ConfidenceLevel::Medium, &intent("write")),
            ConfirmationStrategy::Explicit
        );
    }

    #[test]
    fn test_reply_classification() {
        let manager = manager();
        assert_eq!(manager.classify_reply("确认"), ConfirmationReply::Confirm);
        assert_eq!(manager.classify_reply("好的，可以"), ConfirmationReply::Confirm);
        assert_eq!(manager.classify_reply("OK"), ConfirmationReply::Confirm);
        assert_eq!(manager.classify_reply("改成后天"), ConfirmationReply::Modify);
        assert_eq!(manager.classify_reply("不对"), ConfirmationReply::Modify);
        assert_eq!(manager.classify_reply("算了，取消吧"), ConfirmationReply::Cancel);
        assert_eq!(manager.classify_reply("今天天气不错"), ConfirmationReply::Unclear);
    }

    #[tokio::test]
    async fn test_request_lifecycle() {
        let manager = manager();
        let record = manager
            .create_request(
                "s1",
                "book_flight",
                serde_json::json!({"departure_city": "北京"}),
                ConfirmationStrategy::Explicit,
                RiskLevel::High,
                vec!["monetary_action".to_string()],
            )
            .await
            .unwrap();

        assert!(record.request_id.starts_with("cfm_"));
        assert!(manager.pending(&record.request_id).await.unwrap().is_some());

        manager.close(&record.request_id).await.unwrap();
        assert!(manager.pending(&record.request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_request_reads_absent() {
        let store = Arc::new(InMemoryConfirmationStore::new());
        let manager = ConfirmationManager::new(store, -1);
        let record = manager
            .create_request(
                "s1",
                "book_flight",
                serde_json::json!({}),
                ConfirmationStrategy::Explicit,
                RiskLevel::High,
                Vec::new(),
            )
            .await
            .unwrap();
        assert!(manager.pending(&record.request_id).await.unwrap().is_none());
    }
}
