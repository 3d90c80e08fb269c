//! Turn vocabulary
//!
//! One turn is one user utterance and the system response to it. These types
//! carry the outcome of a turn across the orchestrator boundary and into the
//! HTTP envelope unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::nlu_types::IntentCandidate;
use crate::slot_wire::SlotPayload;

/// Final status of a processed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Intent executed and responded
    Completed,
    /// Required slots still missing
    Incomplete,
    /// Clarification question emitted
    Ambiguous,
    /// No usable intent; knowledge-base / canned answer
    NonIntentInput,
    /// Confirmation prompt emitted
    AwaitingConfirmation,
    /// User cancelled the pending operation
    Cancelled,
    /// Handler invocation failed
    ApiError,
    /// Internal fault
    SystemError,
    /// Slot validation failed
    ValidationError,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Ambiguous => "ambiguous",
            Self::NonIntentInput => "non_intent_input",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Cancelled => "cancelled",
            Self::ApiError => "api_error",
            Self::SystemError => "system_error",
            Self::ValidationError => "validation_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "incomplete" => Some(Self::Incomplete),
            "ambiguous" => Some(Self::Ambiguous),
            "non_intent_input" => Some(Self::NonIntentInput),
            "awaiting_confirmation" => Some(Self::AwaitingConfirmation),
            "cancelled" => Some(Self::Cancelled),
            "api_error" => Some(Self::ApiError),
            "system_error" => Some(Self::SystemError),
            "validation_error" => Some(Self::ValidationError),
            _ => None,
        }
    }

    /// Statuses excluded from the cached conversation history so that error
    /// artifacts do not feed back into later classification context.
    pub fn is_error_artifact(&self) -> bool {
        matches!(self, Self::SystemError | Self::ValidationError)
    }
}

/// Shape of the system response within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    SlotPrompt,
    Disambiguation,
    ConfirmationPrompt,
    ApiResult,
    QaResponse,
    ErrorWithAlternatives,
    Cancellation,
    SystemError,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlotPrompt => "slot_prompt",
            Self::Disambiguation => "disambiguation",
            Self::ConfirmationPrompt => "confirmation_prompt",
            Self::ApiResult => "api_result",
            Self::QaResponse => "qa_response",
            Self::ErrorWithAlternatives => "error_with_alternatives",
            Self::Cancellation => "cancellation",
            Self::SystemError => "system_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "slot_prompt" => Some(Self::SlotPrompt),
            "disambiguation" => Some(Self::Disambiguation),
            "confirmation_prompt" => Some(Self::ConfirmationPrompt),
            "api_result" => Some(Self::ApiResult),
            "qa_response" => Some(Self::QaResponse),
            "error_with_alternatives" => Some(Self::ErrorWithAlternatives),
            "cancellation" => Some(Self::Cancellation),
            "system_error" => Some(Self::SystemError),
            _ => None,
        }
    }
}

/// Hint for what the client should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    CollectMissingSlots,
    UserChoice,
    UserConfirmation,
    ExecuteFunction,
    Retry,
    Clarification,
    None,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectMissingSlots => "collect_missing_slots",
            Self::UserChoice => "user_choice",
            Self::UserConfirmation => "user_confirmation",
            Self::ExecuteFunction => "execute_function",
            Self::Retry => "retry",
            Self::Clarification => "clarification",
            Self::None => "none",
        }
    }
}

/// An accepted turn request after input sanitation
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    /// Sanitized user text, 1..=1000 chars
    pub input: String,
    /// Free-form request context merged into the session context
    pub context: Option<serde_json::Value>,
    pub request_id: String,
}

/// Outcome of one processed turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub response: String,
    pub session_id: String,
    pub conversation_turn: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub confidence: f32,
    pub slots: HashMap<String, SlotPayload>,
    pub status: TurnStatus,
    pub response_kind: ResponseKind,
    pub next_action: NextAction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_slots: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub validation_errors: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_intents: Vec<IntentCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_result: Option<serde_json::Value>,
    pub request_id: String,
}

impl TurnResult {
    /// Minimal result for the error branch: the turn still terminates with
    /// a persisted record and a generic user-visible message.
    pub fn system_error(session_id: &str, turn: u32, request_id: &str, message: &str) -> Self {
        Self {
            response: message.to_string(),
            session_id: session_id.to_string(),
            conversation_turn: turn,
            intent: None,
            confidence: 0.0,
            slots: HashMap::new(),
            status: TurnStatus::SystemError,
            response_kind: ResponseKind::ErrorWithAlternatives,
            next_action: NextAction::Retry,
            missing_slots: Vec::new(),
            validation_errors: HashMap::new(),
            ambiguous_intents: Vec::new(),
            api_result: None,
            request_id: request_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TurnStatus::Completed,
            TurnStatus::Incomplete,
            TurnStatus::Ambiguous,
            TurnStatus::NonIntentInput,
            TurnStatus::AwaitingConfirmation,
            TurnStatus::Cancelled,
            TurnStatus::ApiError,
            TurnStatus::SystemError,
            TurnStatus::ValidationError,
        ] {
            assert_eq!(TurnStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TurnStatus::from_str("nonsense"), None);
    }

    #[test]
    fn test_error_artifact_statuses() {
        assert!(TurnStatus::SystemError.is_error_artifact());
        assert!(TurnStatus::ValidationError.is_error_artifact());
        assert!(!TurnStatus::ApiError.is_error_artifact());
        assert!(!TurnStatus::Completed.is_error_artifact());
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&TurnStatus::AwaitingConfirmation).unwrap();
        assert_eq!(json, "\"awaiting_confirmation\"");
    }

    #[test]
    fn test_system_error_result() {
        let result = TurnResult::system_error("s1", 3, "req_1", "服务暂时不可用，请稍后重试");
        assert_eq!(result.status, TurnStatus::SystemError);
        assert_eq!(result.next_action, NextAction::Retry);
        assert_eq!(result.conversation_turn, 3);
    }
}
