//! Turn orchestrator
//!
//! Drives one turn end-to-end: session resolution, context recall, pending
//! disambiguation / slot supplement / confirmation handling, classification,
//! ambiguity resolution, slot filling, confirmation and action dispatch.
//! The flow is a linear sequence of awaited suspension points; transitions
//! are decided in the fixed order of the branch methods below, first match
//! wins.
//!
//! Concurrency contract: at most one in-flight turn per session. Later
//! requests for the same session queue on the per-session lock, which also
//! makes the per-session slot-store writes race-free. Every accepted
//! request persists exactly one conversation record, error paths included,
//! and slot writes land before the response is emitted.

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use dialogue_config::{
    ConfigRegistry, ConfigSnapshot, HandlerSettings, OrchestratorSettings, SlotDefinition,
    TemplateKind,
};
use dialogue_core::{
    Error, IntentCandidate, NextAction, ResponseKind, Result, TurnRequest, TurnResult, TurnStatus,
};
use dialogue_handlers::{render_template, vars_from, HandlerDispatcher};
use dialogue_nlu::{IntentHint, KnowledgeBase, NluAdapter};
use dialogue_persistence::{
    AmbiguityRecord, AuditEntry, ExtractionMethod, PersistenceLayer, ResolutionMethod,
    SessionRecord, SessionState, SlotValueRecord, TransferRecord, TransferType, TurnRecord,
};
use dialogue_text::{bare_value_candidate, extract_slots};

use crate::ambiguity::AmbiguityDetector;
use crate::choice::{ChoiceContext, ChoiceParser, ChoiceType};
use crate::confidence::{ConfidenceBands, ConfidenceManager};
use crate::confirmation::{ConfirmationManager, ConfirmationReply, ConfirmationStrategy};
use crate::resolver::{MultiStrategyResolver, ResolutionContext};
use crate::slots::{SlotTracker, SlotTransformer};

const HISTORY_CACHE_KEY: &str = "history";
const CTX_CURRENT_INTENT: &str = "current_intent";
const CTX_PENDING_AMBIGUITY: &str = "pending_ambiguity_id";
const CTX_PENDING_CONFIRMATION: &str = "pending_confirmation_id";
const CTX_PREFERENCES: &str = "preferences";

const GENERIC_ERROR_RESPONSE: &str = "服务暂时不可用，请稍后重试。";

static RETRY_PHRASES: &[&str] = &["再试一次", "重试", "再来一次", "retry"];

/// Construction-time dependencies
pub struct OrchestratorDeps {
    pub registry: Arc<ConfigRegistry>,
    pub nlu: Arc<NluAdapter>,
    pub knowledge_base: Option<Arc<dyn KnowledgeBase>>,
    pub persistence: PersistenceLayer,
    pub settings: OrchestratorSettings,
    pub handler_settings: HandlerSettings,
    pub confidence_bands: ConfidenceBands,
}

/// The per-turn state machine composing every subsystem
pub struct TurnOrchestrator {
    registry: Arc<ConfigRegistry>,
    nlu: Arc<NluAdapter>,
    knowledge_base: Option<Arc<dyn KnowledgeBase>>,
    persistence: PersistenceLayer,
    slots: SlotTracker,
    confidence: ConfidenceManager,
    ambiguity: AmbiguityDetector,
    choices: ChoiceParser,
    resolver: MultiStrategyResolver,
    confirmations: ConfirmationManager,
    dispatcher: HandlerDispatcher,
    settings: OrchestratorSettings,
    turn_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Internal carrier between the intent-resolution and slot phases
struct ResolvedIntent {
    name: String,
    confidence: f32,
    entities: Vec<dialogue_core::EntitySpan>,
}

impl TurnOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let slots = SlotTracker::new(
            deps.persistence.slot_values.clone(),
            deps.persistence.cache.clone(),
        );
        let confirmations = ConfirmationManager::new(
            deps.persistence.confirmations.clone(),
            deps.settings.confirmation_ttl_secs,
        );
        let dispatcher = HandlerDispatcher::new(
            deps.persistence.user_contexts.clone(),
            Duration::from_millis(deps.handler_settings.default_timeout_ms),
        );

        Self {
            registry: deps.registry,
            nlu: deps.nlu,
            knowledge_base: deps.knowledge_base,
            slots,
            confidence: ConfidenceManager::new(deps.confidence_bands),
            ambiguity: AmbiguityDetector::new(deps.settings.ambiguity_detection_threshold),
            choices: ChoiceParser::new(),
            resolver: MultiStrategyResolver::new(),
            confirmations,
            dispatcher,
            settings: deps.settings,
            persistence: deps.persistence,
            turn_locks: DashMap::new(),
        }
    }

    /// `HandleTurn(userID, sessionID?, text, requestContext)`.
    ///
    /// Subsystem failures are caught here: the turn is recorded with
    /// `system_error` and a generic message is returned instead of an `Err`.
    /// Only input validation surfaces as an error to the transport layer.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResult> {
        if request.input.trim().is_empty() {
            return Err(Error::InvalidInput("empty input".to_string()));
        }

        let started = std::time::Instant::now();

        let session = match self.resolve_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, user_id = %request.user_id, "Session resolution failed");
                let session_id = request
                    .session_id
                    .clone()
                    .unwrap_or_else(|| format!("error_session_{}", Uuid::new_v4().simple()));
                let result =
                    TurnResult::system_error(&session_id, 1, &request.request_id, GENERIC_ERROR_RESPONSE);
                // Best effort: a conversation record is owed even when the
                // session store is the failing component.
                let _ = self.persist_turn(&result, &request, started.elapsed().as_millis() as u64).await;
                return Ok(result);
            }
        };

        // Turn serialization: one in-flight turn per session, FIFO.
        let lock = {
            let entry = self
                .turn_locks
                .entry(session.session_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
            entry.clone()
        };
        let _turn_guard = lock.lock().await;

        // Re-read inside the lock: a queued turn must observe the context
        // writes of the turn that just released it
        let session = self
            .persistence
            .sessions
            .get(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
            .unwrap_or(session);

        let turn_id = self
            .persistence
            .conversations
            .latest_turn_id(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
            + 1;

        let deadline = Duration::from_millis(self.settings.turn_timeout_ms);
        let processed =
            tokio::time::timeout(deadline, self.process_turn(&session, &request, turn_id)).await;

        let result = match processed {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(
                    session_id = %session.session_id,
                    request_id = %request.request_id,
                    error = %e,
                    "Turn processing failed"
                );
                TurnResult::system_error(
                    &session.session_id,
                    turn_id,
                    &request.request_id,
                    GENERIC_ERROR_RESPONSE,
                )
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    timeout_ms = self.settings.turn_timeout_ms,
                    "Turn deadline exceeded, abandoning in-flight work"
                );
                TurnResult::system_error(
                    &session.session_id,
                    turn_id,
                    &request.request_id,
                    "处理超时，请稍后重试。",
                )
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.persist_turn(&result, &request, elapsed_ms)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        if let Some(intent) = &result.intent {
            self.confidence.record_outcome(
                intent,
                result.confidence,
                result.status == TurnStatus::Completed,
            );
        }

        metrics::counter!("dialogue_turns_total", "status" => result.status.as_str()).increment(1);
        metrics::histogram!("dialogue_turn_duration_ms").record(elapsed_ms as f64);

        Ok(result)
    }

    /// `POST /chat/disambiguate`: resolve the open ambiguity of a
    /// conversation with an out-of-band user choice. Errors with
    /// `Session` when nothing is pending (404 at the transport layer).
    pub async fn disambiguate(&self, session_id: &str, user_choice: &str) -> Result<TurnResult> {
        let open = self
            .persistence
            .ambiguities
            .open_for_session(session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        if open.is_none() {
            return Err(Error::Session(format!(
                "no pending ambiguity for conversation {}",
                session_id
            )));
        }

        let session = self
            .persistence
            .sessions
            .get(session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
            .ok_or_else(|| Error::Session(format!("unknown session {}", session_id)))?;

        self.handle_turn(TurnRequest {
            user_id: session.user_id.clone(),
            session_id: Some(session_id.to_string()),
            input: user_choice.to_string(),
            context: None,
            request_id: format!("req_disamb_{}", Uuid::new_v4().simple()),
        })
        .await
    }

    // =========================================================================
    // Session resolution
    // =========================================================================

    async fn resolve_session(&self, request: &TurnRequest) -> Result<SessionRecord> {
        let store = &self.persistence.sessions;

        // Prefer the supplied id while it is still active
        if let Some(session_id) = &request.session_id {
            if let Some(session) = store
                .get(session_id)
                .await
                .map_err(|e| Error::Store(e.to_string()))?
            {
                if session.state == SessionState::Active && session.user_id == request.user_id {
                    return self.merge_request_context(session, request).await;
                }
                if session.state == SessionState::Expired {
                    self.persistence
                        .cache
                        .invalidate_session(session_id, "session_expired");
                }
            }
        }

        // Else recycle the most recently updated active session
        if let Some(session) = store
            .most_recent_active(&request.user_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
        {
            return self.merge_request_context(session, request).await;
        }

        // Else create one, seeding context with the user's preferences
        let preferences = self.load_preferences(&request.user_id).await;
        let mut context = serde_json::json!({ CTX_PREFERENCES: preferences });
        if let Some(extra) = &request.context {
            Self::merge_json(&mut context, extra);
        }

        let now = Utc::now();
        let session = SessionRecord {
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
            user_id: request.user_id.clone(),
            state: SessionState::Active,
            context,
            created_at: now,
            updated_at: now,
            expires_at: Some(now + chrono::Duration::hours(self.settings.session_ttl_hours)),
        };
        store
            .create(&session)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "Created session"
        );
        Ok(session)
    }

    async fn merge_request_context(
        &self,
        mut session: SessionRecord,
        request: &TurnRequest,
    ) -> Result<SessionRecord> {
        if let Some(extra) = &request.context {
            Self::merge_json(&mut session.context, extra);
            self.persistence
                .sessions
                .update_context(&session.session_id, &session.context)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(session)
    }

    async fn load_preferences(&self, user_id: &str) -> serde_json::Value {
        match self.persistence.user_contexts.list_for_user(user_id).await {
            Ok(rows) => {
                let map: serde_json::Map<String, serde_json::Value> = rows
                    .into_iter()
                    .filter(|r| r.context_type == "preference")
                    .map(|r| (r.key, r.value))
                    .collect();
                serde_json::Value::Object(map)
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Preference load failed");
                serde_json::json!({})
            }
        }
    }

    fn merge_json(base: &mut serde_json::Value, extra: &serde_json::Value) {
        if let (serde_json::Value::Object(base_map), serde_json::Value::Object(extra_map)) =
            (base, extra)
        {
            for (key, value) in extra_map {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }

    /// Error-filtered history for classification context (the cached view).
    /// Diagnostics wanting error turns read the conversation store directly.
    async fn cached_history(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        if let Some(cached) = self.persistence.cache.get(session_id, HISTORY_CACHE_KEY) {
            if let Ok(turns) = serde_json::from_value::<Vec<TurnRecord>>(cached) {
                return Ok(turns);
            }
        }

        let turns: Vec<TurnRecord> = self
            .persistence
            .conversations
            .history(session_id, self.settings.history_window)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
            .into_iter()
            .filter(|t| {
                TurnStatus::from_str(&t.status)
                    .map(|s| !s.is_error_artifact())
                    .unwrap_or(false)
            })
            .collect();

        if let Ok(value) = serde_json::to_value(&turns) {
            self.persistence.cache.put(session_id, HISTORY_CACHE_KEY, value);
        }
        Ok(turns)
    }

    // =========================================================================
    // The per-turn state machine
    // =========================================================================

    async fn process_turn(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
    ) -> Result<TurnResult> {
        let snapshot = self.registry.snapshot();
        let history = self.cached_history(&session.session_id).await?;
        let mut context = session.context.clone();

        // A prior ambiguity awaits this turn's input
        if let Some(open) = self
            .persistence
            .ambiguities
            .open_for_session(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?
        {
            return self
                .handle_disambiguation_reply(
                    session, request, turn_id, &snapshot, &history, &mut context, open,
                )
                .await;
        }

        let last_turn = history.first();

        // The last turn asked for confirmation
        if last_turn
            .map(|t| t.status == TurnStatus::AwaitingConfirmation.as_str())
            .unwrap_or(false)
        {
            if let Some(result) = self
                .handle_confirmation_reply(session, request, turn_id, &snapshot, &mut context)
                .await?
            {
                return Ok(result);
            }
            // Unclear reply falls through to classification
        }

        // Recovery: retry phrase after a handler failure re-invokes with the
        // same slot snapshot
        if last_turn
            .map(|t| t.status == TurnStatus::ApiError.as_str())
            .unwrap_or(false)
        {
            let lowered = request.input.to_lowercase();
            if RETRY_PHRASES.iter().any(|p| lowered.contains(p)) {
                if let Some(intent_name) = last_turn.and_then(|t| t.intent.clone()) {
                    return self
                        .execute_intent(
                            session, request, turn_id, &snapshot, &mut context, &intent_name, 0.95,
                        )
                        .await;
                }
            }
        }

        // The input may supply a missing slot for a recent unresolved intent
        if let Some(result) = self
            .try_slot_supplement(session, request, turn_id, &snapshot, &history, &mut context)
            .await?
        {
            return Ok(result);
        }

        // Fresh classification
        self.classify_and_proceed(session, request, turn_id, &snapshot, &history, &mut context)
            .await
    }

    // =========================================================================
    // Disambiguation replies
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn handle_disambiguation_reply(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        history: &[TurnRecord],
        context: &mut serde_json::Value,
        open: AmbiguityRecord,
    ) -> Result<TurnResult> {
        let candidates: Vec<IntentCandidate> =
            serde_json::from_value(open.candidates.clone()).unwrap_or_default();

        let choice_context = ChoiceContext {
            recent_intents: history.iter().filter_map(|t| t.intent.clone()).collect(),
            preferred_intents: Vec::new(),
            current_intent: context
                .get(CTX_CURRENT_INTENT)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        let parsed = self.choices.parse(
            &request.input,
            &candidates,
            Some(&request.user_id),
            Some(&choice_context),
        );

        if parsed.choice_type == ChoiceType::Negative {
            self.persistence
                .ambiguities
                .resolve(
                    &session.session_id,
                    open.ambiguity_id,
                    ResolutionMethod::Fallback,
                    None,
                    Some(&request.input),
                )
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
            Self::clear_context_key(context, CTX_PENDING_AMBIGUITY);
            self.store_context(session, context).await?;
            return self
                .non_intent_response(session, request, turn_id, snapshot, context)
                .await;
        }

        if parsed.is_selection() {
            let index = parsed.selected_option.unwrap_or(1);
            let chosen = candidates
                .get(index - 1)
                .ok_or_else(|| Error::Internal("choice index out of range".to_string()))?
                .clone();

            self.persistence
                .ambiguities
                .resolve(
                    &session.session_id,
                    open.ambiguity_id,
                    ResolutionMethod::UserChoice,
                    Some(&chosen.name),
                    Some(&request.input),
                )
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

            self.choices.record_outcome(&request.user_id, &parsed, true);
            self.resolver.record_user_resolution(
                &request.user_id,
                &chosen.name,
                Utc::now().hour(),
            );
            Self::clear_context_key(context, CTX_PENDING_AMBIGUITY);

            tracing::info!(
                session_id = %session.session_id,
                intent = %chosen.name,
                choice_type = ?parsed.choice_type,
                "Ambiguity resolved by user choice"
            );

            let resolved = ResolvedIntent {
                name: chosen.name,
                confidence: chosen.confidence.max(parsed.confidence),
                entities: Vec::new(),
            };
            return self
                .fill_slots_and_proceed(session, request, turn_id, snapshot, context, resolved)
                .await;
        }

        // Uncertain or unparseable: re-ask up to the retry limit, then give
        // up and fall back to the non-intent path
        let attempts = self
            .persistence
            .ambiguities
            .increment_attempts(&session.session_id, open.ambiguity_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        if attempts < self.settings.ambiguity_retry_limit {
            let mut question = open.question.clone();
            if !parsed.corrections.is_empty() {
                question = format!("{}\n{}", question, parsed.corrections.join("\n"));
            }
            return Ok(self.build_result(
                session,
                request,
                turn_id,
                question,
                TurnStatus::Ambiguous,
                ResponseKind::Disambiguation,
                NextAction::UserChoice,
                None,
                parsed.confidence,
                HashMap::new(),
                candidates,
            ));
        }

        self.persistence
            .ambiguities
            .resolve(
                &session.session_id,
                open.ambiguity_id,
                ResolutionMethod::Fallback,
                None,
                Some(&request.input),
            )
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Self::clear_context_key(context, CTX_PENDING_AMBIGUITY);
        self.store_context(session, context).await?;
        self.non_intent_response(session, request, turn_id, snapshot, context)
            .await
    }

    // =========================================================================
    // Confirmation replies
    // =========================================================================

    async fn handle_confirmation_reply(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        context: &mut serde_json::Value,
    ) -> Result<Option<TurnResult>> {
        let Some(request_id) = context
            .get(CTX_PENDING_CONFIRMATION)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
        else {
            return Ok(None);
        };

        let pending = self
            .confirmations
            .pending(&request_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let Some(pending) = pending else {
            // Expired request: implicit cancel
            Self::clear_context_key(context, CTX_PENDING_CONFIRMATION);
            Self::clear_context_key(context, CTX_CURRENT_INTENT);
            self.store_context(session, context).await?;
            return Ok(Some(self.build_result(
                session,
                request,
                turn_id,
                "确认已超时，操作已取消。如需继续请重新发起。".to_string(),
                TurnStatus::Cancelled,
                ResponseKind::Cancellation,
                NextAction::None,
                None,
                0.9,
                HashMap::new(),
                Vec::new(),
            )));
        };

        let intent_name = pending.intent.clone();
        match self.confirmations.classify_reply(&request.input) {
            ConfirmationReply::Confirm => {
                let current = self
                    .slots
                    .current(&session.session_id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                let names: Vec<String> = snapshot
                    .slots(&intent_name)
                    .iter()
                    .map(|d| d.name.clone())
                    .collect();
                self.slots
                    .confirm(&session.session_id, &names)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                self.confirmations
                    .close(&request_id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                self.audit(
                    &session.session_id,
                    "confirmation",
                    &request.user_id,
                    &intent_name,
                    "explicit",
                    serde_json::json!({"request_id": request_id, "slots": current.keys().collect::<Vec<_>>()}),
                )
                .await;
                Self::clear_context_key(context, CTX_PENDING_CONFIRMATION);

                let result = self
                    .execute_intent(session, request, turn_id, snapshot, context, &intent_name, 0.95)
                    .await?;
                Ok(Some(result))
            }
            ConfirmationReply::Modify => {
                // A modify utterance often carries the new value directly
                // ("改成后天"): extract against the intent's slots first
                let definitions = snapshot.slots(&intent_name);
                let extracted = extract_slots(&request.input, definitions);

                self.confirmations
                    .close(&request_id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                Self::clear_context_key(context, CTX_PENDING_CONFIRMATION);

                if !extracted.is_empty() {
                    let resolved = ResolvedIntent {
                        name: intent_name,
                        confidence: 0.9,
                        entities: Vec::new(),
                    };
                    let result = self
                        .fill_slots_and_proceed(session, request, turn_id, snapshot, context, resolved)
                        .await?;
                    return Ok(Some(result));
                }

                // No concrete value given: re-enter slot collection keeping
                // existing values, prompting from the top
                let prompt = definitions
                    .iter()
                    .filter(|d| d.is_required)
                    .map(|d| d.prompt())
                    .collect::<Vec<_>>()
                    .join("");
                let missing: Vec<String> = definitions
                    .iter()
                    .filter(|d| d.is_required)
                    .map(|d| d.name.clone())
                    .collect();
                context[CTX_CURRENT_INTENT] = serde_json::json!(intent_name);
                self.store_context(session, context).await?;
                let mut result = self.build_result(
                    session,
                    request,
                    turn_id,
                    format!("好的，我们重新确认信息。{}", prompt),
                    TurnStatus::Incomplete,
                    ResponseKind::SlotPrompt,
                    NextAction::CollectMissingSlots,
                    Some(intent_name),
                    0.9,
                    HashMap::new(),
                    Vec::new(),
                );
                result.missing_slots = missing;
                Ok(Some(result))
            }
            ConfirmationReply::Cancel => {
                self.confirmations
                    .close(&request_id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                Self::clear_context_key(context, CTX_PENDING_CONFIRMATION);
                Self::clear_context_key(context, CTX_CURRENT_INTENT);
                self.store_context(session, context).await?;
                self.audit(
                    &session.session_id,
                    "confirmation",
                    &request.user_id,
                    &intent_name,
                    "cancelled",
                    serde_json::json!({"request_id": request_id}),
                )
                .await;

                let display = snapshot
                    .intent(&intent_name)
                    .map(|i| i.display_name.clone())
                    .unwrap_or(intent_name.clone());
                Ok(Some(self.build_result(
                    session,
                    request,
                    turn_id,
                    format!("好的，已取消{}操作。如需其他帮助，请随时告诉我。", display),
                    TurnStatus::Cancelled,
                    ResponseKind::Cancellation,
                    NextAction::None,
                    Some(intent_name),
                    0.95,
                    HashMap::new(),
                    Vec::new(),
                )))
            }
            ConfirmationReply::Unclear => Ok(None),
        }
    }

    // =========================================================================
    // Slot supplement
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn try_slot_supplement(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        history: &[TurnRecord],
        context: &mut serde_json::Value,
    ) -> Result<Option<TurnResult>> {
        // The most recent awaiting-slot turn within the window decides the
        // target intent; classification never re-runs on this branch
        let target = history
            .iter()
            .take(self.settings.slot_supplement_window)
            .find(|t| {
                t.status == TurnStatus::Incomplete.as_str()
                    && t.response_kind == ResponseKind::SlotPrompt.as_str()
                    && t.intent.is_some()
            });

        let Some(target_turn) = target else {
            return Ok(None);
        };
        let intent_name = target_turn.intent.clone().unwrap_or_default();

        let definitions = snapshot.slots(&intent_name);
        if definitions.is_empty() {
            return Ok(None);
        }

        let current = self
            .slots
            .current(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let still_missing: Vec<&SlotDefinition> = definitions
            .iter()
            .filter(|d| d.is_required)
            .filter(|d| current.get(&d.name).map(|r| !r.is_valid()).unwrap_or(true))
            .collect();
        if still_missing.is_empty() {
            return Ok(None);
        }

        let mut extracted = extract_slots(&request.input, definitions);
        if extracted.is_empty() {
            if let Some((_, bare)) = bare_value_candidate(&request.input, &still_missing) {
                extracted.push(bare);
            }
        }

        // Only values that are new for this intent count as a supplement
        let today = Utc::now().date_naive();
        let new_records: Vec<SlotValueRecord> = extracted
            .iter()
            .filter_map(|e| {
                let definition = definitions.iter().find(|d| d.name == e.name)?;
                let known = current
                    .get(&e.name)
                    .map(|r| r.is_valid() && r.normalized_value == e.value)
                    .unwrap_or(false);
                if known {
                    return None;
                }
                Some(SlotTransformer::to_record(
                    &session.session_id,
                    turn_id,
                    &intent_name,
                    definition,
                    &request.input,
                    &e.value,
                    e.confidence,
                    ExtractionMethod::Regex,
                    today,
                ))
            })
            .collect();

        if new_records.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            session_id = %session.session_id,
            intent = %intent_name,
            slots = ?new_records.iter().map(|r| r.slot_name.as_str()).collect::<Vec<_>>(),
            "Slot supplement accepted"
        );

        let resolved = ResolvedIntent {
            name: intent_name,
            confidence: target_turn.confidence,
            entities: Vec::new(),
        };
        let result = self
            .continue_with_records(session, request, turn_id, snapshot, context, resolved, new_records)
            .await?;
        Ok(Some(result))
    }

    // =========================================================================
    // Classification and ambiguity
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn classify_and_proceed(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        history: &[TurnRecord],
        context: &mut serde_json::Value,
    ) -> Result<TurnResult> {
        let hints: Vec<IntentHint> = snapshot
            .active_intents()
            .iter()
            .map(|i| IntentHint {
                name: i.name.clone(),
                display_name: i.display_name.clone(),
                priority: i.priority,
                examples: i.examples.clone(),
            })
            .collect();

        let nlu_context = serde_json::json!({
            "recent_intents": history.iter().filter_map(|t| t.intent.clone()).collect::<Vec<_>>(),
            "current_intent": context.get(CTX_CURRENT_INTENT),
        });

        let outcome = match self
            .nlu
            .recognize(&request.input, &hints, Some(&nlu_context))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "NLU unavailable, treating input as non-intent");
                return self
                    .non_intent_response(session, request, turn_id, snapshot, context)
                    .await;
            }
        };

        // Threshold filter with per-intent adaptive thresholds; intents
        // without their own threshold fall back to the global floor
        let passing: Vec<IntentCandidate> = outcome
            .candidates()
            .into_iter()
            .filter(|c| {
                let base = snapshot
                    .intent(&c.name)
                    .and_then(|i| i.confidence_threshold)
                    .unwrap_or(self.settings.intent_confidence_threshold);
                self.confidence.passes(&c.name, c.confidence, base)
            })
            .collect();

        if passing.is_empty() {
            return self
                .non_intent_response(session, request, turn_id, snapshot, context)
                .await;
        }

        let current_intent = context
            .get(CTX_CURRENT_INTENT)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        // Ambiguity among passing candidates
        let analysis = self.ambiguity.detect(&passing, current_intent.as_deref());
        let chosen = if analysis.is_ambiguous {
            let resolution_context = ResolutionContext {
                user_id: &request.user_id,
                analysis: &analysis,
                candidates: &analysis.candidates,
                recent_intents: history.iter().filter_map(|t| t.intent.clone()).collect(),
                current_intent: current_intent.clone(),
                hour_of_day: Utc::now().hour(),
            };
            let (resolved, attempt) = self.resolver.resolve(&resolution_context);

            match resolved {
                // Resolved deterministically; record the row for audit
                Some(intent_name) => {
                    let row = AmbiguityRecord {
                        ambiguity_id: Uuid::new_v4(),
                        session_id: session.session_id.clone(),
                        turn_id,
                        user_input: request.input.clone(),
                        candidates: serde_json::to_value(&analysis.candidates)
                            .unwrap_or_else(|_| serde_json::json!([])),
                        question: String::new(),
                        user_choice: None,
                        resolution_method: Some(ResolutionMethod::AutoResolve),
                        resolved_intent: Some(intent_name.clone()),
                        resolved: true,
                        attempts: 0,
                        created_at: Utc::now(),
                        resolved_at: Some(Utc::now()),
                    };
                    self.persistence
                        .ambiguities
                        .create(&row)
                        .await
                        .map_err(|e| Error::Store(e.to_string()))?;

                    let confidence = analysis
                        .candidates
                        .iter()
                        .find(|c| c.name == intent_name)
                        .map(|c| c.confidence)
                        .unwrap_or(attempt.confidence);
                    IntentCandidate::new(intent_name.clone(), intent_name, confidence)
                }
                // Interactive: emit the clarification question
                None => {
                    return self
                        .ask_clarification(session, request, turn_id, context, &analysis.candidates)
                        .await;
                }
            }
        } else {
            passing[0].clone()
        };

        // Interruption: switching away from a mid-collection intent saves
        // its context for potential resumption
        if let Some(current) = &current_intent {
            let last_incomplete = history
                .first()
                .map(|t| t.status == TurnStatus::Incomplete.as_str())
                .unwrap_or(false);
            if current != &chosen.name && last_incomplete {
                let saved_slots = self
                    .slots
                    .current(&session.session_id)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                let transfer = TransferRecord {
                    transfer_id: Uuid::new_v4(),
                    session_id: session.session_id.clone(),
                    from_intent: current.clone(),
                    to_intent: chosen.name.clone(),
                    transfer_type: TransferType::UserRequest,
                    reason: "user switched intent mid-collection".to_string(),
                    saved_context: SlotTransformer::to_cache_entry(&saved_slots),
                    confidence: chosen.confidence,
                    created_at: Utc::now(),
                    resumed_at: None,
                };
                self.persistence
                    .transfers
                    .record(&transfer)
                    .await
                    .map_err(|e| Error::Store(e.to_string()))?;
                tracing::info!(
                    session_id = %session.session_id,
                    from = %current,
                    to = %chosen.name,
                    "Intent interruption recorded"
                );
            }
        }

        let resolved = ResolvedIntent {
            name: chosen.name.clone(),
            confidence: chosen.confidence,
            entities: outcome.entities.clone(),
        };
        self.fill_slots_and_proceed(session, request, turn_id, snapshot, context, resolved)
            .await
    }

    async fn ask_clarification(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        context: &mut serde_json::Value,
        candidates: &[IntentCandidate],
    ) -> Result<TurnResult> {
        let options: Vec<String> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c.display_name))
            .collect();
        let question = format!("请问您想要哪种服务？\n{}", options.join("\n"));

        let row = AmbiguityRecord {
            ambiguity_id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            turn_id,
            user_input: request.input.clone(),
            candidates: serde_json::to_value(candidates).unwrap_or_else(|_| serde_json::json!([])),
            question: question.clone(),
            user_choice: None,
            resolution_method: None,
            resolved_intent: None,
            resolved: false,
            attempts: 0,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.persistence
            .ambiguities
            .create(&row)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        context[CTX_PENDING_AMBIGUITY] = serde_json::json!(row.ambiguity_id.to_string());
        self.store_context(session, context).await?;

        Ok(self.build_result(
            session,
            request,
            turn_id,
            question,
            TurnStatus::Ambiguous,
            ResponseKind::Disambiguation,
            NextAction::UserChoice,
            None,
            candidates.first().map(|c| c.confidence).unwrap_or(0.0),
            HashMap::new(),
            candidates.to_vec(),
        ))
    }

    // =========================================================================
    // Slot filling
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn fill_slots_and_proceed(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        context: &mut serde_json::Value,
        resolved: ResolvedIntent,
    ) -> Result<TurnResult> {
        let definitions = snapshot.slots(&resolved.name);
        let today = Utc::now().date_naive();
        let mut records: Vec<SlotValueRecord> = Vec::new();

        // NLU entities first
        for entity in &resolved.entities {
            if let Some(definition) = definitions.iter().find(|d| d.name == entity.name) {
                records.push(SlotTransformer::to_record(
                    &session.session_id,
                    turn_id,
                    &resolved.name,
                    definition,
                    &request.input,
                    &entity.value,
                    entity.confidence,
                    ExtractionMethod::Nlu,
                    today,
                ));
            }
        }

        // Pattern extraction for slots the NLU did not cover
        for extracted in extract_slots(&request.input, definitions) {
            if records.iter().any(|r| r.slot_name == extracted.name) {
                continue;
            }
            if let Some(definition) = definitions.iter().find(|d| d.name == extracted.name) {
                records.push(SlotTransformer::to_record(
                    &session.session_id,
                    turn_id,
                    &resolved.name,
                    definition,
                    &request.input,
                    &extracted.value,
                    extracted.confidence,
                    ExtractionMethod::Regex,
                    today,
                ));
            }
        }

        self.continue_with_records(session, request, turn_id, snapshot, context, resolved, records)
            .await
    }

    /// Shared tail of the slot phase: write the records, apply defaults,
    /// compute completeness, then prompt, confirm or execute.
    #[allow(clippy::too_many_arguments)]
    async fn continue_with_records(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        context: &mut serde_json::Value,
        resolved: ResolvedIntent,
        mut records: Vec<SlotValueRecord>,
    ) -> Result<TurnResult> {
        let definitions = snapshot.slots(&resolved.name);
        let today = Utc::now().date_naive();

        let existing = self
            .slots
            .current(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        // Defaults for required slots still absent after this turn's values
        for definition in definitions.iter().filter(|d| d.is_required) {
            let supplied_now = records.iter().any(|r| r.slot_name == definition.name);
            let supplied_before = existing
                .get(&definition.name)
                .map(|r| r.is_valid())
                .unwrap_or(false);
            if !supplied_now && !supplied_before {
                if let Some(default) = &definition.default {
                    records.push(SlotTransformer::to_record(
                        &session.session_id,
                        turn_id,
                        &resolved.name,
                        definition,
                        "",
                        default,
                        1.0,
                        ExtractionMethod::Default,
                        today,
                    ));
                }
            }
        }

        let current = if records.is_empty() {
            existing
        } else {
            self.slots
                .write_turn(&session.session_id, records)
                .await
                .map_err(|e| Error::Store(e.to_string()))?
        };

        let missing = SlotTracker::missing_required(&current, definitions);
        let errors: HashMap<String, String> = SlotTracker::validation_errors(&current)
            .into_iter()
            .filter(|(name, _)| definitions.iter().any(|d| &d.name == name))
            .collect();

        if !missing.is_empty() {
            context[CTX_CURRENT_INTENT] = serde_json::json!(resolved.name);
            self.store_context(session, context).await?;

            let mut prompt_lines = Vec::new();
            for (slot_name, error) in &errors {
                if let Some(definition) = definitions.iter().find(|d| &d.name == slot_name) {
                    prompt_lines.push(format!("{}{}，请重新提供。", definition.description, error));
                }
            }
            if let Some(first_missing) = missing
                .iter()
                .find(|name| !errors.contains_key(*name))
                .and_then(|name| definitions.iter().find(|d| &d.name == name))
            {
                prompt_lines.push(first_missing.prompt());
            }
            let response = prompt_lines.join("");

            let mut result = self.build_result(
                session,
                request,
                turn_id,
                response,
                TurnStatus::Incomplete,
                ResponseKind::SlotPrompt,
                NextAction::CollectMissingSlots,
                Some(resolved.name),
                resolved.confidence,
                Self::wire_slots(&current, definitions),
                Vec::new(),
            );
            result.missing_slots = missing;
            result.validation_errors = errors;
            return Ok(result);
        }

        // All required slots valid: confirm or execute
        self.confirm_or_execute(session, request, turn_id, snapshot, context, resolved, current)
            .await
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn confirm_or_execute(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        context: &mut serde_json::Value,
        resolved: ResolvedIntent,
        current: HashMap<String, SlotValueRecord>,
    ) -> Result<TurnResult> {
        let definitions = snapshot.slots(&resolved.name);
        let Some(intent_def) = snapshot.intent(&resolved.name) else {
            return Err(Error::Config(format!("unknown intent {}", resolved.name)));
        };

        let level = self.confidence.level(resolved.confidence);
        let novice = session
            .context
            .get(CTX_PREFERENCES)
            .and_then(|p| p.get("user_type"))
            .and_then(|v| v.as_str())
            .map(|t| t == "novice")
            .unwrap_or(false);

        let (risk, triggers) = self.confirmations.assess_risk(intent_def, level, novice);
        let strategy = self.confirmations.strategy(risk, level, intent_def);

        if strategy == ConfirmationStrategy::Explicit {
            let slot_vars = Self::normalized_vars(&current, definitions);
            let confirmation_record = self
                .confirmations
                .create_request(
                    &session.session_id,
                    &resolved.name,
                    serde_json::to_value(&slot_vars).unwrap_or_else(|_| serde_json::json!({})),
                    strategy,
                    risk,
                    triggers,
                )
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

            let (template, _) = snapshot.template(&resolved.name, TemplateKind::Confirmation);
            let prompt = render_template(template, &slot_vars);

            context[CTX_CURRENT_INTENT] = serde_json::json!(resolved.name);
            context[CTX_PENDING_CONFIRMATION] =
                serde_json::json!(confirmation_record.request_id);
            self.store_context(session, context).await?;

            return Ok(self.build_result(
                session,
                request,
                turn_id,
                prompt,
                TurnStatus::AwaitingConfirmation,
                ResponseKind::ConfirmationPrompt,
                NextAction::UserConfirmation,
                Some(resolved.name),
                resolved.confidence,
                Self::wire_slots(&current, definitions),
                Vec::new(),
            ));
        }

        // Implicit confirmation is still a confirmation for audit purposes
        self.audit(
            &session.session_id,
            "confirmation",
            &request.user_id,
            &resolved.name,
            "implicit",
            serde_json::json!({"risk": risk.as_str()}),
        )
        .await;

        let name = resolved.name.clone();
        self.execute_intent(session, request, turn_id, snapshot, context, &name, resolved.confidence)
            .await
    }

    // =========================================================================
    // Handler execution
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn execute_intent(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        context: &mut serde_json::Value,
        intent_name: &str,
        confidence: f32,
    ) -> Result<TurnResult> {
        let definitions = snapshot.slots(intent_name);
        let current = self
            .slots
            .current(&session.session_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let slot_vars = Self::normalized_vars(&current, definitions);

        let Some(binding) = snapshot.handler(intent_name) else {
            tracing::error!(intent = %intent_name, "No handler binding configured");
            let (template, _) = snapshot.template(intent_name, TemplateKind::Failure);
            let mut vars = slot_vars.clone();
            vars.insert("error_message".to_string(), "该功能暂未接入".to_string());
            return Ok(self.build_result(
                session,
                request,
                turn_id,
                render_template(template, &vars),
                TurnStatus::ApiError,
                ResponseKind::ErrorWithAlternatives,
                NextAction::None,
                Some(intent_name.to_string()),
                confidence,
                Self::wire_slots(&current, definitions),
                Vec::new(),
            ));
        };

        let invocation = self
            .dispatcher
            .execute(binding, intent_name, &request.user_id, &slot_vars)
            .await;

        match invocation {
            Ok(handler_result) => {
                let vars = vars_from(&slot_vars, Some(&handler_result.data));
                let (template, _) = snapshot.template(intent_name, TemplateKind::Success);
                let mut response = render_template(template, &vars);

                // Pop the intent stack: completing an interrupting intent
                // resumes the one it suspended
                let resumed = self.resume_interrupted(session, snapshot, intent_name).await;
                match &resumed {
                    Some(prior) => {
                        let display = snapshot
                            .intent(prior)
                            .map(|i| i.display_name.clone())
                            .unwrap_or_else(|| prior.clone());
                        response.push_str(&format!("我们继续之前的{}。", display));
                        context[CTX_CURRENT_INTENT] = serde_json::json!(prior);
                    }
                    None => {
                        Self::clear_context_key(context, CTX_CURRENT_INTENT);
                    }
                }
                self.store_context(session, context).await?;
                self.audit(
                    &session.session_id,
                    "turn_completed",
                    &request.user_id,
                    intent_name,
                    "success",
                    serde_json::json!({"turn_id": turn_id}),
                )
                .await;

                let mut result = self.build_result(
                    session,
                    request,
                    turn_id,
                    response,
                    TurnStatus::Completed,
                    ResponseKind::ApiResult,
                    NextAction::None,
                    Some(intent_name.to_string()),
                    confidence,
                    Self::wire_slots(&current, definitions),
                    Vec::new(),
                );
                result.api_result = Some(handler_result.data);
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(intent = %intent_name, error = %e, "Handler invocation failed");
                let (template, _) = snapshot.template(intent_name, TemplateKind::Failure);
                let mut vars = slot_vars.clone();
                vars.insert("error_message".to_string(), e.to_string());
                let mut response = render_template(template, &vars);

                let next_action = if e.is_transient() {
                    response.push_str("您可以说\"再试一次\"重新尝试。");
                    NextAction::Retry
                } else {
                    NextAction::None
                };
                let retryable = matches!(next_action, NextAction::Retry);

                // Keep the intent in context so a retry phrase can recover
                if retryable {
                    context[CTX_CURRENT_INTENT] = serde_json::json!(intent_name);
                    self.store_context(session, context).await?;
                }

                Ok(self.build_result(
                    session,
                    request,
                    turn_id,
                    response,
                    TurnStatus::ApiError,
                    ResponseKind::ErrorWithAlternatives,
                    next_action,
                    Some(intent_name.to_string()),
                    confidence,
                    Self::wire_slots(&current, definitions),
                    Vec::new(),
                ))
            }
        }
    }

    /// If the just-completed intent interrupted another one that still has
    /// work to do, mark the transfer resumed and hand back its name.
    async fn resume_interrupted(
        &self,
        session: &SessionRecord,
        snapshot: &Arc<ConfigSnapshot>,
        completed_intent: &str,
    ) -> Option<String> {
        let stack = match self.persistence.transfers.intent_stack(&session.session_id).await {
            Ok(stack) => stack,
            Err(e) => {
                tracing::warn!(error = %e, "Intent stack read failed");
                return None;
            }
        };
        let top = stack.first()?;
        if top.to_intent != completed_intent {
            return None;
        }

        // Only resume when the suspended intent still misses required slots
        let definitions = snapshot.slots(&top.from_intent);
        let current = self.slots.current(&session.session_id).await.ok()?;
        if SlotTracker::missing_required(&current, definitions).is_empty() {
            return None;
        }

        if let Err(e) = self
            .persistence
            .transfers
            .mark_resumed(&session.session_id, top.transfer_id)
            .await
        {
            tracing::warn!(error = %e, "Transfer resume mark failed");
        }

        tracing::info!(
            session_id = %session.session_id,
            resumed = %top.from_intent,
            "Interrupted intent resumed"
        );
        Some(top.from_intent.clone())
    }

    // =========================================================================
    // Non-intent / knowledge-base fallback
    // =========================================================================

    async fn non_intent_response(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        snapshot: &Arc<ConfigSnapshot>,
        _context: &mut serde_json::Value,
    ) -> Result<TurnResult> {
        if let Some(kb) = &self.knowledge_base {
            match kb.query(&request.input, Some(&session.context)).await {
                Ok(answer) if answer.is_usable() => {
                    return Ok(self.build_result(
                        session,
                        request,
                        turn_id,
                        answer.answer.unwrap_or_default(),
                        TurnStatus::NonIntentInput,
                        ResponseKind::QaResponse,
                        NextAction::None,
                        None,
                        answer.confidence,
                        HashMap::new(),
                        Vec::new(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Knowledge base query failed");
                }
            }
        }

        let suggestions: Vec<String> = snapshot
            .active_intents()
            .iter()
            .take(3)
            .map(|i| i.display_name.clone())
            .collect();
        let response = if suggestions.is_empty() {
            "抱歉，我没有理解您的意思，请换一种说法。".to_string()
        } else {
            format!(
                "抱歉，我没有理解您的意思。我可以帮您：{}。",
                suggestions.join("、")
            )
        };

        Ok(self.build_result(
            session,
            request,
            turn_id,
            response,
            TurnStatus::NonIntentInput,
            ResponseKind::QaResponse,
            NextAction::Clarification,
            None,
            0.0,
            HashMap::new(),
            Vec::new(),
        ))
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    fn normalized_vars(
        current: &HashMap<String, SlotValueRecord>,
        definitions: &[SlotDefinition],
    ) -> HashMap<String, String> {
        definitions
            .iter()
            .filter_map(|d| {
                current
                    .get(&d.name)
                    .filter(|r| r.is_valid())
                    .map(|r| (d.name.clone(), r.normalized_value.clone()))
            })
            .collect()
    }

    fn wire_slots(
        current: &HashMap<String, SlotValueRecord>,
        definitions: &[SlotDefinition],
    ) -> HashMap<String, dialogue_core::SlotPayload> {
        let filtered: HashMap<String, SlotValueRecord> = current
            .iter()
            .filter(|(name, _)| definitions.iter().any(|d| &d.name == *name))
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        SlotTransformer::to_wire_snapshot(&filtered)
    }

    fn clear_context_key(context: &mut serde_json::Value, key: &str) {
        if let Some(map) = context.as_object_mut() {
            map.remove(key);
        }
    }

    async fn store_context(
        &self,
        session: &SessionRecord,
        context: &serde_json::Value,
    ) -> Result<()> {
        self.persistence
            .sessions
            .update_context(&session.session_id, context)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn audit(
        &self,
        session_id: &str,
        event_type: &str,
        actor: &str,
        action: &str,
        outcome: &str,
        details: serde_json::Value,
    ) {
        let entry = AuditEntry::new(session_id, event_type, actor, action, outcome, details);
        if let Err(e) = self.persistence.audit.append(&entry).await {
            tracing::warn!(error = %e, "Audit append failed");
        }
    }

    /// The one conversation record per accepted request. History cache for
    /// the session is invalidated afterwards so the next recall includes
    /// this turn.
    async fn persist_turn(
        &self,
        result: &TurnResult,
        request: &TurnRequest,
        elapsed_ms: u64,
    ) -> Result<()> {
        let record = TurnRecord {
            session_id: result.session_id.clone(),
            turn_id: result.conversation_turn,
            user_id: request.user_id.clone(),
            user_input: request.input.clone(),
            intent: result.intent.clone(),
            confidence: result.confidence,
            system_response: result.response.clone(),
            response_kind: result.response_kind.as_str().to_string(),
            status: result.status.as_str().to_string(),
            processing_time_ms: elapsed_ms,
            created_at: Utc::now(),
        };
        self.persistence
            .conversations
            .append(&record)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        self.persistence
            .cache
            .invalidate(&result.session_id, HISTORY_CACHE_KEY, "turn_recorded");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        session: &SessionRecord,
        request: &TurnRequest,
        turn_id: u32,
        response: String,
        status: TurnStatus,
        response_kind: ResponseKind,
        next_action: NextAction,
        intent: Option<String>,
        confidence: f32,
        slots: HashMap<String, dialogue_core::SlotPayload>,
        ambiguous_intents: Vec<IntentCandidate>,
    ) -> TurnResult {
        TurnResult {
            response,
            session_id: session.session_id.clone(),
            conversation_turn: turn_id,
            intent,
            confidence,
            slots,
            status,
            response_kind,
            next_action,
            missing_slots: Vec::new(),
            validation_errors: HashMap::new(),
            ambiguous_intents,
            api_result: None,
            request_id: request.request_id.clone(),
        }
    }
}
