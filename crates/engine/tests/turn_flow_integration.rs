//! End-to-end turn flow tests
//!
//! Drives the orchestrator through whole conversations against in-memory
//! stores, a scripted classifier and mock handlers. Covers the booking
//! happy path, ambiguity clarification and auto-resolution, slot
//! supplement, correction before confirmation, cancellation, handler
//! failure recovery and per-session turn serialization.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use dialogue_config::{
    ConfigRegistry, HandlerSettings, HandlersConfig, IntentsConfig, MasterDialogueConfig,
    OrchestratorSettings, SlotsConfig, TemplatesConfig,
};
use dialogue_core::{NextAction, ResponseKind, TurnRequest, TurnResult, TurnStatus};
use dialogue_engine::{ConfidenceBands, OrchestratorDeps, TurnOrchestrator};
use dialogue_nlu::{IntentHint, NluAdapter, NluBackend, NluError, RawIntent, RawNluResponse};
use dialogue_persistence::PersistenceLayer;

/// Classifier scripted by substring match, first rule wins
struct ScriptedNlu {
    rules: Vec<(&'static str, Vec<(&'static str, f32)>)>,
}

#[async_trait]
impl NluBackend for ScriptedNlu {
    async fn recognize(
        &self,
        text: &str,
        _intents: &[IntentHint],
        _context: Option<&serde_json::Value>,
    ) -> Result<RawNluResponse, NluError> {
        for (needle, candidates) in &self.rules {
            if text.contains(needle) {
                let mut iter = candidates.iter().map(|(name, confidence)| RawIntent {
                    name: name.to_string(),
                    confidence: *confidence,
                });
                return Ok(RawNluResponse {
                    top_intent: iter.next(),
                    alternatives: iter.collect(),
                    entities: Vec::new(),
                    reasoning: None,
                });
            }
        }
        Ok(RawNluResponse::default())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn domain_config() -> MasterDialogueConfig {
    let intents: IntentsConfig = serde_yaml::from_str(
        r#"
intents:
  - name: book_flight
    display_name: "预订机票"
    confidence_threshold: 0.70
    priority: 10
    category: booking
    action_class: monetary
    examples: ["我要订机票"]
  - name: book_train
    display_name: "预订火车票"
    confidence_threshold: 0.60
    category: booking
    action_class: monetary
  - name: check_balance
    display_name: "查询余额"
    confidence_threshold: 0.70
    category: query
    action_class: read
  - name: check_statement
    display_name: "查询流水"
    confidence_threshold: 0.70
    category: query
    action_class: read
"#,
    )
    .unwrap();

    let slots: SlotsConfig = serde_yaml::from_str(
        r#"
intents:
  book_flight:
    - name: departure_city
      type: text
      description: "出发城市"
      is_required: true
      extraction_patterns:
        - '从([一-鿿]{2,5})(?:出发|到|去)'
    - name: arrival_city
      type: text
      description: "到达城市"
      is_required: true
      extraction_patterns:
        - '到([一-鿿]{2,5})'
    - name: departure_date
      type: date
      description: "出发日期"
      is_required: true
      extraction_patterns:
        - '(今天|明天|后天|昨天|前天)'
        - '(\d{4}-\d{2}-\d{2})'
    - name: passenger_count
      type: number
      description: "乘机人数"
      is_required: true
      default: "1"
      extraction_patterns:
        - '([一二三四五六七八九十两俩\d]+)(?:个人|人|位|张)'
  book_train:
    - name: departure_city
      type: text
      description: "出发城市"
      is_required: true
      extraction_patterns:
        - '从([一-鿿]{2,5})(?:出发|到|去)'
"#,
    )
    .unwrap();

    let handlers: HandlersConfig = serde_yaml::from_str(
        r#"
handlers:
  book_flight:
    type: mock_service
    service_name: book_flight_service
    delay_ms: 0
    success_rate: 1.0
  book_train:
    type: mock_service
    service_name: book_train_service
    delay_ms: 0
    success_rate: 1.0
  check_balance:
    type: mock_service
    service_name: check_balance_service
    delay_ms: 0
    success_rate: 1.0
  check_statement:
    type: mock_service
    service_name: statement_service
    delay_ms: 0
    success_rate: 0.0
"#,
    )
    .unwrap();

    let templates: TemplatesConfig = serde_yaml::from_str(
        r#"
templates:
  book_flight:
    success: "已为您预订{departure_city}到{arrival_city}的机票，出发日期{departure_date}，{passenger_count}位乘客，订单号{order_id}。"
    confirmation: "请确认预订信息：{departure_city} → {arrival_city}，日期{departure_date}，{passenger_count}人。回复确认提交，修改更改，或取消。"
"#,
    )
    .unwrap();

    MasterDialogueConfig {
        intents,
        slots,
        handlers,
        templates,
    }
}

fn scripted_rules() -> Vec<(&'static str, Vec<(&'static str, f32)>)> {
    vec![
        ("我要订机票", vec![("book_flight", 0.92)]),
        ("订票", vec![("book_flight", 0.72), ("book_train", 0.66)]),
        ("查询余额", vec![("check_balance", 0.92)]),
        ("查流水", vec![("check_statement", 0.90)]),
    ]
}

struct Harness {
    orchestrator: TurnOrchestrator,
    persistence: PersistenceLayer,
}

fn harness() -> Harness {
    let persistence = PersistenceLayer::in_memory();
    let registry = Arc::new(ConfigRegistry::from_config(domain_config()));
    let nlu = Arc::new(NluAdapter::new(
        Arc::new(ScriptedNlu {
            rules: scripted_rules(),
        }),
        Duration::from_secs(5),
    ));

    let orchestrator = TurnOrchestrator::new(OrchestratorDeps {
        registry,
        nlu,
        knowledge_base: None,
        persistence: persistence.clone(),
        settings: OrchestratorSettings::default(),
        handler_settings: HandlerSettings::default(),
        confidence_bands: ConfidenceBands::default(),
    });

    Harness {
        orchestrator,
        persistence,
    }
}

async fn turn(
    harness: &Harness,
    user_id: &str,
    session_id: Option<&str>,
    input: &str,
) -> TurnResult {
    harness
        .orchestrator
        .handle_turn(TurnRequest {
            user_id: user_id.to_string(),
            session_id: session_id.map(|s| s.to_string()),
            input: input.to_string(),
            context: None,
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
        })
        .await
        .expect("turn should not error")
}

fn tomorrow() -> String {
    (chrono::Utc::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

fn day_after_tomorrow() -> String {
    (chrono::Utc::now().date_naive() + chrono::Duration::days(2))
        .format("%Y-%m-%d")
        .to_string()
}

#[tokio::test]
async fn test_happy_path_booking() {
    let harness = harness();

    // Turn 1: intent recognized, no slots yet
    let t1 = turn(&harness, "u_happy", None, "我要订机票").await;
    assert_eq!(t1.status, TurnStatus::Incomplete);
    assert_eq!(t1.response_kind, ResponseKind::SlotPrompt);
    assert_eq!(t1.intent.as_deref(), Some("book_flight"));
    assert_eq!(t1.next_action, NextAction::CollectMissingSlots);
    assert!(t1.missing_slots.contains(&"departure_city".to_string()));
    assert!(t1.missing_slots.contains(&"arrival_city".to_string()));
    assert_eq!(t1.conversation_turn, 1);

    // Turn 2: everything supplied in one utterance, normalized and complete
    let t2 = turn(&harness, "u_happy", Some(&t1.session_id), "从北京到上海,明天一个人").await;
    assert_eq!(t2.status, TurnStatus::AwaitingConfirmation);
    assert_eq!(t2.response_kind, ResponseKind::ConfirmationPrompt);
    assert_eq!(t2.next_action, NextAction::UserConfirmation);
    assert_eq!(t2.slots["departure_city"].value, "北京");
    assert_eq!(t2.slots["arrival_city"].value, "上海");
    assert_eq!(t2.slots["departure_date"].value, tomorrow());
    assert_eq!(t2.slots["passenger_count"].value, "1");
    assert!(t2.response.contains("北京"));

    // Turn 3: confirm and execute
    let t3 = turn(&harness, "u_happy", Some(&t1.session_id), "确认").await;
    assert_eq!(t3.status, TurnStatus::Completed);
    assert_eq!(t3.response_kind, ResponseKind::ApiResult);
    let api_result = t3.api_result.expect("handler result present");
    assert!(!api_result["order_id"].as_str().unwrap().is_empty());
    assert!(t3.response.contains("北京"));
    assert!(t3.response.contains("上海"));
    assert!(t3.response.contains(&tomorrow()));
    assert_eq!(t3.conversation_turn, 3);
}

#[tokio::test]
async fn test_ambiguity_clarified_by_user_choice() {
    let harness = harness();

    let t1 = turn(&harness, "u_choice", None, "订票").await;
    assert_eq!(t1.status, TurnStatus::Ambiguous);
    assert_eq!(t1.response_kind, ResponseKind::Disambiguation);
    assert_eq!(t1.next_action, NextAction::UserChoice);
    assert!(t1.response.contains("1. 预订机票"));
    assert!(t1.response.contains("2. 预订火车票"));
    assert_eq!(t1.ambiguous_intents.len(), 2);

    // Numeric reply picks option 2 and proceeds without re-classification
    let t2 = turn(&harness, "u_choice", Some(&t1.session_id), "2").await;
    assert_eq!(t2.intent.as_deref(), Some("book_train"));
    assert_eq!(t2.status, TurnStatus::Incomplete);
    assert!(t2.missing_slots.contains(&"departure_city".to_string()));
}

#[tokio::test]
async fn test_ambiguity_auto_resolved_by_context() {
    let harness = harness();

    // Establish book_flight as the session's current intent
    let t1 = turn(&harness, "u_ctx", None, "我要订机票").await;
    assert_eq!(t1.status, TurnStatus::Incomplete);

    // Ambiguous follow-up resolves to the in-progress intent, no question
    let t2 = turn(&harness, "u_ctx", Some(&t1.session_id), "订票").await;
    assert_eq!(t2.intent.as_deref(), Some("book_flight"));
    assert_ne!(t2.status, TurnStatus::Ambiguous);
}

#[tokio::test]
async fn test_slot_supplement_across_turns() {
    let harness = harness();

    let t1 = turn(&harness, "u_supp", None, "我要订机票").await;
    assert_eq!(t1.status, TurnStatus::Incomplete);

    // Two of three supplied; arrival_city still missing
    let t2 = turn(&harness, "u_supp", Some(&t1.session_id), "从北京去,明天出发").await;
    assert_eq!(t2.status, TurnStatus::Incomplete);
    assert_eq!(t2.missing_slots, vec!["arrival_city".to_string()]);

    // A bare city name fills the single missing slot without re-running
    // classification
    let t3 = turn(&harness, "u_supp", Some(&t1.session_id), "上海").await;
    assert_eq!(t3.intent.as_deref(), Some("book_flight"));
    assert_eq!(t3.status, TurnStatus::AwaitingConfirmation);
    assert_eq!(t3.slots["arrival_city"].value, "上海");
}

#[tokio::test]
async fn test_correction_before_confirmation() {
    let harness = harness();

    let t1 = turn(&harness, "u_corr", None, "我要订机票").await;
    let t2 = turn(&harness, "u_corr", Some(&t1.session_id), "从北京到上海,明天一个人").await;
    assert_eq!(t2.status, TurnStatus::AwaitingConfirmation);

    // Modify with a concrete new value: date moves, other slots stay
    let t3 = turn(&harness, "u_corr", Some(&t1.session_id), "改成后天").await;
    assert_eq!(t3.status, TurnStatus::AwaitingConfirmation);
    assert_eq!(t3.slots["departure_date"].value, day_after_tomorrow());
    assert_eq!(t3.slots["departure_city"].value, "北京");
    assert_eq!(t3.slots["arrival_city"].value, "上海");

    let history = harness
        .persistence
        .slot_values
        .history(&t1.session_id, "departure_date")
        .await
        .unwrap();
    assert!(history.len() >= 2, "correction preserves the previous row");
}

#[tokio::test]
async fn test_cancel_pending_confirmation() {
    let harness = harness();

    let t1 = turn(&harness, "u_cancel", None, "我要订机票").await;
    let t2 = turn(&harness, "u_cancel", Some(&t1.session_id), "从北京到上海,明天一个人").await;
    assert_eq!(t2.status, TurnStatus::AwaitingConfirmation);

    let t3 = turn(&harness, "u_cancel", Some(&t1.session_id), "算了，取消吧").await;
    assert_eq!(t3.status, TurnStatus::Cancelled);
    assert_eq!(t3.response_kind, ResponseKind::Cancellation);
    assert!(t3.response.contains("预订机票"));
}

#[tokio::test]
async fn test_implicit_confirmation_for_low_risk_read() {
    let harness = harness();

    let t1 = turn(&harness, "u_read", None, "查询余额").await;
    assert_eq!(t1.status, TurnStatus::Completed);
    let api_result = t1.api_result.expect("balance result");
    assert!(api_result["balance"].as_str().is_some());

    // Implicit confirmations are audited
    let audit = harness
        .persistence
        .audit
        .recent(&t1.session_id, 10)
        .await
        .unwrap();
    assert!(audit
        .iter()
        .any(|e| e.event_type == "confirmation" && e.outcome == "implicit"));
}

#[tokio::test]
async fn test_handler_failure_and_retry_recovery() {
    let harness = harness();

    let t1 = turn(&harness, "u_retry", None, "查流水").await;
    assert_eq!(t1.status, TurnStatus::ApiError);
    assert_eq!(t1.next_action, NextAction::Retry);
    assert!(t1.response.contains("再试一次"));

    // Retry phrase re-invokes the handler with the same slots; the scripted
    // service always fails so the status repeats, proving re-invocation
    let t2 = turn(&harness, "u_retry", Some(&t1.session_id), "再试一次").await;
    assert_eq!(t2.intent.as_deref(), Some("check_statement"));
    assert_eq!(t2.status, TurnStatus::ApiError);
}

#[tokio::test]
async fn test_interruption_is_recorded_and_resumed() {
    let harness = harness();

    // Start collecting for book_flight, then barge in with a balance check
    let t1 = turn(&harness, "u_int", None, "我要订机票").await;
    assert_eq!(t1.status, TurnStatus::Incomplete);

    let t2 = turn(&harness, "u_int", Some(&t1.session_id), "查询余额").await;
    assert_eq!(t2.intent.as_deref(), Some("check_balance"));
    assert_eq!(t2.status, TurnStatus::Completed);
    // Completing the interrupting intent resumes the suspended one
    assert!(t2.response.contains("预订机票"));

    // The transfer row is marked resumed, so the stack is empty again
    let stack = harness
        .persistence
        .transfers
        .intent_stack(&t1.session_id)
        .await
        .unwrap();
    assert!(stack.is_empty());

    // The next utterance supplements the resumed intent
    let t3 = turn(&harness, "u_int", Some(&t1.session_id), "从北京到上海,明天一个人").await;
    assert_eq!(t3.intent.as_deref(), Some("book_flight"));
    assert_eq!(t3.status, TurnStatus::AwaitingConfirmation);
}

#[tokio::test]
async fn test_non_intent_input_gets_suggestions() {
    let harness = harness();

    let t1 = turn(&harness, "u_chat", None, "今天天气怎么样").await;
    assert_eq!(t1.status, TurnStatus::NonIntentInput);
    assert_eq!(t1.response_kind, ResponseKind::QaResponse);
    assert!(t1.response.contains("预订机票"));
}

#[tokio::test]
async fn test_session_reuse_and_singleton() {
    let harness = harness();

    let t1 = turn(&harness, "u_sess", None, "我要订机票").await;
    // No session id supplied: the active session is recycled
    let t2 = turn(&harness, "u_sess", None, "从北京到上海,明天一个人").await;
    assert_eq!(t1.session_id, t2.session_id);
    assert_eq!(t2.conversation_turn, 2);
}

#[tokio::test]
async fn test_every_turn_persists_exactly_one_record() {
    let harness = harness();

    let t1 = turn(&harness, "u_p4", None, "我要订机票").await;
    let _t2 = turn(&harness, "u_p4", Some(&t1.session_id), "从北京到上海,明天一个人").await;
    let _t3 = turn(&harness, "u_p4", Some(&t1.session_id), "确认").await;

    let history = harness
        .persistence
        .conversations
        .history(&t1.session_id, 20)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    let turn_ids: Vec<u32> = history.iter().map(|t| t.turn_id).collect();
    assert_eq!(turn_ids, vec![3, 2, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_serialize_per_session() {
    let harness = Arc::new(harness());

    let warmup = turn(&harness, "u_conc", None, "我要订机票").await;
    let session_id = warmup.session_id.clone();

    let h1 = harness.clone();
    let sid1 = session_id.clone();
    let first = tokio::spawn(async move { turn(&h1, "u_conc", Some(&sid1), "从北京到上海,明天一个人").await });
    let h2 = harness.clone();
    let sid2 = session_id.clone();
    let second = tokio::spawn(async move { turn(&h2, "u_conc", Some(&sid2), "查询余额").await });

    let (r1, r2) = (first.await.unwrap(), second.await.unwrap());

    // Strictly monotonic turn ids, no duplicates
    let mut ids = vec![r1.conversation_turn, r2.conversation_turn];
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);

    let history = harness
        .persistence
        .conversations
        .history(&session_id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
}
