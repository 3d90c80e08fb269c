//! Slot store mediation
//!
//! The transformer is the single crossing point between the three slot
//! representations: wire (`SlotPayload`), store (`SlotValueRecord`) and
//! cache (compact per-session JSON). Ad-hoc conversions anywhere else are
//! forbidden; divergence between the three is exactly the bug class this
//! module exists to prevent.
//!
//! The tracker wraps the authoritative store with merge, correction and
//! completeness semantics. Inheritance across intents falls out of the
//! store keying: slot rows are per `(session, slot_name)` regardless of the
//! intent that wrote them, so a same-named slot of a newly recognized
//! intent sees the prior value; values written in the current turn override
//! by the latest-turn-wins rule.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use dialogue_config::SlotDefinition;
use dialogue_core::SlotPayload;
use dialogue_persistence::{
    ExtractionMethod, PersistenceError, SessionCache, SlotValueRecord, SlotValueStore,
    ValidationStatus,
};
use dialogue_text::{normalize_value, Normalized};

const SLOTS_CACHE_KEY: &str = "slots";

/// Wire/store/cache conversions
pub struct SlotTransformer;

impl SlotTransformer {
    /// Build the authoritative row for one extracted value, applying
    /// type-directed normalization against the turn-start wall clock.
    #[allow(clippy::too_many_arguments)]
    pub fn to_record(
        session_id: &str,
        turn_id: u32,
        intent: &str,
        definition: &SlotDefinition,
        original_text: &str,
        extracted_value: &str,
        confidence: f32,
        method: ExtractionMethod,
        today: NaiveDate,
    ) -> SlotValueRecord {
        let normalized = normalize_value(
            definition.slot_type,
            extracted_value,
            &definition.validation,
            today,
        );

        let (normalized_value, validation_status, validation_error) = match &normalized {
            Normalized::Valid(value) => (value.clone(), ValidationStatus::Valid, None),
            Normalized::Pending(value) => (value.clone(), ValidationStatus::Pending, None),
            Normalized::Invalid { value, error } => {
                (value.clone(), ValidationStatus::Invalid, Some(error.clone()))
            }
        };

        SlotValueRecord {
            session_id: session_id.to_string(),
            slot_name: definition.name.clone(),
            turn_id,
            intent: intent.to_string(),
            original_text: original_text.to_string(),
            extracted_value: extracted_value.to_string(),
            normalized_value,
            confidence,
            extraction_method: method,
            validation_status,
            validation_error,
            is_confirmed: false,
            updated_at: Utc::now(),
        }
    }

    /// Store row → wire payload
    pub fn to_payload(record: &SlotValueRecord) -> SlotPayload {
        SlotPayload::new(&record.slot_name, &record.normalized_value)
            .with_confidence(record.confidence)
            .with_source(record.extraction_method.as_str())
            .with_original_text(&record.original_text)
    }

    /// Store rows → compact cache entry
    pub fn to_cache_entry(current: &HashMap<String, SlotValueRecord>) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = current
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "value": record.extracted_value,
                        "normalized": record.normalized_value,
                        "confidence": record.confidence,
                        "status": record.validation_status.as_str(),
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Wire snapshot for the response envelope
    pub fn to_wire_snapshot(
        current: &HashMap<String, SlotValueRecord>,
    ) -> HashMap<String, SlotPayload> {
        current
            .iter()
            .map(|(name, record)| (name.clone(), Self::to_payload(record)))
            .collect()
    }
}

/// Authoritative slot state for one session, cache-fronted
pub struct SlotTracker {
    store: Arc<dyn SlotValueStore>,
    cache: Arc<SessionCache>,
}

impl SlotTracker {
    pub fn new(store: Arc<dyn SlotValueStore>, cache: Arc<SessionCache>) -> Self {
        Self { store, cache }
    }

    /// Current slot values for the session (latest row per name).
    /// The cache entry is reconstructed from the store on miss.
    pub async fn current(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, SlotValueRecord>, PersistenceError> {
        let current = self.store.current(session_id).await?;
        if self.cache.get(session_id, SLOTS_CACHE_KEY).is_none() {
            self.cache.put(
                session_id,
                SLOTS_CACHE_KEY,
                SlotTransformer::to_cache_entry(&current),
            );
        }
        Ok(current)
    }

    /// Write this turn's rows. A value differing from the current one for
    /// the same slot is recorded as a correction; the previous row remains
    /// as history. The cache entry is refreshed before the caller can emit
    /// a response.
    pub async fn write_turn(
        &self,
        session_id: &str,
        mut records: Vec<SlotValueRecord>,
    ) -> Result<HashMap<String, SlotValueRecord>, PersistenceError> {
        let existing = self.store.current(session_id).await?;

        for record in records.iter_mut() {
            if let Some(previous) = existing.get(&record.slot_name) {
                if previous.normalized_value != record.normalized_value
                    && record.extraction_method != ExtractionMethod::Default
                {
                    record.extraction_method = ExtractionMethod::Correction;
                    tracing::debug!(
                        session_id = %session_id,
                        slot = %record.slot_name,
                        old = %previous.normalized_value,
                        new = %record.normalized_value,
                        "Slot correction"
                    );
                }
            }
        }

        for record in &records {
            self.store.append(record).await?;
        }

        let current = self.store.current(session_id).await?;
        self.cache.invalidate(session_id, SLOTS_CACHE_KEY, "slot_write");
        self.cache.put(
            session_id,
            SLOTS_CACHE_KEY,
            SlotTransformer::to_cache_entry(&current),
        );
        Ok(current)
    }

    /// Mark the current rows of the given slots confirmed.
    pub async fn confirm(
        &self,
        session_id: &str,
        slot_names: &[String],
    ) -> Result<(), PersistenceError> {
        self.store.confirm(session_id, slot_names).await?;
        self.cache.invalidate(session_id, SLOTS_CACHE_KEY, "slot_confirm");
        Ok(())
    }

    /// Merge semantics: `new` overwrites by slot name, keys only in
    /// `existing` are preserved. Pure; used to compute the working snapshot
    /// before anything is written.
    pub fn merge(
        existing: &HashMap<String, SlotValueRecord>,
        new: &[SlotValueRecord],
    ) -> HashMap<String, SlotValueRecord> {
        let mut merged = existing.clone();
        for record in new {
            merged.insert(record.slot_name.clone(), record.clone());
        }
        merged
    }

    /// Required slots with no valid value in the snapshot.
    pub fn missing_required(
        snapshot: &HashMap<String, SlotValueRecord>,
        definitions: &[SlotDefinition],
    ) -> Vec<String> {
        definitions
            .iter()
            .filter(|d| d.is_required)
            .filter(|d| snapshot.get(&d.name).map(|r| !r.is_valid()).unwrap_or(true))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Validation errors present in the snapshot, keyed by slot name.
    pub fn validation_errors(
        snapshot: &HashMap<String, SlotValueRecord>,
    ) -> HashMap<String, String> {
        snapshot
            .iter()
            .filter_map(|(name, record)| {
                record
                    .validation_error
                    .as_ref()
                    .map(|error| (name.clone(), error.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_config::{SlotType, ValidationRules};
    use dialogue_persistence::InMemorySlotValueStore;

    fn definition(name: &str, slot_type: SlotType, required: bool) -> SlotDefinition {
        SlotDefinition {
            name: name.to_string(),
            slot_type,
            description: name.to_string(),
            is_required: required,
            validation: ValidationRules::default(),
            default: None,
            prompt_template: None,
            extraction_patterns: Vec::new(),
            values: Vec::new(),
        }
    }

    fn tracker() -> SlotTracker {
        SlotTracker::new(
            Arc::new(InMemorySlotValueStore::new()),
            Arc::new(SessionCache::new()),
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_record_normalization_and_status() {
        let date_def = definition("departure_date", SlotType::Date, true);
        let record = SlotTransformer::to_record(
            "s1", 1, "book_flight", &date_def, "明天", "明天", 0.9,
            ExtractionMethod::Nlu, today(),
        );
        assert_eq!(record.normalized_value, "2024-03-16");
        assert_eq!(record.validation_status, ValidationStatus::Valid);
        assert!(record.is_valid());

        let bad = SlotTransformer::to_record(
            "s1", 1, "book_flight", &date_def, "下周五", "下周五", 0.9,
            ExtractionMethod::Nlu, today(),
        );
        assert_eq!(bad.validation_status, ValidationStatus::Pending);
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_wire_round_trip_preserves_fields() {
        let def = definition("departure_city", SlotType::Text, true);
        let record = SlotTransformer::to_record(
            "s1", 1, "book_flight", &def, "从北京出发", "北京", 0.92,
            ExtractionMethod::Nlu, today(),
        );
        let payload = SlotTransformer::to_payload(&record);
        assert_eq!(payload.name, "departure_city");
        assert_eq!(payload.value, "北京");
        assert_eq!(payload.confidence, Some(0.92));
        assert_eq!(payload.source.as_deref(), Some("nlu"));
        assert_eq!(payload.original_text.as_deref(), Some("从北京出发"));
    }

    #[tokio::test]
    async fn test_write_turn_marks_corrections() {
        let tracker = tracker();
        let def = definition("departure_date", SlotType::Date, true);

        let first = SlotTransformer::to_record(
            "s1", 1, "book_flight", &def, "明天", "明天", 0.9,
            ExtractionMethod::Nlu, today(),
        );
        tracker.write_turn("s1", vec![first]).await.unwrap();

        let second = SlotTransformer::to_record(
            "s1", 2, "book_flight", &def, "改成后天", "后天", 0.9,
            ExtractionMethod::Nlu, today(),
        );
        let current = tracker.write_turn("s1", vec![second]).await.unwrap();

        let record = &current["departure_date"];
        assert_eq!(record.normalized_value, "2024-03-17");
        assert_eq!(record.extraction_method, ExtractionMethod::Correction);
    }

    #[tokio::test]
    async fn test_merge_preserves_existing_keys() {
        let def_a = definition("departure_city", SlotType::Text, true);
        let def_b = definition("arrival_city", SlotType::Text, true);

        let existing: HashMap<String, SlotValueRecord> = [(
            "departure_city".to_string(),
            SlotTransformer::to_record(
                "s1", 1, "book_flight", &def_a, "北京", "北京", 0.9,
                ExtractionMethod::Nlu, today(),
            ),
        )]
        .into();

        let incoming = vec![SlotTransformer::to_record(
            "s1", 2, "book_flight", &def_b, "上海", "上海", 0.9,
            ExtractionMethod::Nlu, today(),
        )];

        let merged = SlotTracker::merge(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["departure_city"].normalized_value, "北京");
        assert_eq!(merged["arrival_city"].normalized_value, "上海");
    }

    #[tokio::test]
    async fn test_missing_required_counts_invalid_values() {
        let defs = vec![
            definition("departure_city", SlotType::Text, true),
            definition("contact_email", SlotType::Email, true),
            definition("note", SlotType::Text, false),
        ];

        let mut snapshot: HashMap<String, SlotValueRecord> = HashMap::new();
        snapshot.insert(
            "departure_city".to_string(),
            SlotTransformer::to_record(
                "s1", 1, "book_flight", &defs[0], "北京", "北京", 0.9,
                ExtractionMethod::Nlu, today(),
            ),
        );
        snapshot.insert(
            "contact_email".to_string(),
            SlotTransformer::to_record(
                "s1", 1, "book_flight", &defs[1], "oops", "oops", 0.9,
                ExtractionMethod::Nlu, today(),
            ),
        );

        let missing = SlotTracker::missing_required(&snapshot, &defs);
        assert_eq!(missing, vec!["contact_email".to_string()]);

        let errors = SlotTracker::validation_errors(&snapshot);
        assert!(errors.contains_key("contact_email"));
    }

    #[tokio::test]
    async fn test_cross_intent_inheritance_via_shared_names() {
        let tracker = tracker();
        let flight_city = definition("departure_city", SlotType::Text, true);

        let record = SlotTransformer::to_record(
            "s1", 1, "book_flight", &flight_city, "北京", "北京", 0.9,
            ExtractionMethod::Nlu, today(),
        );
        tracker.write_turn("s1", vec![record]).await.unwrap();

        // A train booking recognized later sees the same-named slot
        let current = tracker.current("s1").await.unwrap();
        let train_defs = vec![definition("departure_city", SlotType::Text, true)];
        let missing = SlotTracker::missing_required(&current, &train_defs);
        assert!(missing.is_empty());
    }
}
