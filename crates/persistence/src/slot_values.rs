//! Slot value store
//!
//! The authoritative per-conversation slot rows. For each
//! `(session_id, slot_name)` the latest turn's row is the current value;
//! older rows are history and stay queryable. Corrections append a new row
//! with `extraction_method = correction`, they never rewrite the old one.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// How the value entered the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Nlu,
    Regex,
    Default,
    Correction,
    Migration,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nlu => "nlu",
            Self::Regex => "regex",
            Self::Default => "default",
            Self::Correction => "correction",
            Self::Migration => "migration",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "nlu" => Self::Nlu,
            "regex" => Self::Regex,
            "default" => Self::Default,
            "correction" => Self::Correction,
            _ => Self::Migration,
        }
    }
}

/// Validation state of the stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Pending,
    Missing,
    Corrected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Pending => "pending",
            Self::Missing => "missing",
            Self::Corrected => "corrected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            "pending" => Self::Pending,
            "corrected" => Self::Corrected,
            _ => Self::Missing,
        }
    }
}

/// One slot value row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValueRecord {
    pub session_id: String,
    pub slot_name: String,
    /// Turn that produced this row; the latest turn wins per slot name
    pub turn_id: u32,
    pub intent: String,
    pub original_text: String,
    pub extracted_value: String,
    pub normalized_value: String,
    pub confidence: f32,
    pub extraction_method: ExtractionMethod,
    pub validation_status: ValidationStatus,
    pub validation_error: Option<String>,
    pub is_confirmed: bool,
    pub updated_at: DateTime<Utc>,
}

impl SlotValueRecord {
    /// A slot value is usable iff valid and normalized
    pub fn is_valid(&self) -> bool {
        self.validation_status == ValidationStatus::Valid && !self.normalized_value.is_empty()
    }
}

/// Slot value store contract
#[async_trait]
pub trait SlotValueStore: Send + Sync {
    /// Append a row. Appending an existing `(session, slot, turn)` key is a
    /// conflict; re-supplying a slot in a later turn is the normal path.
    async fn append(&self, record: &SlotValueRecord) -> Result<(), PersistenceError>;

    /// Latest row per slot name for the session (the current values)
    async fn current(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, SlotValueRecord>, PersistenceError>;

    /// Full history for one slot, newest first
    async fn history(
        &self,
        session_id: &str,
        slot_name: &str,
    ) -> Result<Vec<SlotValueRecord>, PersistenceError>;

    /// Mark the current rows of the given slots confirmed
    async fn confirm(
        &self,
        session_id: &str,
        slot_names: &[String],
    ) -> Result<(), PersistenceError>;

    /// Cleanup: drop invalid rows older than the cutoff
    async fn delete_invalid_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError>;
}

/// In-memory slot value store
#[derive(Default)]
pub struct InMemorySlotValueStore {
    // session_id -> rows (append order)
    rows: DashMap<String, Vec<SlotValueRecord>>,
}

impl InMemorySlotValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotValueStore for InMemorySlotValueStore {
    async fn append(&self, record: &SlotValueRecord) -> Result<(), PersistenceError> {
        let mut entry = self.rows.entry(record.session_id.clone()).or_default();
        if entry
            .iter()
            .any(|r| r.slot_name == record.slot_name && r.turn_id == record.turn_id)
        {
            return Err(PersistenceError::Conflict(format!(
                "slot {} already written for turn {}",
                record.slot_name, record.turn_id
            )));
        }
        entry.push(record.clone());
        Ok(())
    }

    async fn current(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, SlotValueRecord>, PersistenceError> {
        let mut current: HashMap<String, SlotValueRecord> = HashMap::new();
        if let Some(rows) = self.rows.get(session_id) {
            for row in rows.iter() {
                match current.get(&row.slot_name) {
                    Some(existing) if existing.turn_id >= row.turn_id => {}
                    _ => {
                        current.insert(row.slot_name.clone(), row.clone());
                    }
                }
            }
        }
        Ok(current)
    }

    async fn history(
        &self,
        session_id: &str,
        slot_name: &str,
    ) -> Result<Vec<SlotValueRecord>, PersistenceError> {
        let mut history: Vec<SlotValueRecord> = self
            .rows
            .get(session_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.slot_name == slot_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        history.sort_by(|a, b| b.turn_id.cmp(&a.turn_id));
        Ok(history)
    }

    async fn confirm(
        &self,
        session_id: &str,
        slot_names: &[String],
    ) -> Result<(), PersistenceError> {
        if let Some(mut rows) = self.rows.get_mut(session_id) {
            // Confirm only the latest row per slot
            let latest: HashMap<String, u32> = {
                let mut map = HashMap::new();
                for row in rows.iter() {
                    let entry = map.entry(row.slot_name.clone()).or_insert(row.turn_id);
                    if row.turn_id > *entry {
                        *entry = row.turn_id;
                    }
                }
                map
            };
            for row in rows.iter_mut() {
                if slot_names.contains(&row.slot_name)
                    && latest.get(&row.slot_name) == Some(&row.turn_id)
                {
                    row.is_confirmed = true;
                }
            }
        }
        Ok(())
    }

    async fn delete_invalid_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, PersistenceError> {
        let mut deleted = 0usize;
        for mut entry in self.rows.iter_mut() {
            if deleted >= limit {
                break;
            }
            let mut budget = limit - deleted;
            entry.retain(|r| {
                let drop = budget > 0
                    && r.validation_status == ValidationStatus::Invalid
                    && r.updated_at < cutoff;
                if drop {
                    budget -= 1;
                }
                !drop
            });
            deleted += (limit - deleted) - budget;
        }
        Ok(deleted)
    }
}

/// ScyllaDB slot value store
#[derive(Clone)]
pub struct ScyllaSlotValueStore {
    client: ScyllaClient,
}

impl ScyllaSlotValueStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_record(
        &self,
        row: scylla::frame::response::result::Row,
    ) -> Result<SlotValueRecord, PersistenceError> {
        let (
            session_id,
            slot_name,
            turn_id,
            intent,
            original_text,
            extracted_value,
            normalized_value,
            confidence,
            extraction_method,
            validation_status,
            validation_error,
            is_confirmed,
            updated_at,
        ): (
            String,
            String,
            i32,
            String,
            String,
            String,
            String,
            f64,
            String,
            String,
            Option<String>,
            bool,
            i64,
        ) = row
            .into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        Ok(SlotValueRecord {
            session_id,
            slot_name,
            turn_id: turn_id as u32,
            intent,
            original_text,
            extracted_value,
            normalized_value,
            confidence: confidence as f32,
            extraction_method: ExtractionMethod::from_str(&extraction_method),
            validation_status: ValidationStatus::from_str(&validation_status),
            validation_error,
            is_confirmed,
            updated_at: Utc
                .timestamp_millis_opt(updated_at)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    const COLUMNS: &'static str = "session_id, slot_name, turn_id, intent, original_text, \
        extracted_value, normalized_value, confidence, extraction_method, validation_status, \
        validation_error, is_confirmed, updated_at";
}

#[async_trait]
impl SlotValueStore for ScyllaSlotValueStore {
    async fn append(&self, record: &SlotValueRecord) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.slot_values ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            Self::COLUMNS
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &record.session_id,
                    &record.slot_name,
                    record.turn_id as i32,
                    &record.intent,
                    &record.original_text,
                    &record.extracted_value,
                    &record.normalized_value,
                    record.confidence as f64,
                    record.extraction_method.as_str(),
                    record.validation_status.as_str(),
                    &record.validation_error,
                    record.is_confirmed,
                    record.updated_at.timestamp_millis(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn current(
        &self,
        session_id: &str,
    ) -> Result<HashMap<String, SlotValueRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.slot_values WHERE session_id = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        let mut current: HashMap<String, SlotValueRecord> = HashMap::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let record = self.row_to_record(row)?;
                match current.get(&record.slot_name) {
                    Some(existing) if existing.turn_id >= record.turn_id => {}
                    _ => {
                        current.insert(record.slot_name.clone(), record);
                    }
                }
            }
        }
        Ok(current)
    }

    async fn history(
        &self,
        session_id: &str,
        slot_name: &str,
    ) -> Result<Vec<SlotValueRecord>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.slot_values WHERE session_id = ? AND slot_name = ?",
            Self::COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id, slot_name))
            .await?;

        let mut records = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                records.push(self.row_to_record(row)?);
            }
        }
        Ok(records)
    }

    async fn confirm(
        &self,
        session_id: &str,
        slot_names: &[String],
    ) -> Result<(), PersistenceError> {
        let current = self.current(session_id).await?;
        for name in slot_names {
            if let Some(record) = current.get(name) {
                let query = format!(
                    "UPDATE {}.slot_values SET is_confirmed = true, updated_at = ?
                     WHERE session_id = ? AND slot_name = ? AND turn_id = ?",
                    self.client.keyspace()
                );
                self.client
                    .session()
                    .query_unpaged(
                        query,
                        (
                            Utc::now().timestamp_millis(),
                            session_id,
                            name,
                            record.turn_id as i32,
                        ),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete_invalid_older_than(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<usize, PersistenceError> {
        // Scylla deployments rely on table TTL for retention.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(slot: &str, turn: u32, value: &str, method: ExtractionMethod) -> SlotValueRecord {
        SlotValueRecord {
            session_id: "s1".to_string(),
            slot_name: slot.to_string(),
            turn_id: turn,
            intent: "book_flight".to_string(),
            original_text: value.to_string(),
            extracted_value: value.to_string(),
            normalized_value: value.to_string(),
            confidence: 0.9,
            extraction_method: method,
            validation_status: ValidationStatus::Valid,
            validation_error: None,
            is_confirmed: false,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_row_wins() {
        let store = InMemorySlotValueStore::new();
        store
            .append(&row("departure_date", 2, "2024-03-16", ExtractionMethod::Nlu))
            .await
            .unwrap();
        store
            .append(&row("departure_date", 4, "2024-03-17", ExtractionMethod::Correction))
            .await
            .unwrap();

        let current = store.current("s1").await.unwrap();
        let value = &current["departure_date"];
        assert_eq!(value.normalized_value, "2024-03-17");
        assert_eq!(value.extraction_method, ExtractionMethod::Correction);

        // History preserves the older row
        let history = store.history("s1", "departure_date").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].turn_id, 4);
        assert_eq!(history[1].turn_id, 2);
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let store = InMemorySlotValueStore::new();
        store
            .append(&row("city", 1, "北京", ExtractionMethod::Nlu))
            .await
            .unwrap();
        let result = store.append(&row("city", 1, "上海", ExtractionMethod::Nlu)).await;
        assert!(matches!(result, Err(PersistenceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_confirm_only_latest() {
        let store = InMemorySlotValueStore::new();
        store.append(&row("city", 1, "北京", ExtractionMethod::Nlu)).await.unwrap();
        store
            .append(&row("city", 3, "上海", ExtractionMethod::Correction))
            .await
            .unwrap();

        store.confirm("s1", &["city".to_string()]).await.unwrap();

        let history = store.history("s1", "city").await.unwrap();
        assert!(history[0].is_confirmed); // turn 3
        assert!(!history[1].is_confirmed); // turn 1
    }

    #[tokio::test]
    async fn test_delete_invalid_rows() {
        let store = InMemorySlotValueStore::new();
        let mut invalid = row("email", 1, "not-an-email", ExtractionMethod::Nlu);
        invalid.validation_status = ValidationStatus::Invalid;
        invalid.updated_at = Utc::now() - chrono::Duration::days(60);
        store.append(&invalid).await.unwrap();
        store.append(&row("city", 2, "北京", ExtractionMethod::Nlu)).await.unwrap();

        let deleted = store
            .delete_invalid_older_than(Utc::now() - chrono::Duration::days(30), 10)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.current("s1").await.unwrap().len(), 1);
    }
}
