//! Slot schema configuration
//!
//! Slot definitions are children of intents: slot names are unique per
//! intent. Extraction patterns drive the heuristic extractor when the NLU
//! returns no entity for a required slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::DomainConfigError;

/// Slot schema loaded from slots.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotsConfig {
    /// Slot definitions keyed by intent name
    #[serde(default)]
    pub intents: HashMap<String, Vec<SlotDefinition>>,
}

impl SlotsConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DomainConfigError::FileNotFound(path.as_ref().display().to_string(), e.to_string())
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            DomainConfigError::ParseError(path.as_ref().display().to_string(), e.to_string())
        })
    }

    /// All slots for an intent
    pub fn slots(&self, intent: &str) -> &[SlotDefinition] {
        self.intents.get(intent).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// One slot of an intent by name
    pub fn get_slot(&self, intent: &str, slot_name: &str) -> Option<&SlotDefinition> {
        self.slots(intent).iter().find(|s| s.name == slot_name)
    }

    /// Required slot names for an intent
    pub fn required_slots(&self, intent: &str) -> Vec<&str> {
        self.slots(intent)
            .iter()
            .filter(|s| s.is_required)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Intents that declare a slot with this name (inheritance candidates)
    pub fn intents_with_slot(&self, slot_name: &str) -> Vec<&str> {
        self.intents
            .iter()
            .filter(|(_, slots)| slots.iter().any(|s| s.name == slot_name))
            .map(|(intent, _)| intent.as_str())
            .collect()
    }
}

/// Definition for a single slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default)]
    pub default: Option<String>,
    /// Question asked when the slot is missing; `{slot}` expands to the
    /// description
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Regex patterns for heuristic extraction from raw input
    #[serde(default)]
    pub extraction_patterns: Vec<String>,
    /// Allowed values (enum type)
    #[serde(default)]
    pub values: Vec<String>,
}

impl SlotDefinition {
    /// Prompt for this slot when it is missing.
    pub fn prompt(&self) -> String {
        if let Some(template) = &self.prompt_template {
            return template.replace("{slot}", &self.description);
        }
        let what = if self.description.is_empty() {
            self.name.replace('_', " ")
        } else {
            self.description.clone()
        };
        format!("请提供{}。", what)
    }
}

/// Slot type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Text,
    Number,
    Date,
    Email,
    Phone,
    Enum,
}

impl SlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Enum => "enum",
        }
    }
}

/// Validation rules attached to a slot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SlotsConfig {
        let yaml = r#"
intents:
  book_flight:
    - name: departure_city
      type: text
      description: "出发城市"
      is_required: true
      validation:
        min_length: 2
        max_length: 20
    - name: arrival_city
      type: text
      description: "到达城市"
      is_required: true
    - name: departure_date
      type: date
      description: "出发日期"
      is_required: true
      extraction_patterns:
        - "(今天|明天|后天|昨天|前天)"
        - "(\\d{4}-\\d{2}-\\d{2})"
    - name: passenger_count
      type: number
      description: "乘机人数"
      is_required: true
      default: "1"
      validation:
        min: 1
        max: 9
  book_train:
    - name: departure_city
      type: text
      description: "出发城市"
      is_required: true
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_slot_lookup() {
        let config = sample_config();
        assert_eq!(config.slots("book_flight").len(), 4);
        assert!(config.get_slot("book_flight", "departure_date").is_some());
        assert!(config.get_slot("book_flight", "missing").is_none());
        assert!(config.slots("unknown_intent").is_empty());
    }

    #[test]
    fn test_required_slots() {
        let config = sample_config();
        let required = config.required_slots("book_flight");
        assert_eq!(required.len(), 4);
        assert!(required.contains(&"passenger_count"));
    }

    #[test]
    fn test_shared_slot_names_across_intents() {
        let config = sample_config();
        let mut intents = config.intents_with_slot("departure_city");
        intents.sort_unstable();
        assert_eq!(intents, vec!["book_flight", "book_train"]);
    }

    #[test]
    fn test_slot_prompt() {
        let config = sample_config();
        let slot = config.get_slot("book_flight", "departure_city").unwrap();
        assert_eq!(slot.prompt(), "请提供出发城市。");
    }

    #[test]
    fn test_slot_type_deserialization() {
        let yaml = r#"
intents:
  contact:
    - name: email
      type: email
    - name: phone
      type: phone
"#;
        let config: SlotsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.get_slot("contact", "email").unwrap().slot_type, SlotType::Email);
        assert_eq!(config.get_slot("contact", "phone").unwrap().slot_type, SlotType::Phone);
    }
}
