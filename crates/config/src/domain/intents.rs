//! Intent configuration
//!
//! Intent definitions are loaded from domain config files instead of being
//! hardcoded. Definitions are immutable during a turn; changes go through the
//! registry, which swaps the whole snapshot.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::DomainConfigError;

/// Intents configuration loaded from intents.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentsConfig {
    #[serde(default)]
    pub intents: Vec<IntentDefinition>,
    /// Global confidence floor for intents without a per-intent threshold
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 {
    0.70
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            intents: Vec::new(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl IntentsConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DomainConfigError::FileNotFound(path.as_ref().display().to_string(), e.to_string())
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            DomainConfigError::ParseError(path.as_ref().display().to_string(), e.to_string())
        })
    }

    /// Get an intent definition by name
    pub fn get_intent(&self, name: &str) -> Option<&IntentDefinition> {
        self.intents.iter().find(|i| i.name == name)
    }

    /// Active intent definitions
    pub fn active_intents(&self) -> Vec<&IntentDefinition> {
        self.intents.iter().filter(|i| i.is_active).collect()
    }

    pub fn has_intent(&self, name: &str) -> bool {
        self.intents.iter().any(|i| i.name == name)
    }

    /// Effective confidence threshold for an intent: per-intent value if set,
    /// else the global floor.
    pub fn threshold_for(&self, name: &str) -> f32 {
        self.get_intent(name)
            .and_then(|i| i.confidence_threshold)
            .unwrap_or(self.min_confidence)
    }
}

/// Single intent definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDefinition {
    /// Intent name (identifier, unique)
    pub name: String,
    /// Human-readable name shown in disambiguation options
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Per-intent confidence threshold; falls back to the global floor
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    /// Tie-break after confidence when ranking candidates
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Example utterances for matching and keyword fallback
    #[serde(default)]
    pub examples: Vec<String>,
    /// Canned answer when this intent cannot be served
    #[serde(default)]
    pub fallback_response: Option<String>,
    /// Action class driving confirmation risk: read, write, monetary
    #[serde(default = "default_action_class")]
    pub action_class: String,
}

fn default_active() -> bool {
    true
}

fn default_action_class() -> String {
    "read".to_string()
}

impl IntentDefinition {
    /// Whether this intent mutates external state (write or monetary).
    pub fn is_write_action(&self) -> bool {
        matches!(self.action_class.as_str(), "write" | "monetary")
    }
}
