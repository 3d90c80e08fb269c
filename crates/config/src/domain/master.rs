//! Composed domain configuration
//!
//! Loads the four domain config files from one directory and validates the
//! cross-references between them (every intent with required slots has slot
//! definitions, every handler binding points at a known intent).

use std::path::Path;

use super::{
    DomainConfigError, HandlersConfig, IntentsConfig, SlotsConfig, TemplatesConfig,
};

/// All domain configuration for one deployment
#[derive(Debug, Clone, Default)]
pub struct MasterDialogueConfig {
    pub intents: IntentsConfig,
    pub slots: SlotsConfig,
    pub handlers: HandlersConfig,
    pub templates: TemplatesConfig,
}

impl MasterDialogueConfig {
    /// Load intents.yaml / slots.yaml / handlers.yaml / templates.yaml from
    /// `dir`. Missing slots/handlers/templates files degrade to empty configs
    /// so a minimal deployment only needs intents.yaml.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, DomainConfigError> {
        let dir = dir.as_ref();

        let intents = IntentsConfig::load(dir.join("intents.yaml"))?;
        let slots = match SlotsConfig::load(dir.join("slots.yaml")) {
            Ok(slots) => slots,
            Err(DomainConfigError::FileNotFound(..)) => SlotsConfig::default(),
            Err(e) => return Err(e),
        };
        let handlers = match HandlersConfig::load(dir.join("handlers.yaml")) {
            Ok(handlers) => handlers,
            Err(DomainConfigError::FileNotFound(..)) => HandlersConfig::default(),
            Err(e) => return Err(e),
        };
        let templates = match TemplatesConfig::load(dir.join("templates.yaml")) {
            Ok(templates) => templates,
            Err(DomainConfigError::FileNotFound(..)) => TemplatesConfig::default(),
            Err(e) => return Err(e),
        };

        let config = Self {
            intents,
            slots,
            handlers,
            templates,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference checks between the four files.
    pub fn validate(&self) -> Result<(), DomainConfigError> {
        for (intent, _) in &self.slots.intents {
            if !self.intents.has_intent(intent) {
                return Err(DomainConfigError::Invalid(format!(
                    "slots.yaml references unknown intent '{}'",
                    intent
                )));
            }
        }
        for intent in self.handlers.handlers.keys() {
            if !self.intents.has_intent(intent) {
                return Err(DomainConfigError::Invalid(format!(
                    "handlers.yaml references unknown intent '{}'",
                    intent
                )));
            }
        }
        for definition in &self.intents.intents {
            if let Some(threshold) = definition.confidence_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(DomainConfigError::Invalid(format!(
                        "intent '{}' threshold {} outside [0, 1]",
                        definition.name, threshold
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntentDefinition;

    fn intent(name: &str) -> IntentDefinition {
        IntentDefinition {
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            confidence_threshold: None,
            priority: 0,
            category: String::new(),
            is_active: true,
            examples: Vec::new(),
            fallback_response: None,
            action_class: "read".to_string(),
        }
    }

    #[test]
    fn test_validate_detects_orphan_slot_intent() {
        let mut config = MasterDialogueConfig::default();
        config.intents.intents.push(intent("book_flight"));
        config.slots.intents.insert("book_train".to_string(), Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_detects_bad_threshold() {
        let mut config = MasterDialogueConfig::default();
        let mut definition = intent("book_flight");
        definition.confidence_threshold = Some(1.5);
        config.intents.intents.push(definition);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ok() {
        let mut config = MasterDialogueConfig::default();
        config.intents.intents.push(intent("book_flight"));
        config.slots.intents.insert("book_flight".to_string(), Vec::new());
        assert!(config.validate().is_ok());
    }
}
