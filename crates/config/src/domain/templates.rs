//! Response template configuration
//!
//! Templates recognize `{variable}` placeholders substituted from slot values
//! and handler output. Unknown tokens are left verbatim by the renderer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::DomainConfigError;

/// Template kinds an intent may define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Success,
    Failure,
    Confirmation,
    SlotPrompt,
}

/// Per-intent template set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSet {
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub confirmation: Option<String>,
    #[serde(default)]
    pub slot_prompt: Option<String>,
}

impl TemplateSet {
    pub fn get(&self, kind: TemplateKind) -> Option<&str> {
        match kind {
            TemplateKind::Success => self.success.as_deref(),
            TemplateKind::Failure => self.failure.as_deref(),
            TemplateKind::Confirmation => self.confirmation.as_deref(),
            TemplateKind::SlotPrompt => self.slot_prompt.as_deref(),
        }
    }
}

/// Templates loaded from templates.yaml, keyed by intent name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default)]
    pub templates: HashMap<String, TemplateSet>,
    /// Generic fallbacks when an intent defines no template of a kind
    #[serde(default = "default_generic_success")]
    pub generic_success: String,
    #[serde(default = "default_generic_failure")]
    pub generic_failure: String,
    #[serde(default = "default_generic_confirmation")]
    pub generic_confirmation: String,
}

fn default_generic_success() -> String {
    "操作已完成。".to_string()
}

fn default_generic_failure() -> String {
    "操作失败：{error_message}。请稍后重试。".to_string()
}

fn default_generic_confirmation() -> String {
    "请确认以下信息是否正确？回复\"确认\"继续，\"修改\"重新填写，或\"取消\"。".to_string()
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
            generic_success: default_generic_success(),
            generic_failure: default_generic_failure(),
            generic_confirmation: default_generic_confirmation(),
        }
    }
}

impl TemplatesConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DomainConfigError::FileNotFound(path.as_ref().display().to_string(), e.to_string())
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            DomainConfigError::ParseError(path.as_ref().display().to_string(), e.to_string())
        })
    }

    /// Template for an intent and kind, falling back to the generic one.
    /// Returns `(template, is_generic)` — the dispatcher uses `is_generic` to
    /// decide whether a built-in per-intent formatter should apply instead.
    pub fn template(&self, intent: &str, kind: TemplateKind) -> (&str, bool) {
        if let Some(set) = self.templates.get(intent) {
            if let Some(template) = set.get(kind) {
                return (template, false);
            }
        }
        let generic = match kind {
            TemplateKind::Success => self.generic_success.as_str(),
            TemplateKind::Failure => self.generic_failure.as_str(),
            TemplateKind::Confirmation | TemplateKind::SlotPrompt => {
                self.generic_confirmation.as_str()
            }
        };
        (generic, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_lookup_with_fallback() {
        let yaml = r#"
templates:
  book_flight:
    success: "已为您预订{departure_city}到{arrival_city}的机票，订单号{order_id}。"
    confirmation: "请确认：{departure_city} → {arrival_city}，{departure_date}，{passenger_count}人。"
"#;
        let config: TemplatesConfig = serde_yaml::from_str(yaml).unwrap();

        let (success, generic) = config.template("book_flight", TemplateKind::Success);
        assert!(success.contains("{order_id}"));
        assert!(!generic);

        // No failure template defined: generic applies
        let (failure, generic) = config.template("book_flight", TemplateKind::Failure);
        assert!(failure.contains("{error_message}"));
        assert!(generic);

        // Unknown intent: generic applies
        let (_, generic) = config.template("unknown", TemplateKind::Success);
        assert!(generic);
    }
}
