//! Domain configuration
//!
//! Config-driven definitions for intents, slot schemas, handler bindings and
//! response templates. Each file loads from YAML; the registry composes them
//! into an immutable snapshot.

pub mod handlers;
pub mod intents;
pub mod master;
pub mod slots;
pub mod templates;

pub use handlers::{HandlerBinding, HandlersConfig, RetryPolicy};
pub use intents::{IntentDefinition, IntentsConfig};
pub use master::MasterDialogueConfig;
pub use slots::{SlotDefinition, SlotType, SlotsConfig, ValidationRules};
pub use templates::{TemplateKind, TemplateSet, TemplatesConfig};

/// Errors when loading domain configuration
#[derive(Debug)]
pub enum DomainConfigError {
    FileNotFound(String, String),
    ParseError(String, String),
    Invalid(String),
}

impl std::fmt::Display for DomainConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileNotFound(path, err) => {
                write!(f, "Domain config not found at {}: {}", path, err)
            }
            Self::ParseError(path, err) => {
                write!(f, "Failed to parse domain config {}: {}", path, err)
            }
            Self::Invalid(msg) => write!(f, "Invalid domain config: {}", msg),
        }
    }
}

impl std::error::Error for DomainConfigError {}
