//! Configuration for the dialogue orchestrator
//!
//! Two layers:
//! - `Settings`: process configuration loaded from `config/default.yaml`,
//!   an optional `config/{env}.yaml` overlay, and `DIALOGUE__*` environment
//!   variables.
//! - Domain configuration: intents, slot schemas, handler bindings and
//!   response templates, loaded from YAML and served through the
//!   `ConfigRegistry` as immutable versioned snapshots.

pub mod domain;
pub mod registry;
pub mod settings;

pub use domain::{
    DomainConfigError, HandlerBinding, HandlersConfig, IntentDefinition, IntentsConfig,
    MasterDialogueConfig, RetryPolicy, SlotDefinition, SlotType, SlotsConfig, TemplateKind,
    TemplatesConfig, ValidationRules,
};
pub use registry::{ConfigRegistry, ConfigSnapshot};
pub use settings::{
    load_settings, CleanupSettings, HandlerSettings, KnowledgeBaseSettings, NluSettings,
    OrchestratorSettings, PersistenceSettings, ServerSettings, Settings,
};
