//! Config registry
//!
//! Serves immutable snapshots of the domain configuration. Readers clone an
//! `Arc<ConfigSnapshot>` and never observe a partially applied change; a
//! reload builds a fresh snapshot with a bumped version and swaps it in.
//! Reads are lock-free after warm-up in the sense that no reader ever blocks
//! a writer for longer than the pointer swap.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::domain::{
    DomainConfigError, HandlerBinding, IntentDefinition, MasterDialogueConfig, SlotDefinition,
    TemplateKind,
};

/// One immutable configuration snapshot
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub version: u64,
    config: MasterDialogueConfig,
}

impl ConfigSnapshot {
    /// Active intent definitions
    pub fn active_intents(&self) -> Vec<&IntentDefinition> {
        self.config.intents.active_intents()
    }

    pub fn intent(&self, name: &str) -> Option<&IntentDefinition> {
        self.config.intents.get_intent(name).filter(|i| i.is_active)
    }

    pub fn slots(&self, intent: &str) -> &[SlotDefinition] {
        self.config.slots.slots(intent)
    }

    pub fn slot(&self, intent: &str, slot_name: &str) -> Option<&SlotDefinition> {
        self.config.slots.get_slot(intent, slot_name)
    }

    pub fn required_slots(&self, intent: &str) -> Vec<&str> {
        self.config.slots.required_slots(intent)
    }

    /// Intents sharing a slot name, for cross-intent inheritance
    pub fn intents_with_slot(&self, slot_name: &str) -> Vec<&str> {
        self.config.slots.intents_with_slot(slot_name)
    }

    pub fn handler(&self, intent: &str) -> Option<&HandlerBinding> {
        self.config.handlers.binding(intent)
    }

    /// `(template, is_generic)`
    pub fn template(&self, intent: &str, kind: TemplateKind) -> (&str, bool) {
        self.config.templates.template(intent, kind)
    }

    /// Effective confidence threshold for an intent
    pub fn threshold_for(&self, intent: &str) -> f32 {
        self.config.intents.threshold_for(intent)
    }
}

/// Process-wide registry with explicit init and reload
pub struct ConfigRegistry {
    current: RwLock<Arc<ConfigSnapshot>>,
    source_dir: Option<String>,
}

impl ConfigRegistry {
    /// Build from an already-loaded master config (tests, embedded configs)
    pub fn from_config(config: MasterDialogueConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot { version: 1, config })),
            source_dir: None,
        }
    }

    /// Build from a domain config directory; remembers the path for reloads
    pub fn from_dir(dir: &str) -> Result<Self, DomainConfigError> {
        let config = MasterDialogueConfig::load_dir(dir)?;
        Ok(Self {
            current: RwLock::new(Arc::new(ConfigSnapshot { version: 1, config })),
            source_dir: Some(dir.to_string()),
        })
    }

    /// Current snapshot. Callers hold the `Arc` for the duration of a turn so
    /// config is immutable within it.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Re-read the source directory and swap the snapshot in. Invalidation
    /// event for every cached key: the version bump tells caches to drop
    /// derived state.
    pub fn reload(&self) -> Result<u64, DomainConfigError> {
        let dir = self.source_dir.as_deref().ok_or_else(|| {
            DomainConfigError::Invalid("registry was built without a source directory".to_string())
        })?;
        let config = MasterDialogueConfig::load_dir(dir)?;
        let mut guard = self.current.write();
        let version = guard.version + 1;
        *guard = Arc::new(ConfigSnapshot { version, config });
        tracing::info!(version, "Domain configuration reloaded");
        Ok(version)
    }

    /// Swap in a new config directly (admin-driven updates in tests)
    pub fn replace(&self, config: MasterDialogueConfig) -> u64 {
        let mut guard = self.current.write();
        let version = guard.version + 1;
        *guard = Arc::new(ConfigSnapshot { version, config });
        version
    }
}
