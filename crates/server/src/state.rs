//! Application state
//!
//! Shared across all handlers. Settings sit behind an `RwLock` for
//! hot-reload; the domain config registry hands out copy-on-write
//! snapshots of its own.

use parking_lot::RwLock;
use std::sync::Arc;

use dialogue_config::{load_settings, ConfigRegistry, Settings};
use dialogue_engine::TurnOrchestrator;
use dialogue_persistence::PersistenceLayer;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub registry: Arc<ConfigRegistry>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub persistence: PersistenceLayer,
    /// Environment name, kept for settings reload
    env: Option<String>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        registry: Arc<ConfigRegistry>,
        orchestrator: Arc<TurnOrchestrator>,
        persistence: PersistenceLayer,
        env: Option<String>,
    ) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            registry,
            orchestrator,
            persistence,
            env,
        }
    }

    /// Re-read settings from disk and swap them in. Structural settings
    /// (bind address, CORS) only apply at startup.
    pub fn reload_settings(&self) -> Result<(), String> {
        let fresh = load_settings(self.env.as_deref())
            .map_err(|e| format!("Failed to reload settings: {}", e))?;
        *self.settings.write() = fresh;
        tracing::info!("Settings reloaded");
        Ok(())
    }

    /// Reload the domain configuration (intents, slots, handlers,
    /// templates); bumps the registry version and invalidates snapshots.
    pub fn reload_domain_config(&self) -> Result<u64, String> {
        self.registry
            .reload()
            .map_err(|e| format!("Failed to reload domain config: {}", e))
    }

    pub fn get_settings(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.settings.read()
    }
}
