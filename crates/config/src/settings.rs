//! Process settings
//!
//! Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub nlu: NluSettings,

    #[serde(default)]
    pub knowledge_base: KnowledgeBaseSettings,

    #[serde(default)]
    pub handlers: HandlerSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub cleanup: CleanupSettings,

    /// Directory holding intents.yaml, slots.yaml, handlers.yaml,
    /// templates.yaml
    #[serde(default = "default_domain_config_dir")]
    pub domain_config_dir: String,
}

fn default_domain_config_dir() -> String {
    "config/domain".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            nlu: NluSettings::default(),
            knowledge_base: KnowledgeBaseSettings::default(),
            handlers: HandlerSettings::default(),
            persistence: PersistenceSettings::default(),
            cleanup: CleanupSettings::default(),
            domain_config_dir: default_domain_config_dir(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Turn orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Global confidence floor when an intent has no per-intent threshold
    #[serde(default = "default_intent_confidence_threshold")]
    pub intent_confidence_threshold: f32,
    /// Max gap between top-2 confidences that still counts as ambiguous
    #[serde(default = "default_ambiguity_threshold")]
    pub ambiguity_detection_threshold: f32,
    #[serde(default = "default_confidence_high")]
    pub confidence_high: f32,
    #[serde(default = "default_confidence_medium")]
    pub confidence_medium: f32,
    #[serde(default = "default_confidence_low")]
    pub confidence_low: f32,
    #[serde(default = "default_confidence_reject")]
    pub confidence_reject: f32,
    /// Turns returned in context recall
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// End-to-end per-turn deadline
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// Session expiry
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// How many recent turns back a missing-slot supplement still applies
    #[serde(default = "default_slot_supplement_window")]
    pub slot_supplement_window: usize,
    /// Re-ask attempts for an unparseable disambiguation reply before
    /// falling back
    #[serde(default = "default_ambiguity_retry_limit")]
    pub ambiguity_retry_limit: u32,
    /// Confirmation request lifetime
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: i64,
}

fn default_intent_confidence_threshold() -> f32 {
    0.70
}

fn default_ambiguity_threshold() -> f32 {
    0.15
}

fn default_confidence_high() -> f32 {
    0.85
}

fn default_confidence_medium() -> f32 {
    0.70
}

fn default_confidence_low() -> f32 {
    0.55
}

fn default_confidence_reject() -> f32 {
    0.40
}

fn default_history_window() -> usize {
    10
}

fn default_turn_timeout_ms() -> u64 {
    30_000
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_slot_supplement_window() -> usize {
    5
}

fn default_ambiguity_retry_limit() -> u32 {
    3
}

fn default_confirmation_ttl_secs() -> i64 {
    300
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            intent_confidence_threshold: default_intent_confidence_threshold(),
            ambiguity_detection_threshold: default_ambiguity_threshold(),
            confidence_high: default_confidence_high(),
            confidence_medium: default_confidence_medium(),
            confidence_low: default_confidence_low(),
            confidence_reject: default_confidence_reject(),
            history_window: default_history_window(),
            turn_timeout_ms: default_turn_timeout_ms(),
            session_ttl_hours: default_session_ttl_hours(),
            slot_supplement_window: default_slot_supplement_window(),
            ambiguity_retry_limit: default_ambiguity_retry_limit(),
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
        }
    }
}

/// NLU adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluSettings {
    #[serde(default = "default_nlu_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_nlu_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_nlu_endpoint() -> String {
    "http://localhost:9000/nlu".to_string()
}

fn default_nlu_timeout_ms() -> u64 {
    5_000
}

impl Default for NluSettings {
    fn default() -> Self {
        Self {
            endpoint: default_nlu_endpoint(),
            timeout_ms: default_nlu_timeout_ms(),
        }
    }
}

/// Knowledge-base fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_kb_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_kb_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_kb_endpoint() -> String {
    "http://localhost:9380/api/query".to_string()
}

fn default_kb_timeout_ms() -> u64 {
    8_000
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_kb_endpoint(),
            timeout_ms: default_kb_timeout_ms(),
        }
    }
}

/// Handler invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSettings {
    #[serde(default = "default_handler_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_handler_retries")]
    pub max_retries: u32,
}

fn default_handler_timeout_ms() -> u64 {
    30_000
}

fn default_handler_retries() -> u32 {
    1
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_handler_timeout_ms(),
            max_retries: default_handler_retries(),
        }
    }
}

/// ScyllaDB persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_scylla_hosts() -> Vec<String> {
    vec!["127.0.0.1:9042".to_string()]
}

fn default_keyspace() -> String {
    "dialogue".to_string()
}

fn default_replication_factor() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Background cleanup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_cleanup_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_retention_conversations")]
    pub retention_days_conversations: i64,
    #[serde(default = "default_retention_audit")]
    pub retention_days_audit: i64,
    #[serde(default = "default_retention_cache_log")]
    pub retention_days_cache_log: i64,
    #[serde(default = "default_retention_slot_values")]
    pub retention_days_slot_values: i64,
    #[serde(default = "default_cleanup_batch")]
    pub batch_size: usize,
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_retention_conversations() -> i64 {
    90
}

fn default_retention_audit() -> i64 {
    180
}

fn default_retention_cache_log() -> i64 {
    30
}

fn default_retention_slot_values() -> i64 {
    30
}

fn default_cleanup_batch() -> usize {
    500
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_hours: default_cleanup_interval_hours(),
            retention_days_conversations: default_retention_conversations(),
            retention_days_audit: default_retention_audit(),
            retention_days_cache_log: default_retention_cache_log(),
            retention_days_slot_values: default_retention_slot_values(),
            batch_size: default_cleanup_batch(),
        }
    }
}

impl Settings {
    /// Sanity checks on values that would otherwise fail at a distance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.intent_confidence_threshold <= 0.0
            || self.orchestrator.intent_confidence_threshold >= 1.0
        {
            return Err(ConfigError::Message(
                "orchestrator.intent_confidence_threshold must be in (0, 1)".to_string(),
            ));
        }
        if self.orchestrator.ambiguity_detection_threshold <= 0.0
            || self.orchestrator.ambiguity_detection_threshold >= 0.5
        {
            return Err(ConfigError::Message(
                "orchestrator.ambiguity_detection_threshold must be in (0, 0.5)".to_string(),
            ));
        }
        let bands = &self.orchestrator;
        if !(bands.confidence_reject < bands.confidence_low
            && bands.confidence_low < bands.confidence_medium
            && bands.confidence_medium < bands.confidence_high)
        {
            return Err(ConfigError::Message(
                "confidence bands must be strictly increasing reject < low < medium < high"
                    .to_string(),
            ));
        }
        if self.orchestrator.turn_timeout_ms < 1_000 {
            return Err(ConfigError::Message(
                "orchestrator.turn_timeout_ms must be at least 1000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load settings from files and environment.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("DIALOGUE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.orchestrator.intent_confidence_threshold, 0.70);
        assert_eq!(settings.orchestrator.ambiguity_detection_threshold, 0.15);
        assert_eq!(settings.orchestrator.history_window, 10);
        assert_eq!(settings.orchestrator.turn_timeout_ms, 30_000);
        assert_eq!(settings.handlers.default_timeout_ms, 30_000);
        assert_eq!(settings.cleanup.interval_hours, 24);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_bands() {
        let mut settings = Settings::default();
        settings.orchestrator.confidence_low = 0.9; // above medium
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tiny_deadline() {
        let mut settings = Settings::default();
        settings.orchestrator.turn_timeout_ms = 10;
        assert!(settings.validate().is_err());
    }
}
