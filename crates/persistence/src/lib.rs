//! Persistence layer for the dialogue orchestrator
//!
//! Provides the authoritative stores behind the engine:
//! - Sessions and conversation turns
//! - Slot values (latest-row-wins per slot name, corrections preserved)
//! - Ambiguity, transfer, user-context and confirmation records
//! - Audit logging
//!
//! Every store is a trait with an in-memory default and a ScyllaDB
//! implementation; deployments without a cluster run entirely in memory.

pub mod ambiguities;
pub mod audit;
pub mod cache;
pub mod client;
pub mod confirmations;
pub mod contexts;
pub mod conversations;
pub mod error;
pub mod schema;
pub mod sessions;
pub mod slot_values;
pub mod transfers;

pub use ambiguities::{
    AmbiguityRecord, AmbiguityStore, InMemoryAmbiguityStore, ResolutionMethod,
    ScyllaAmbiguityStore,
};
pub use audit::{AuditEntry, AuditLog, InMemoryAuditLog, ScyllaAuditLog};
pub use cache::{InvalidationRecord, SessionCache};
pub use client::{ScyllaClient, ScyllaConfig};
pub use confirmations::{
    ConfirmationRecord, ConfirmationStore, InMemoryConfirmationStore, ScyllaConfirmationStore,
};
pub use contexts::{InMemoryUserContextStore, ScyllaUserContextStore, UserContextRecord, UserContextStore};
pub use conversations::{
    ConversationStore, InMemoryConversationStore, ScyllaConversationStore, TurnRecord,
};
pub use error::PersistenceError;
pub use sessions::{
    InMemorySessionStore, ScyllaSessionStore, SessionRecord, SessionState, SessionStore,
};
pub use slot_values::{
    ExtractionMethod, InMemorySlotValueStore, ScyllaSlotValueStore, SlotValueRecord,
    SlotValueStore, ValidationStatus,
};
pub use transfers::{InMemoryTransferStore, ScyllaTransferStore, TransferRecord, TransferStore, TransferType};

use std::sync::Arc;

/// Combined persistence layer with all stores
#[derive(Clone)]
pub struct PersistenceLayer {
    pub sessions: Arc<dyn SessionStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub slot_values: Arc<dyn SlotValueStore>,
    pub ambiguities: Arc<dyn AmbiguityStore>,
    pub transfers: Arc<dyn TransferStore>,
    pub user_contexts: Arc<dyn UserContextStore>,
    pub confirmations: Arc<dyn ConfirmationStore>,
    pub audit: Arc<dyn AuditLog>,
    pub cache: Arc<SessionCache>,
}

impl PersistenceLayer {
    /// All-in-memory layer (default, tests, single-node dev)
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            conversations: Arc::new(InMemoryConversationStore::new()),
            slot_values: Arc::new(InMemorySlotValueStore::new()),
            ambiguities: Arc::new(InMemoryAmbiguityStore::new()),
            transfers: Arc::new(InMemoryTransferStore::new()),
            user_contexts: Arc::new(InMemoryUserContextStore::new()),
            confirmations: Arc::new(InMemoryConfirmationStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            cache: Arc::new(SessionCache::new()),
        }
    }
}

/// Connect to ScyllaDB, provision the dialogue schema, and build the full
/// layer
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::initialize(config).await?;

    Ok(PersistenceLayer {
        sessions: Arc::new(ScyllaSessionStore::new(client.clone())),
        conversations: Arc::new(ScyllaConversationStore::new(client.clone())),
        slot_values: Arc::new(ScyllaSlotValueStore::new(client.clone())),
        ambiguities: Arc::new(ScyllaAmbiguityStore::new(client.clone())),
        transfers: Arc::new(ScyllaTransferStore::new(client.clone())),
        user_contexts: Arc::new(ScyllaUserContextStore::new(client.clone())),
        confirmations: Arc::new(ScyllaConfirmationStore::new(client.clone())),
        audit: Arc::new(ScyllaAuditLog::new(client)),
        cache: Arc::new(SessionCache::new()),
    })
}
