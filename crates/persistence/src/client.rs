//! ScyllaDB connection for the dialogue stores
//!
//! One session shared by every store. `initialize` connects with a bounded
//! timeout, provisions the keyspace and dialogue tables, and pins the
//! session to the keyspace. Host/keyspace configuration comes from the
//! settings layer; this type never reads the environment itself.

use std::sync::Arc;
use std::time::Duration;

use scylla::{Session, SessionBuilder};

use crate::error::PersistenceError;
use crate::schema;

/// Connection parameters, mapped from `PersistenceSettings`
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u8,
    pub connect_timeout_ms: u64,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "dialogue".to_string(),
            replication_factor: 1,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Shared session handle
#[derive(Clone)]
pub struct ScyllaClient {
    session: Arc<Session>,
    keyspace: String,
}

impl ScyllaClient {
    /// Connect, provision the dialogue schema and pin the keyspace.
    /// A node that does not answer within the connect timeout fails the
    /// whole initialization; the caller falls back to in-memory stores.
    pub async fn initialize(config: ScyllaConfig) -> Result<Self, PersistenceError> {
        tracing::info!(hosts = ?config.hosts, keyspace = %config.keyspace, "Connecting to ScyllaDB");

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .await?;

        schema::create_keyspace(&session, &config.keyspace, config.replication_factor).await?;
        schema::create_tables(&session, &config.keyspace).await?;
        session.use_keyspace(&config.keyspace, false).await?;

        tracing::info!(keyspace = %config.keyspace, "Dialogue schema ready");

        Ok(Self {
            session: Arc::new(session),
            keyspace: config.keyspace,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }
}
