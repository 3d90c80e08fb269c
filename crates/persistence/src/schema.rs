//! ScyllaDB schema creation

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let tables: Vec<(&str, String)> = vec![
        (
            "sessions",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.sessions (
            session_id TEXT,
            user_id TEXT,
            state TEXT,
            context_json TEXT,
            created_at BIGINT,
            updated_at BIGINT,
            expires_at BIGINT,
            PRIMARY KEY (session_id)
        ) WITH default_time_to_live = 604800
    "#,
                ks = keyspace
            ),
        ),
        (
            "sessions_by_user",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.sessions_by_user (
            user_id TEXT,
            updated_at BIGINT,
            session_id TEXT,
            state TEXT,
            PRIMARY KEY ((user_id), updated_at, session_id)
        ) WITH CLUSTERING ORDER BY (updated_at DESC, session_id ASC)
        AND default_time_to_live = 604800
    "#,
                ks = keyspace
            ),
        ),
        (
            "conversations",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.conversations (
            session_id TEXT,
            turn_id INT,
            user_id TEXT,
            user_input TEXT,
            intent TEXT,
            confidence DOUBLE,
            system_response TEXT,
            response_kind TEXT,
            status TEXT,
            processing_time_ms BIGINT,
            created_at BIGINT,
            PRIMARY KEY ((session_id), turn_id)
        ) WITH CLUSTERING ORDER BY (turn_id DESC)
    "#,
                ks = keyspace
            ),
        ),
        (
            "slot_values",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.slot_values (
            session_id TEXT,
            slot_name TEXT,
            turn_id INT,
            intent TEXT,
            original_text TEXT,
            extracted_value TEXT,
            normalized_value TEXT,
            confidence DOUBLE,
            extraction_method TEXT,
            validation_status TEXT,
            validation_error TEXT,
            is_confirmed BOOLEAN,
            updated_at BIGINT,
            PRIMARY KEY ((session_id), slot_name, turn_id)
        ) WITH CLUSTERING ORDER BY (slot_name ASC, turn_id DESC)
    "#,
                ks = keyspace
            ),
        ),
        (
            "intent_ambiguities",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.intent_ambiguities (
            session_id TEXT,
            ambiguity_id UUID,
            turn_id INT,
            user_input TEXT,
            candidates_json TEXT,
            question TEXT,
            user_choice TEXT,
            resolution_method TEXT,
            resolved_intent TEXT,
            resolved BOOLEAN,
            attempts INT,
            created_at BIGINT,
            resolved_at BIGINT,
            PRIMARY KEY ((session_id), ambiguity_id)
        )
    "#,
                ks = keyspace
            ),
        ),
        (
            "intent_transfers",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.intent_transfers (
            session_id TEXT,
            transfer_id UUID,
            from_intent TEXT,
            to_intent TEXT,
            transfer_type TEXT,
            reason TEXT,
            saved_context_json TEXT,
            confidence DOUBLE,
            created_at BIGINT,
            resumed_at BIGINT,
            PRIMARY KEY ((session_id), transfer_id)
        )
    "#,
                ks = keyspace
            ),
        ),
        (
            "user_contexts",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.user_contexts (
            user_id TEXT,
            context_type TEXT,
            context_key TEXT,
            value_json TEXT,
            scope TEXT,
            priority INT,
            is_active BOOLEAN,
            updated_at BIGINT,
            expires_at BIGINT,
            PRIMARY KEY ((user_id), context_type, context_key)
        )
    "#,
                ks = keyspace
            ),
        ),
        (
            "confirmation_requests",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.confirmation_requests (
            request_id TEXT,
            session_id TEXT,
            intent TEXT,
            slots_json TEXT,
            strategy TEXT,
            risk TEXT,
            triggers_json TEXT,
            retry_count INT,
            created_at BIGINT,
            expires_at BIGINT,
            PRIMARY KEY (request_id)
        ) WITH default_time_to_live = 3600
    "#,
                ks = keyspace
            ),
        ),
        (
            "audit_log",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.audit_log (
            partition_date TEXT,
            session_id TEXT,
            created_at BIGINT,
            id UUID,
            event_type TEXT,
            actor TEXT,
            action TEXT,
            outcome TEXT,
            details_json TEXT,
            PRIMARY KEY ((partition_date, session_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
    "#,
                ks = keyspace
            ),
        ),
        (
            "cache_invalidation_log",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {ks}.cache_invalidation_log (
            session_id TEXT,
            created_at BIGINT,
            id UUID,
            cache_key TEXT,
            reason TEXT,
            PRIMARY KEY ((session_id), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
        AND default_time_to_live = 2592000
    "#,
                ks = keyspace
            ),
        ),
    ];

    for (name, ddl) in tables {
        session
            .query_unpaged(ddl, &[])
            .await
            .map_err(|e| PersistenceError::Schema(format!("Failed to create {} table: {}", name, e)))?;
    }

    tracing::info!("All tables created successfully");
    Ok(())
}
