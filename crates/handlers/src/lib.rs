//! Action handlers for the dialogue orchestrator
//!
//! An intent executes through exactly one handler binding from the config
//! registry. Handler configs are a tagged variant ({mock, http, db}); the
//! dispatcher matches the tag and wraps every invocation in a timeout.
//! Failure classes matter downstream: transient failures earn a retry
//! prompt, rejections do not.

pub mod database;
pub mod http;
pub mod mock;
pub mod registry;
pub mod template;

pub use database::DatabaseHandler;
pub use http::ApiCallHandler;
pub use mock::MockServiceHandler;
pub use registry::{HandlerDispatcher, HandlerResult};
pub use template::{render_template, render_value, vars_from};

use thiserror::Error;

/// Handler invocation errors
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("No handler bound for intent {0}")]
    NotFound(String),

    #[error("Handler {handler} timed out after {timeout_ms}ms")]
    Timeout { handler: String, timeout_ms: u64 },

    /// Network faults, 5xx, simulated outages: worth a retry
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// 4xx and business-logic rejections: retrying will not help
    #[error("Handler rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid handler config: {0}")]
    InvalidConfig(String),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}
