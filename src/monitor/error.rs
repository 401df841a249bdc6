//! Error types for the monitoring engine.
//!
//! Separate from `DatabaseError` so collaborator traits can report store,
//! provider and push failures through one type without coupling to SQLite.

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store call timed out after {0}ms")]
    StoreTimeout(u64),

    #[error("Provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Push delivery failed: {0}")]
    Push(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine failed to start: {0}")]
    Startup(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn provider(provider: &str, reason: impl Into<String>) -> Self {
        MonitorError::Provider {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Bound a store call by `limit`; an expired call becomes `StoreTimeout`.
pub(crate) async fn within<T, F>(limit: std::time::Duration, fut: F) -> Result<T, MonitorError>
where
    F: std::future::Future<Output = Result<T, MonitorError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MonitorError::StoreTimeout(limit.as_millis() as u64))?
}
