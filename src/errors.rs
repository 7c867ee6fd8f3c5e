//! Storage error taxonomy.
//!
//! Every store trait in this crate returns [`StoreResult`]. The orchestration
//! layers ([`crate::session_manager::SessionManager`] and
//! [`crate::audit::AuditLogger`]) catch these errors at their boundary, log
//! them, and degrade to sentinel values; a storage hiccup must never fail the
//! primary request path.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the session/audit storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    /// A persisted value could not be decoded into its domain type.
    #[error("invalid stored value: {0}")]
    Decode(String),
}
