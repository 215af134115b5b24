//! Error types for tresbill-store.

use tresbill_core::BillingError;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"receipt"`.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Row exists already (unique constraint).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation not valid in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Account locked out by the auth throttle.
    #[error("locked for {seconds_left}s")]
    Locked {
        /// Seconds until the lock expires.
        seconds_left: i64,
    },

    /// Password hashing or verification failed.
    #[error("password hash error: {0}")]
    PasswordHash(String),

    /// Core domain error.
    #[error(transparent)]
    Core(#[from] BillingError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export bundle assembly failed.
    #[error("export error: {0}")]
    Export(String),
}

impl StoreError {
    /// Whether the underlying database error was a unique-constraint hit.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
