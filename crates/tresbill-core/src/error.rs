//! Error types for tresbill-core.

/// Result type for core billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in core billing logic.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Unknown pricing tier.
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// Invalid rate value (negative or non-finite).
    #[error("invalid rate: {field}={value}")]
    InvalidRate {
        /// The rate field that was rejected.
        field: String,
        /// The offending value.
        value: f64,
    },

    /// Unknown GL account code.
    #[error("unknown account code: {0}")]
    UnknownAccount(String),

    /// A posting batch does not balance.
    #[error("unbalanced batch: debits={debits} credits={credits}")]
    Unbalanced {
        /// Total debits in cents.
        debits: i64,
        /// Total credits in cents.
        credits: i64,
    },

    /// A job accounting source failed to deliver rows.
    #[error("job source error: {0}")]
    JobSource(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
