//! Global error types for the marketplace client.
//!
//! Two families live in one `MktError` enum: the outcome taxonomy that is
//! surfaced to users (illegal transitions, conflicts, duplicate reviews, ...)
//! and infrastructure failures (database, config, io).

use thiserror::Error;

/// Convenience type alias for Results using MktError.
pub type MktResult<T> = Result<T, MktError>;

/// Unified error type for the marketplace client.
#[derive(Error, Debug)]
pub enum MktError {
    // -- Outcome taxonomy --
    /// The requested status edge is not in the booking transition table.
    #[error("illegal booking transition: {from} -> {to}")]
    IllegalTransition {
        /// Status the transition starts from.
        from: String,
        /// Requested target status.
        to: String,
    },

    /// The caller is not allowed to perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The conditioned write found the booking in a different status than expected.
    #[error("booking {booking_id} changed before {attempted} could be applied")]
    StaleStateConflict {
        /// Booking that was written.
        booking_id: String,
        /// Target status of the rejected transition.
        attempted: String,
        /// Status observed after re-fetching, if the booking is still readable.
        current: Option<String>,
    },

    /// The record does not exist or is not readable by the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// A review already exists for this booking.
    #[error("booking {0} has already been reviewed")]
    AlreadyReviewed(String),

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The realtime change feed dropped.
    #[error("realtime transport disconnected")]
    TransportDisconnected,

    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- Database errors --
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Database integrity check failed.
    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MktError {
    /// Whether this error is part of the user-facing outcome taxonomy.
    ///
    /// Expected errors are shown to the user with a specific message;
    /// everything else is an infrastructure failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. }
                | Self::Forbidden(_)
                | Self::StaleStateConflict { .. }
                | Self::NotFound(_)
                | Self::AlreadyReviewed(_)
                | Self::InvalidInput(_)
                | Self::TransportDisconnected
        )
    }

    /// Short stable identifier for logs and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Forbidden(_) => "forbidden",
            Self::StaleStateConflict { .. } => "stale_state_conflict",
            Self::NotFound(_) => "not_found",
            Self::AlreadyReviewed(_) => "already_reviewed",
            Self::InvalidInput(_) => "invalid_input",
            Self::TransportDisconnected => "transport_disconnected",
            Self::Config(_) => "config",
            Self::Database(_) | Self::Migration(_) | Self::Pool(_) | Self::IntegrityCheck(_) => {
                "database"
            }
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) | Self::Other(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for MktError {
    fn from(e: serde_json::Error) -> Self {
        MktError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for MktError {
    fn from(e: toml::de::Error) -> Self {
        MktError::Config(e.to_string())
    }
}
