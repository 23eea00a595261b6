//! Error types for TIPJAR operations

use thiserror::Error;

/// Account resolution and durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountError {
    /// No durable record and no cache entry: the identity has never been seen.
    #[error("Account record not found: {key}")]
    RecordNotFound { key: String },

    /// The record exists but has no wallet reference.
    #[error("Account record {key} is incomplete: no wallet reference")]
    IncompleteRecord { key: String },

    /// The durable store is unreachable or returned corrupt data.
    #[error("Account store error: {reason}")]
    Store { reason: String },
}

impl AccountError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::RecordNotFound { key: key.into() }
    }

    pub fn incomplete(key: impl Into<String>) -> Self {
        Self::IncompleteRecord { key: key.into() }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::IncompleteRecord { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Outbound messaging gateway errors.
///
/// These are logged by the dispatcher and never returned to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{action} to {target} rejected: {reason}")]
    Rejected {
        action: String,
        target: String,
        reason: String,
    },

    #[error("Gateway unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for account store operations.
pub type AccountResult<T> = Result<T, AccountError>;

// =============================================================================
// TESTS
// =============================================================================
