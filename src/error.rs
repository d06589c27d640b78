//! Error taxonomy for the LockNet service.
//!
//! Store-layer failures propagate as typed errors. A rejected
//! validation attempt is never an error: it is a first-class
//! [`crate::validation::Decision`] value with a reason code.

use thiserror::Error;

/// Unified error type for all service operations.
#[derive(Error, Debug)]
pub enum LocknetError {
    /// No lock exists with the given label.
    #[error("lock not found: {0}")]
    LockNotFound(String),

    /// A non-expired active token already exists for the lock.
    #[error("lock already reserved: {0}")]
    LockAlreadyReserved(String),

    /// A lock with the given label already exists.
    #[error("lock label already exists: {0}")]
    LabelTaken(String),

    /// No token exists with the given value.
    #[error("token not found")]
    TokenNotFound,

    /// The token is not in the active state.
    #[error("token not active")]
    TokenNotActive,

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Bus publish or connection failure. Always non-fatal: logged and
    /// swallowed by the caller whose primary operation already
    /// succeeded durably.
    #[error("bus transport error: {0}")]
    Transport(String),

    /// Configuration error detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LocknetError {
    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a conflict with existing state.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::LockAlreadyReserved(_) | Self::LabelTaken(_))
    }

    /// Stable error code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LockNotFound(_) => LOCK_NOT_FOUND,
            Self::LockAlreadyReserved(_) => LOCK_ALREADY_RESERVED,
            Self::LabelTaken(_) => LOCK_LABEL_TAKEN,
            Self::TokenNotFound => TOKEN_NOT_FOUND,
            Self::TokenNotActive => TOKEN_NOT_ACTIVE,
            Self::Storage(_) => STORAGE_ERROR,
            Self::Transport(_) => TRANSPORT_ERROR,
            Self::Config(_) => CONFIG_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }
}

impl From<rusqlite::Error> for LocknetError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<rumqttc::ClientError> for LocknetError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::Transport(err.to_string())
    }
}

// Error codes for API responses
/// Lock label did not resolve.
pub const LOCK_NOT_FOUND: &str = "LOCK_NOT_FOUND";
/// Lock already carries an active, non-expired token.
pub const LOCK_ALREADY_RESERVED: &str = "LOCK_ALREADY_RESERVED";
/// Lock label uniqueness violated.
pub const LOCK_LABEL_TAKEN: &str = "LOCK_LABEL_TAKEN";
/// Token value did not resolve.
pub const TOKEN_NOT_FOUND: &str = "TOKEN_NOT_FOUND";
/// Token is expired or revoked.
pub const TOKEN_NOT_ACTIVE: &str = "TOKEN_NOT_ACTIVE";
/// SQLite failure.
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
/// Bus transport failure.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// Startup configuration failure.
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
/// Unclassified internal failure.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
