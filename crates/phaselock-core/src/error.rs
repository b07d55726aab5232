//! Core error types for phaselock-core.
//!
//! Every public operation returns [`Result`], whose error side is
//! [`CoreError`]. Callers match on the variant to tell a missing record
//! apart from an operation that is invalid for the current session status.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::timer::SessionStatus;

/// What kind of record a [`CoreError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Block,
    Session,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Block => f.write_str("TimeBlock"),
            EntityKind::Session => f.write_str("TimerSession"),
        }
    }
}

/// Core error type for phaselock-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Unknown block or session id
    #[error("{kind} not found with id: {id}")]
    NotFound { kind: EntityKind, id: i64 },

    /// Operation is not valid for the session's current status
    #[error("Cannot {operation} session {session_id}: current status is {status}")]
    InvalidTransition {
        operation: &'static str,
        session_id: i64,
        status: SessionStatus,
    },

    /// Another session already holds the single active slot
    #[error("An active session already exists (session {active_session_id}). Cancel or complete the current session first.")]
    SessionAlreadyActive { active_session_id: i64 },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    pub fn block_not_found(id: i64) -> Self {
        CoreError::NotFound {
            kind: EntityKind::Block,
            id,
        }
    }

    pub fn session_not_found(id: i64) -> Self {
        CoreError::NotFound {
            kind: EntityKind::Session,
            id,
        }
    }

    /// True for both flavours of state conflict: an invalid transition and
    /// a start rejected by admission control.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTransition { .. } | CoreError::SessionAlreadyActive { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-separated key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Value below the allowed minimum
    #[error("{field} must be at least {min} minute(s), got {value}")]
    BelowMinimum {
        field: &'static str,
        min: u32,
        value: u32,
    },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                DatabaseError::Locked
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity() {
        let err = CoreError::block_not_found(7);
        assert_eq!(err.to_string(), "TimeBlock not found with id: 7");
        assert!(err.is_not_found());
        assert!(!err.is_state_conflict());
    }

    #[test]
    fn both_conflict_variants_are_state_conflicts() {
        let transition = CoreError::InvalidTransition {
            operation: "pause",
            session_id: 1,
            status: SessionStatus::Stopped,
        };
        let admission = CoreError::SessionAlreadyActive {
            active_session_id: 2,
        };
        assert!(transition.is_state_conflict());
        assert!(admission.is_state_conflict());
        assert!(transition.to_string().contains("stopped"));
    }

    #[test]
    fn validation_error_converts() {
        let err: CoreError = ValidationError::BelowMinimum {
            field: "work_minutes",
            min: 1,
            value: 0,
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
