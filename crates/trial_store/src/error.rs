//! Error types for stores and engine operations.
//!
//! This module provides:
//! - `StoreError`: backend failures (connection, constraint, corrupt rows)
//! - `StateError`: lifecycle rule violations
//! - `RandomisationError`: everything an engine operation can return, with a
//!   stable [`ErrorKind`] code for callers

use thiserror::Error;
use trial_core::builder::StratumKey;
use trial_core::types::{ConfigId, SubjectId, TrialId, ValidationError};

/// Backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Subject already consumed a slot of this configuration
    #[error("Subject {subject} already holds a slot in configuration {config}")]
    DuplicateSubject {
        /// Configuration
        config: ConfigId,
        /// Subject
        subject: SubjectId,
    },

    /// A concurrent activation won for the same trial
    #[error("Another configuration is already active for trial {trial}")]
    ActiveConflict {
        /// Trial
        trial: TrialId,
    },

    /// A stored row could not be mapped back to the model
    #[error("Corrupt stored row: {0}")]
    Corrupt(String),

    /// Row expected by the operation is gone
    #[error("Record not found: {0}")]
    Missing(String),

    /// Backend refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create a corrupt row error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Operation rejected by the design lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Locked configurations are immutable
    #[error("Configuration {config} is locked and can no longer be modified")]
    ConfigLocked {
        /// Configuration
        config: ConfigId,
    },

    /// Activation needs a generated sealed list
    #[error("Configuration {config} has no generated randomisation list")]
    ListNotGenerated {
        /// Configuration
        config: ConfigId,
    },

    /// Activation is one-way
    #[error("Configuration {config} is already activated")]
    AlreadyActivated {
        /// Configuration
        config: ConfigId,
    },

    /// Double-randomisation guard
    #[error("Subject {subject} has already been randomised under configuration {config}")]
    AlreadyRandomised {
        /// Subject
        subject: SubjectId,
        /// Configuration
        config: ConfigId,
    },

    /// Trial has no design to randomise against
    #[error("No active randomisation design for trial {trial}")]
    NoActiveDesign {
        /// Trial
        trial: TrialId,
    },
}

/// Stable category of a [`RandomisationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request rejected before any mutation
    Validation,
    /// Lifecycle rule violated
    State,
    /// No unused slot left in the requested stratum
    Exhausted,
    /// Caller's role does not permit the operation
    Forbidden,
    /// Referenced configuration does not exist
    NotFound,
    /// Infrastructure failure, operation rolled back
    Store,
}

impl ErrorKind {
    /// Machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::State => "state_error",
            ErrorKind::Exhausted => "list_exhausted",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Store => "store_error",
        }
    }
}

/// Error returned by every engine operation.
#[derive(Debug, Error)]
pub enum RandomisationError {
    /// Validation error
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// State error
    #[error("{0}")]
    State(#[from] StateError),

    /// Stratum exhausted; the design must be regenerated
    #[error("Randomisation list exhausted for stratum '{stratum}' of configuration {config}")]
    Exhausted {
        /// Configuration
        config: ConfigId,
        /// Exhausted stratum
        stratum: StratumKey,
    },

    /// Authorisation error
    #[error("Not permitted: {0}")]
    Forbidden(String),

    /// Unknown configuration
    #[error("Randomisation configuration {0} not found")]
    NotFound(ConfigId),

    /// Store error
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl RandomisationError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RandomisationError::Validation(_) => ErrorKind::Validation,
            RandomisationError::State(_) => ErrorKind::State,
            RandomisationError::Exhausted { .. } => ErrorKind::Exhausted,
            RandomisationError::Forbidden(_) => ErrorKind::Forbidden,
            RandomisationError::NotFound(_) => ErrorKind::NotFound,
            RandomisationError::Store(_) => ErrorKind::Store,
        }
    }

    /// Create an authorisation error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

/// Result type for engine operations.
pub type RandomisationResult<T> = Result<T, RandomisationError>;
