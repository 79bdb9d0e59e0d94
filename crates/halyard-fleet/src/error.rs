//! Error types for the fleet coordinator.

use thiserror::Error;
use uuid::Uuid;

/// Fleet coordinator errors.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Worker not found. The worker must re-register.
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    /// Domain not found.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Program not present in the cache.
    #[error("program not found: {domain}/{id}")]
    ProgramNotFound {
        /// Domain the program was looked up in.
        domain: String,
        /// Program identifier.
        id: Uuid,
    },

    /// Program exists but cannot be dispatched.
    #[error("program {id} is not executable")]
    ProgramNotExecutable {
        /// Program identifier.
        id: Uuid,
    },

    /// A domain database handle could not be opened or queried.
    #[error("connection error for domain {domain}: {message}")]
    Connection {
        /// Domain whose handle failed.
        domain: String,
        /// Underlying failure.
        message: String,
    },

    /// No alive worker can run the requested language.
    #[error("no worker available for language {language}")]
    DispatchUnavailable {
        /// Requested language.
        language: String,
    },

    /// A request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File watcher error.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Create a connection error for a domain.
    #[must_use]
    pub fn connection(domain: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            domain: domain.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for the "absent entry" family of errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkerNotFound(_) | Self::DomainNotFound(_) | Self::ProgramNotFound { .. }
        )
    }
}

/// Result type for fleet operations.
pub type FleetResult<T> = std::result::Result<T, FleetError>;
