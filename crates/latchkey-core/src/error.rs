//! Error types for key resolution, cache stores and lock acquisition.

use std::fmt;

/// Errors raised while resolving a lock or cache key expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The expression could not be parsed or evaluated.
    #[error("Invalid key expression '{expression}': {reason}")]
    InvalidExpression {
        /// The offending expression source.
        expression: String,
        /// What went wrong.
        reason: String,
    },

    /// The expression references an argument the call does not bind.
    #[error("Key expression '{expression}' references unbound argument '#{name}'")]
    UnboundVariable {
        /// The offending expression source.
        expression: String,
        /// Name of the missing argument.
        name: String,
    },

    /// The expression resolved to null; a null key is never valid.
    #[error("Key expression '{expression}' resolved to null")]
    NullKey {
        /// The offending expression source.
        expression: String,
    },
}

impl KeyError {
    /// Creates a new `InvalidExpression` error.
    #[must_use]
    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `UnboundVariable` error.
    #[must_use]
    pub fn unbound_variable(expression: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnboundVariable {
            expression: expression.into(),
            name: name.into(),
        }
    }

    /// Creates a new `NullKey` error.
    #[must_use]
    pub fn null_key(expression: impl Into<String>) -> Self {
        Self::NullKey {
            expression: expression.into(),
        }
    }
}

/// Errors raised by cache stores and distributed lock clients.
///
/// These are infrastructure failures. The cache wrappers swallow them and the
/// lock manager turns an unreachable backend into a local-lock fallback, so
/// they rarely reach business code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Could not obtain a connection to the backend.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The backend rejected or failed a command.
    #[error("Command error: {message}")]
    Command {
        /// Description of the command error.
        message: String,
    },

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The backend is known to be down.
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if the backend could not be reached at all.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Unavailable { .. })
    }
}

/// Errors surfaced by the lock manager to the code it protects.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// The retry budget ran out before the lock was acquired.
    /// The protected operation did not run.
    #[error("Failed to acquire lock: {key}")]
    AcquisitionTimeout {
        /// The resolved lock key.
        key: String,
    },

    /// The lock key template could not be resolved.
    #[error("Lock key resolution failed: {0}")]
    KeyResolution(#[from] KeyError),

    /// Acquisition was cancelled while waiting.
    #[error("Lock acquisition cancelled: {key}")]
    Cancelled {
        /// The resolved lock key.
        key: String,
    },

    /// The lock manager is shutting down and accepts no new acquisitions.
    #[error("Lock manager is shutting down")]
    ShuttingDown,

    /// The lock backend failed in a way that could not be degraded.
    #[error("Lock backend error: {0}")]
    Backend(#[from] StoreError),
}

impl LockError {
    /// Creates a new `AcquisitionTimeout` error.
    #[must_use]
    pub fn acquisition_timeout(key: impl Into<String>) -> Self {
        Self::AcquisitionTimeout { key: key.into() }
    }

    /// Creates a new `Cancelled` error.
    #[must_use]
    pub fn cancelled(key: impl Into<String>) -> Self {
        Self::Cancelled { key: key.into() }
    }

    /// Returns `true` if the caller may retry the whole operation later.
    ///
    /// A timeout means someone else held the lock; the right user-facing
    /// response is a retryable conflict, not a business rejection.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AcquisitionTimeout { .. } => ErrorCategory::Conflict,
            Self::KeyResolution(_) => ErrorCategory::Configuration,
            Self::Cancelled { .. } | Self::ShuttingDown => ErrorCategory::Cancelled,
            Self::Backend(_) => ErrorCategory::Infrastructure,
        }
    }
}

/// Categories of lock errors for logging and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lock held elsewhere; retry later.
    Conflict,
    /// Misconfigured key expression.
    Configuration,
    /// Acquisition was interrupted.
    Cancelled,
    /// Backend failure.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::Configuration => write!(f, "configuration"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}
