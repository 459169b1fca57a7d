//! Core error types for trove.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid digest format
    InvalidHash {
        /// Why the digest was rejected
        reason: String,
    },

    /// Invalid ID format
    InvalidId {
        /// Why the identifier was rejected
        reason: String,
    },

    /// Invalid timestamp
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },

    /// Value cannot be canonically encoded
    Canonical {
        /// Encoder message
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent
    Config {
        /// Offending field or file
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Filesystem or process I/O failed
    Io {
        /// Operation that failed
        operation: String,
        /// Underlying error message
        reason: String,
    },

    /// Invalid state transition
    InvalidTransition {
        /// State the run was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Wrap an I/O error with the operation that produced it
    #[must_use]
    pub fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHash { reason } => write!(f, "Invalid hash: {}", reason),
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::InvalidTimestamp { reason } => write!(f, "Invalid timestamp: {}", reason),
            Self::Canonical { reason } => write!(f, "Canonical encoding failed: {}", reason),
            Self::Config { field, reason } => {
                write!(f, "Invalid configuration for {}: {}", field, reason)
            }
            Self::Io { operation, reason } => write!(f, "I/O error during {}: {}", operation, reason),
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Canonical {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidId {
            reason: "empty".to_string(),
        };
        assert_eq!(format!("{}", err), "Invalid ID: empty");

        let err = CoreError::Config {
            field: "storage_dir".to_string(),
            reason: "must be absolute".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Invalid configuration for storage_dir: must be absolute"
        );
    }

    #[test]
    fn test_io_error_keeps_operation() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CoreError::io("read manifest", &io);
        let s = err.to_string();
        assert!(s.contains("read manifest"));
        assert!(s.contains("gone"));
    }

    #[test]
    fn test_transition_error() {
        let err = CoreError::InvalidTransition {
            from: "Staged".to_string(),
            to: "Signed".to_string(),
        };
        assert!(err.to_string().contains("Staged -> Signed"));
    }
}
