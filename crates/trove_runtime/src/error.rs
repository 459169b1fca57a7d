//! Runtime errors.

use std::path::PathBuf;

use trove_bag::BagError;

use crate::engine::EngineError;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime error
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Submission could not be staged
    #[error("staging failed: {reason}")]
    Stage {
        /// What went wrong
        reason: String,
    },

    /// Image builder exited non-zero
    #[error("image build failed with exit code {exit_code}")]
    BuildFailed {
        /// Builder exit code
        exit_code: i64,
    },

    /// Entrypoint exited non-zero
    #[error("execution failed with exit code {exit_code}")]
    ExecutionFailed {
        /// Entrypoint exit code
        exit_code: i64,
    },

    /// Container engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Unpacking or copying the submission failed
    #[error(transparent)]
    Bag(#[from] BagError),
}

impl RuntimeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn stage(reason: impl Into<String>) -> Self {
        Self::Stage {
            reason: reason.into(),
        }
    }
}
