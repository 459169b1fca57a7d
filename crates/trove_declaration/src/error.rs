//! Declaration errors.

use std::path::PathBuf;

use trove_core::CanonicalError;

/// Result type for declaration operations
pub type DeclarationResult<T> = Result<T, DeclarationError>;

/// Declaration error
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    /// Canonical serialization failed
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// Declaration text is not valid JSON of the expected shape
    #[error("cannot parse declaration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Declaration parsed but lacks a required node
    #[error("malformed declaration: {0}")]
    Malformed(String),

    /// An artifact could not be read for sniffing
    #[error("cannot read artifact {path}: {source}")]
    Io {
        /// Artifact path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}
