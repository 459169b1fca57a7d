//! Bag errors.

use std::path::PathBuf;

use crate::validate::BagProblem;

/// Result type for bag operations
pub type BagResult<T> = Result<T, BagError>;

/// Bag error
#[derive(Debug, thiserror::Error)]
pub enum BagError {
    /// Filesystem access failed
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Directory carries no bag declaration
    #[error("not a bag: {0} has no bagit.txt")]
    NotABag(PathBuf),

    /// A manifest line could not be parsed
    #[error("malformed manifest {file} line {line}: {reason}")]
    MalformedManifest {
        /// Manifest file name
        file: String,
        /// 1-based line number
        line: usize,
        /// Why the line was rejected
        reason: String,
    },

    /// Recomputed fixity disagrees with the stored manifests
    #[error("bag invalid: {}", summarize(.problems))]
    Invalid {
        /// Every problem found
        problems: Vec<BagProblem>,
    },

    /// Archive could not be read or written
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Archive entry or payload path escapes its root
    #[error("unsafe path: {0}")]
    UnsafePath(String),
}

impl BagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn summarize(problems: &[BagProblem]) -> String {
    match problems {
        [] => "no problems recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}
