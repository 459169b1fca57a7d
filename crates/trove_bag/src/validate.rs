//! Bag fixity validation.
//!
//! Every payload file is hashed once for all algorithms that have a
//! manifest, and every listed file must exist. Tag manifests and the
//! payload oxum are checked when present.

use std::collections::BTreeSet;
use std::fmt;

use trove_core::HashAlgorithm;

use crate::bag::{Bag, PAYLOAD_DIR, PAYLOAD_OXUM};
use crate::error::{BagError, BagResult};
use crate::fs::{safe_join, walk_files};
use crate::manifest::{Manifest, ManifestKind};

/// One fixity problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BagProblem {
    /// No payload manifest exists
    MissingManifest,
    /// A listed file is absent
    MissingFile {
        /// Manifest algorithm
        algorithm: HashAlgorithm,
        /// Listed path
        path: String,
    },
    /// A payload file is not listed
    UnlistedFile {
        /// Manifest algorithm
        algorithm: HashAlgorithm,
        /// Path on disk
        path: String,
    },
    /// Recomputed digest differs
    DigestMismatch {
        /// Manifest algorithm
        algorithm: HashAlgorithm,
        /// Listed path
        path: String,
        /// Recorded digest
        expected: String,
        /// Recomputed digest
        actual: String,
    },
    /// Payload size or file count differs from `Payload-Oxum`
    OxumMismatch {
        /// Recorded oxum
        expected: String,
        /// Recomputed oxum
        actual: String,
    },
}

impl fmt::Display for BagProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingManifest => write!(f, "no payload manifest"),
            Self::MissingFile { algorithm, path } => {
                write!(f, "{path} listed in {algorithm} manifest but missing")
            }
            Self::UnlistedFile { algorithm, path } => {
                write!(f, "{path} not listed in {algorithm} manifest")
            }
            Self::DigestMismatch {
                algorithm,
                path,
                expected,
                actual,
            } => write!(
                f,
                "{path} {algorithm} mismatch: expected {expected}, found {actual}"
            ),
            Self::OxumMismatch { expected, actual } => {
                write!(f, "payload oxum mismatch: expected {expected}, found {actual}")
            }
        }
    }
}

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Payload files checked
    pub files: usize,
    /// Payload bytes checked
    pub octets: u64,
    /// Payload manifest algorithms checked
    pub algorithms: Vec<HashAlgorithm>,
}

/// Recomputes and compares every digest in a bag
#[derive(Debug, Clone, Copy, Default)]
pub struct BagValidator;

impl BagValidator {
    /// Create a validator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validate `bag`
    ///
    /// # Errors
    ///
    /// Returns `BagError::Invalid` listing every problem found, or an I/O or
    /// parse error if the bag cannot be read at all
    #[tracing::instrument(level = "debug", skip(self, bag), fields(root = %bag.root().display()))]
    pub fn validate(&self, bag: &Bag) -> BagResult<ValidationSummary> {
        let mut problems = Vec::new();

        let algorithms = bag.manifest_algorithms(ManifestKind::Payload)?;
        if algorithms.is_empty() {
            problems.push(BagProblem::MissingManifest);
        }
        let manifests = algorithms
            .iter()
            .map(|alg| bag.manifest(ManifestKind::Payload, *alg))
            .collect::<BagResult<Vec<_>>>()?;

        let files = walk_files(&bag.payload_dir())?;
        let mut on_disk = BTreeSet::new();
        let mut octets = 0;
        for file in &files {
            let name = format!("{PAYLOAD_DIR}/{}", file.relative);
            let digests = HashAlgorithm::digest_file_multi(&algorithms, &file.path)
                .map_err(|e| BagError::io(&file.path, e))?;
            for (manifest, (algorithm, actual)) in manifests.iter().zip(digests) {
                match manifest.digest_of(&name) {
                    None => problems.push(BagProblem::UnlistedFile {
                        algorithm,
                        path: name.clone(),
                    }),
                    Some(expected) if expected != actual => {
                        problems.push(BagProblem::DigestMismatch {
                            algorithm,
                            path: name.clone(),
                            expected: expected.to_string(),
                            actual,
                        });
                    }
                    Some(_) => {}
                }
            }
            octets += file.size;
            on_disk.insert(name);
        }
        for manifest in &manifests {
            for entry in manifest.entries() {
                if !on_disk.contains(&entry.path) {
                    problems.push(BagProblem::MissingFile {
                        algorithm: manifest.algorithm(),
                        path: entry.path.clone(),
                    });
                }
            }
        }

        for algorithm in bag.manifest_algorithms(ManifestKind::Tag)? {
            let manifest = bag.manifest(ManifestKind::Tag, algorithm)?;
            check_tag_manifest(bag, &manifest, &mut problems)?;
        }

        if let Some(expected) = bag.info()?.get(PAYLOAD_OXUM) {
            let actual = format!("{octets}.{}", files.len());
            if expected != actual {
                problems.push(BagProblem::OxumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        if problems.is_empty() {
            Ok(ValidationSummary {
                files: files.len(),
                octets,
                algorithms,
            })
        } else {
            tracing::debug!(count = problems.len(), "bag failed validation");
            Err(BagError::Invalid { problems })
        }
    }
}

fn check_tag_manifest(
    bag: &Bag,
    manifest: &Manifest,
    problems: &mut Vec<BagProblem>,
) -> BagResult<()> {
    for entry in manifest.entries() {
        let path = safe_join(bag.root(), &entry.path)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                let actual = manifest.algorithm().digest_hex(&bytes);
                if actual != entry.digest {
                    problems.push(BagProblem::DigestMismatch {
                        algorithm: manifest.algorithm(),
                        path: entry.path.clone(),
                        expected: entry.digest.clone(),
                        actual,
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                problems.push(BagProblem::MissingFile {
                    algorithm: manifest.algorithm(),
                    path: entry.path.clone(),
                });
            }
            Err(e) => return Err(BagError::io(&path, e)),
        }
    }
    Ok(())
}
