//! Arrangements: bagged snapshots of a run directory.
//!
//! Ordinal 0 is the copy taken before execution, ordinal 1 the run
//! directory itself after execution.

use std::path::{Path, PathBuf};

use trove_core::{HashAlgorithm, Sha256Digest};

use crate::bag::{Bag, BagInfo};
use crate::error::{BagError, BagResult};
use crate::fs::copy_tree;
use crate::manifest::ManifestKind;

/// One payload file of an arrangement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrangementEntry {
    /// SHA-256 of the file content
    pub digest: Sha256Digest,
    /// Bag-relative path, including the `data/` prefix
    pub path: String,
}

/// A bagged snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrangement {
    /// Position in the run (0 initial, 1 final)
    pub ordinal: u32,
    /// Bag root
    pub root: PathBuf,
    /// Payload files in manifest order
    pub entries: Vec<ArrangementEntry>,
}

impl Arrangement {
    /// Read an arrangement from a bag's SHA-256 payload manifest
    ///
    /// # Errors
    ///
    /// Returns error if the manifest is missing or holds invalid digests
    pub fn from_bag(ordinal: u32, bag: &Bag) -> BagResult<Self> {
        let manifest = bag.manifest(ManifestKind::Payload, HashAlgorithm::Sha256)?;
        let file = ManifestKind::Payload.file_name(HashAlgorithm::Sha256);
        let entries = manifest
            .entries()
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                Sha256Digest::from_hex(&entry.digest)
                    .map(|digest| ArrangementEntry {
                        digest,
                        path: entry.path.clone(),
                    })
                    .map_err(|e| BagError::MalformedManifest {
                        file: file.clone(),
                        line: idx + 1,
                        reason: e.to_string(),
                    })
            })
            .collect::<BagResult<Vec<_>>>()?;
        Ok(Self {
            ordinal,
            root: bag.root().to_path_buf(),
            entries,
        })
    }
}

/// Records initial and final arrangements with shared bag metadata
#[derive(Debug, Clone, Default)]
pub struct ArrangementRecorder {
    info: BagInfo,
}

impl ArrangementRecorder {
    /// Recorder writing `info` into every bag
    #[must_use]
    pub const fn new(info: BagInfo) -> Self {
        Self { info }
    }

    /// Copy `workspace` to `destination` and bag the copy as arrangement 0.
    /// The workspace itself is left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if copying or bagging fails
    pub fn record_initial(&self, workspace: &Path, destination: &Path) -> BagResult<Arrangement> {
        let copied = copy_tree(workspace, destination)?;
        tracing::debug!(files = copied, dest = %destination.display(), "initial arrangement copied");
        let bag = Bag::create(destination, &self.info)?;
        Arrangement::from_bag(0, &bag)
    }

    /// Bag `workspace` in place as arrangement 1
    ///
    /// # Errors
    ///
    /// Returns error if bagging fails
    pub fn record_final(&self, workspace: &Path) -> BagResult<Arrangement> {
        let bag = Bag::create(workspace, &self.info)?;
        Arrangement::from_bag(1, &bag)
    }
}
