//! Artifact compositions.
//!
//! Arrangements are unioned by content digest. Each artifact remembers, per
//! arrangement ordinal, the first path it was found at with the bag's
//! `data/` prefix removed. Artifacts are ordered by ascending digest, so the
//! result does not depend on the order manifests list their files in.

use std::collections::BTreeMap;
use std::path::PathBuf;

use trove_bag::Arrangement;
use trove_core::{Sha256Digest, composition_fingerprint};

use crate::error::{DeclarationError, DeclarationResult};
use crate::mime::MimeSniffer;

const PAYLOAD_PREFIX: &str = "data/";

/// One distinct piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// SHA-256 of the content
    pub digest: Sha256Digest,
    /// Sniffed media type
    pub mime_type: String,
    /// Arrangement ordinal to payload-relative path
    pub locations: BTreeMap<u32, String>,
}

impl Artifact {
    /// Path in arrangement `ordinal`, if present there
    #[must_use]
    pub fn location(&self, ordinal: u32) -> Option<&str> {
        self.locations.get(&ordinal).map(String::as_str)
    }
}

/// Where an artifact sits inside one arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locus<'a> {
    /// Index into [`Composition::artifacts`]
    pub artifact: usize,
    /// Payload-relative path
    pub location: &'a str,
}

/// Deduplicated artifacts of a run with their fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    artifacts: Vec<Artifact>,
    fingerprint: Sha256Digest,
}

impl Composition {
    /// Union `(ordinal, digest, bag path)` rows. `mime` is asked once per
    /// distinct digest with the ordinal and bag path of its first
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `mime`
    pub fn assemble<I, F>(rows: I, mut mime: F) -> DeclarationResult<Self>
    where
        I: IntoIterator<Item = (u32, Sha256Digest, String)>,
        F: FnMut(u32, &str) -> DeclarationResult<String>,
    {
        let mut by_digest: BTreeMap<Sha256Digest, (u32, String, BTreeMap<u32, String>)> =
            BTreeMap::new();
        for (ordinal, digest, path) in rows {
            let entry = by_digest
                .entry(digest)
                .or_insert_with(|| (ordinal, path.clone(), BTreeMap::new()));
            entry
                .2
                .entry(ordinal)
                .or_insert_with(|| strip_payload_prefix(&path).to_string());
        }

        let mut artifacts = Vec::with_capacity(by_digest.len());
        for (digest, (ordinal, first_path, locations)) in by_digest {
            artifacts.push(Artifact {
                digest,
                mime_type: mime(ordinal, &first_path)?,
                locations,
            });
        }
        let fingerprint = composition_fingerprint(artifacts.iter().map(|a| &a.digest));
        Ok(Self {
            artifacts,
            fingerprint,
        })
    }

    /// Artifacts in ascending digest order
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// SHA-256 over the sorted, concatenated artifact digests
    #[must_use]
    pub const fn fingerprint(&self) -> Sha256Digest {
        self.fingerprint
    }

    /// Artifacts present in arrangement `ordinal`, in artifact order
    #[must_use]
    pub fn loci(&self, ordinal: u32) -> Vec<Locus<'_>> {
        self.artifacts
            .iter()
            .enumerate()
            .filter_map(|(artifact, a)| {
                a.location(ordinal).map(|location| Locus { artifact, location })
            })
            .collect()
    }
}

/// Builds compositions from recorded arrangements, sniffing media types
/// from the bagged files
pub struct CompositionFingerprinter<S> {
    sniffer: S,
}

impl<S: MimeSniffer> CompositionFingerprinter<S> {
    /// Fingerprinter using `sniffer`
    #[must_use]
    pub const fn new(sniffer: S) -> Self {
        Self { sniffer }
    }

    /// Composition of `arrangements`
    ///
    /// # Errors
    ///
    /// Returns `DeclarationError::Io` if a representative file cannot be read
    pub fn fingerprint(&self, arrangements: &[&Arrangement]) -> DeclarationResult<Composition> {
        let roots: BTreeMap<u32, PathBuf> = arrangements
            .iter()
            .map(|a| (a.ordinal, a.root.clone()))
            .collect();
        let rows = arrangements.iter().flat_map(|a| {
            a.entries
                .iter()
                .map(|e| (a.ordinal, e.digest, e.path.clone()))
        });
        let composition = Composition::assemble(rows, |ordinal, path| {
            let root = roots.get(&ordinal).ok_or_else(|| {
                DeclarationError::Malformed(format!("unknown arrangement {ordinal}"))
            })?;
            let file = root.join(path);
            self.sniffer
                .sniff(&file)
                .map_err(|source| DeclarationError::Io { path: file, source })
        })?;
        tracing::debug!(
            artifacts = composition.artifacts().len(),
            fingerprint = %composition.fingerprint(),
            "composition computed"
        );
        Ok(composition)
    }
}

fn strip_payload_prefix(path: &str) -> &str {
    path.strip_prefix(PAYLOAD_PREFIX).unwrap_or(path)
}
