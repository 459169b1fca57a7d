//! Fixity manifests.
//!
//! One line per file, `<hex digest>  <relative path>`, sorted by path.
//! Paths use `/` separators and percent-encode `%`, CR and LF.

use std::path::Path;

use trove_core::HashAlgorithm;

use crate::error::{BagError, BagResult};

/// Which files a manifest covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// Files under `data/`
    Payload,
    /// Tag files at the bag root
    Tag,
}

impl ManifestKind {
    /// File name for `algorithm`
    #[must_use]
    pub fn file_name(&self, algorithm: HashAlgorithm) -> String {
        match self {
            Self::Payload => format!("manifest-{}.txt", algorithm.as_str()),
            Self::Tag => format!("tagmanifest-{}.txt", algorithm.as_str()),
        }
    }

    /// Recognize a manifest file name, returning kind and algorithm
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<(Self, HashAlgorithm)> {
        let stem = name.strip_suffix(".txt")?;
        let (kind, alg) = if let Some(alg) = stem.strip_prefix("tagmanifest-") {
            (Self::Tag, alg)
        } else if let Some(alg) = stem.strip_prefix("manifest-") {
            (Self::Payload, alg)
        } else {
            return None;
        };
        alg.parse().ok().map(|alg| (kind, alg))
    }
}

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    /// Path relative to the bag root, `/`-separated
    pub path: String,
    /// Lowercase hex digest
    pub digest: String,
}

/// Digest listing for one algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    kind: ManifestKind,
    algorithm: HashAlgorithm,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Empty manifest
    #[must_use]
    pub const fn new(kind: ManifestKind, algorithm: HashAlgorithm) -> Self {
        Self {
            kind,
            algorithm,
            entries: Vec::new(),
        }
    }

    /// Covered files
    #[must_use]
    pub const fn kind(&self) -> ManifestKind {
        self.kind
    }

    /// Digest algorithm
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Entries sorted by path
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of listed files
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is listed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Digest recorded for `path`
    #[must_use]
    pub fn digest_of(&self, path: &str) -> Option<&str> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| self.entries[i].digest.as_str())
    }

    /// Record a digest, replacing any previous one for the same path
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        let entry = ManifestEntry {
            path: path.into(),
            digest: digest.into(),
        };
        match self
            .entries
            .binary_search_by(|e| e.path.as_str().cmp(&entry.path))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Parse manifest text
    ///
    /// # Errors
    ///
    /// Returns `BagError::MalformedManifest` for lines without a path, digests
    /// of the wrong length or non-hex digests, and duplicate paths
    pub fn parse(kind: ManifestKind, algorithm: HashAlgorithm, text: &str) -> BagResult<Self> {
        let file = kind.file_name(algorithm);
        let mut manifest = Self::new(kind, algorithm);
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: &str| BagError::MalformedManifest {
                file: file.clone(),
                line: idx + 1,
                reason: reason.to_string(),
            };
            let (digest, path) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("missing path"))?;
            let path = path.trim_start();
            if path.is_empty() {
                return Err(malformed("missing path"));
            }
            if digest.len() != algorithm.hex_len()
                || !digest.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(malformed("digest does not match algorithm"));
            }
            let path = decode_path(path);
            if manifest.digest_of(&path).is_some() {
                return Err(malformed("duplicate path"));
            }
            manifest.insert(path, digest.to_ascii_lowercase());
        }
        Ok(manifest)
    }

    /// Read a manifest file from a bag root
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or malformed
    pub fn load(root: &Path, kind: ManifestKind, algorithm: HashAlgorithm) -> BagResult<Self> {
        let path = root.join(kind.file_name(algorithm));
        let text = std::fs::read_to_string(&path).map_err(|e| BagError::io(&path, e))?;
        Self::parse(kind, algorithm, &text)
    }

    /// Render manifest text
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.digest);
            out.push_str("  ");
            out.push_str(&encode_path(&entry.path));
            out.push('\n');
        }
        out
    }

    /// Write into a bag root under its standard name
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn store(&self, root: &Path) -> BagResult<()> {
        let path = root.join(self.kind.file_name(self.algorithm));
        std::fs::write(&path, self.to_text()).map_err(|e| BagError::io(&path, e))
    }
}

fn encode_path(path: &str) -> String {
    path.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn decode_path(path: &str) -> String {
    path.replace("%0A", "\n")
        .replace("%0a", "\n")
        .replace("%0D", "\r")
        .replace("%0d", "\r")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_file_names() {
        assert_eq!(
            ManifestKind::Payload.file_name(HashAlgorithm::Sha256),
            "manifest-sha256.txt"
        );
        assert_eq!(
            ManifestKind::Tag.file_name(HashAlgorithm::Md5),
            "tagmanifest-md5.txt"
        );
        assert_eq!(
            ManifestKind::parse_file_name("tagmanifest-sha256.txt"),
            Some((ManifestKind::Tag, HashAlgorithm::Sha256))
        );
        assert_eq!(
            ManifestKind::parse_file_name("manifest-md5.txt"),
            Some((ManifestKind::Payload, HashAlgorithm::Md5))
        );
        assert_eq!(ManifestKind::parse_file_name("manifest-crc.txt"), None);
        assert_eq!(ManifestKind::parse_file_name("bag-info.txt"), None);
    }

    #[test]
    fn test_parse_two_space_separator() {
        let text = format!("{SHA}  data/out put.txt\n{SHA}  data/a.txt\n");
        let manifest = Manifest::parse(ManifestKind::Payload, HashAlgorithm::Sha256, &text).unwrap();
        assert_eq!(manifest.len(), 2);
        // sorted by path regardless of file order
        assert_eq!(manifest.entries()[0].path, "data/a.txt");
        assert_eq!(manifest.digest_of("data/out put.txt"), Some(SHA));
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        let short = "abcd  data/a.txt\n";
        assert!(matches!(
            Manifest::parse(ManifestKind::Payload, HashAlgorithm::Sha256, short),
            Err(BagError::MalformedManifest { line: 1, .. })
        ));

        let no_path = format!("{SHA}\n");
        assert!(Manifest::parse(ManifestKind::Payload, HashAlgorithm::Sha256, &no_path).is_err());

        let dup = format!("{SHA}  data/a\n{SHA}  data/a\n");
        assert!(matches!(
            Manifest::parse(ManifestKind::Payload, HashAlgorithm::Sha256, &dup),
            Err(BagError::MalformedManifest { line: 2, .. })
        ));
    }

    #[test]
    fn test_text_is_sorted_and_encoded() {
        let mut manifest = Manifest::new(ManifestKind::Payload, HashAlgorithm::Sha256);
        manifest.insert("data/z", SHA);
        manifest.insert("data/100%\nodd", SHA);
        let text = manifest.to_text();
        assert_eq!(
            text,
            format!("{SHA}  data/100%25%0Aodd\n{SHA}  data/z\n")
        );
        let back = Manifest::parse(ManifestKind::Payload, HashAlgorithm::Sha256, &text).unwrap();
        assert_eq!(back, manifest);
    }

    proptest! {
        #[test]
        fn prop_insert_keeps_paths_sorted(paths in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
            let mut manifest = Manifest::new(ManifestKind::Payload, HashAlgorithm::Md5);
            for p in &paths {
                manifest.insert(format!("data/{p}"), "0".repeat(32));
            }
            let listed: Vec<_> = manifest.entries().iter().map(|e| e.path.clone()).collect();
            let mut expected: Vec<_> = paths.iter().map(|p| format!("data/{p}")).collect();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(listed, expected);
        }
    }
}
