//! Bag layout: creation in place and opening existing bags.

use std::path::{Path, PathBuf};

use trove_core::{HashAlgorithm, Timestamp};

use crate::error::{BagError, BagResult};
use crate::fs::walk_files;
use crate::manifest::{Manifest, ManifestKind};

/// Payload directory name
pub const PAYLOAD_DIR: &str = "data";
/// Bag declaration file
pub const BAGIT_TXT: &str = "bagit.txt";
/// Bag metadata file
pub const BAG_INFO_TXT: &str = "bag-info.txt";

/// Metadata key for the bagging date
pub const BAGGING_DATE: &str = "Bagging-Date";
/// Metadata key naming the software that made the bag
pub const SOFTWARE_AGENT: &str = "Bag-Software-Agent";
/// Metadata key for a bag profile
pub const PROFILE_IDENTIFIER: &str = "BagIt-Profile-Identifier";
/// Metadata key for `<octets>.<file count>` of the payload
pub const PAYLOAD_OXUM: &str = "Payload-Oxum";

const BAGIT_DECLARATION: &str = "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\n";

/// Ordered `Key: Value` metadata. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagInfo {
    fields: Vec<(String, String)>,
}

impl BagInfo {
    /// Empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Add a field in place
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// First value recorded for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse `Key: Value` lines. Lines starting with whitespace continue the
    /// previous value.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut info = Self::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = info.fields.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => info.push(key.trim(), value.trim()),
                None => tracing::debug!(line, "ignoring bag-info line without ':'"),
            }
        }
        info
    }

    /// Render as `Key: Value` lines
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&value.replace('\n', " "));
            out.push('\n');
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BagInfo {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut info = Self::new();
        for (k, v) in iter {
            info.push(k, v);
        }
        info
    }
}

/// A bag on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    root: PathBuf,
}

impl Bag {
    /// Convert `dir` into a bag in place.
    ///
    /// Everything currently in `dir` moves under `data/`; payload and tag
    /// manifests are written for every algorithm in
    /// [`HashAlgorithm::MANIFEST`]. `info` is written to `bag-info.txt`
    /// followed by the bagging date, software agent and payload oxum.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be restructured or a file
    /// cannot be hashed
    #[tracing::instrument(level = "debug", skip(info), fields(dir = %dir.display()))]
    pub fn create(dir: &Path, info: &BagInfo) -> BagResult<Self> {
        let staging_name = format!(".bag-payload-{}", uuid::Uuid::new_v4().simple());
        let staging = dir.join(&staging_name);
        std::fs::create_dir(&staging).map_err(|e| BagError::io(&staging, e))?;

        let entries = std::fs::read_dir(dir).map_err(|e| BagError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BagError::io(dir, e))?;
            if entry.file_name() == staging_name.as_str() {
                continue;
            }
            let to = staging.join(entry.file_name());
            std::fs::rename(entry.path(), &to).map_err(|e| BagError::io(entry.path(), e))?;
        }
        let payload = dir.join(PAYLOAD_DIR);
        std::fs::rename(&staging, &payload).map_err(|e| BagError::io(&payload, e))?;

        let bag = Self {
            root: dir.to_path_buf(),
        };
        let (octets, count) = bag.write_payload_manifests()?;

        std::fs::write(dir.join(BAGIT_TXT), BAGIT_DECLARATION)
            .map_err(|e| BagError::io(dir.join(BAGIT_TXT), e))?;

        let mut full_info = info.clone();
        full_info.push(BAGGING_DATE, Timestamp::now().to_date());
        full_info.push(
            SOFTWARE_AGENT,
            format!("trove_bag v{}", env!("CARGO_PKG_VERSION")),
        );
        full_info.push(PAYLOAD_OXUM, format!("{octets}.{count}"));
        std::fs::write(dir.join(BAG_INFO_TXT), full_info.to_text())
            .map_err(|e| BagError::io(dir.join(BAG_INFO_TXT), e))?;

        bag.write_tag_manifests()?;
        tracing::debug!(files = count, octets, "bag created");
        Ok(bag)
    }

    /// Open an existing bag
    ///
    /// # Errors
    ///
    /// Returns `BagError::NotABag` if `root` has no `bagit.txt`
    pub fn open(root: impl Into<PathBuf>) -> BagResult<Self> {
        let root = root.into();
        if !root.join(BAGIT_TXT).is_file() {
            return Err(BagError::NotABag(root));
        }
        Ok(Self { root })
    }

    /// Bag root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Payload directory
    #[must_use]
    pub fn payload_dir(&self) -> PathBuf {
        self.root.join(PAYLOAD_DIR)
    }

    /// Parsed `bag-info.txt`; an absent file reads as empty
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub fn info(&self) -> BagResult<BagInfo> {
        let path = self.root.join(BAG_INFO_TXT);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(BagInfo::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BagInfo::new()),
            Err(e) => Err(BagError::io(&path, e)),
        }
    }

    /// Load one manifest
    ///
    /// # Errors
    ///
    /// Returns error if the manifest is missing or malformed
    pub fn manifest(&self, kind: ManifestKind, algorithm: HashAlgorithm) -> BagResult<Manifest> {
        Manifest::load(&self.root, kind, algorithm)
    }

    /// Algorithms with a manifest of `kind` present at the root, sorted
    ///
    /// # Errors
    ///
    /// Returns error if the root cannot be listed
    pub fn manifest_algorithms(&self, kind: ManifestKind) -> BagResult<Vec<HashAlgorithm>> {
        let mut found = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| BagError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BagError::io(&self.root, e))?;
            if let Some((k, alg)) = entry
                .file_name()
                .to_str()
                .and_then(ManifestKind::parse_file_name)
            {
                if k == kind {
                    found.push(alg);
                }
            }
        }
        found.sort_by_key(|alg| alg.as_str());
        Ok(found)
    }

    fn write_payload_manifests(&self) -> BagResult<(u64, usize)> {
        let payload = self.payload_dir();
        let files = walk_files(&payload)?;
        let mut manifests: Vec<Manifest> = HashAlgorithm::MANIFEST
            .iter()
            .map(|alg| Manifest::new(ManifestKind::Payload, *alg))
            .collect();
        let mut octets = 0;
        for file in &files {
            let digests = HashAlgorithm::digest_file_multi(&HashAlgorithm::MANIFEST, &file.path)
                .map_err(|e| BagError::io(&file.path, e))?;
            let name = format!("{PAYLOAD_DIR}/{}", file.relative);
            for (manifest, (_, digest)) in manifests.iter_mut().zip(digests) {
                manifest.insert(name.clone(), digest);
            }
            octets += file.size;
        }
        for manifest in &manifests {
            manifest.store(&self.root)?;
        }
        Ok((octets, files.len()))
    }

    fn write_tag_manifests(&self) -> BagResult<()> {
        let mut tag_files = vec![BAGIT_TXT.to_string(), BAG_INFO_TXT.to_string()];
        for alg in HashAlgorithm::MANIFEST {
            tag_files.push(ManifestKind::Payload.file_name(alg));
        }
        for alg in HashAlgorithm::MANIFEST {
            let mut manifest = Manifest::new(ManifestKind::Tag, alg);
            for name in &tag_files {
                let path = self.root.join(name);
                let bytes = std::fs::read(&path).map_err(|e| BagError::io(&path, e))?;
                manifest.insert(name.clone(), alg.digest_hex(&bytes));
            }
            manifest.store(&self.root)?;
        }
        Ok(())
    }
}
