//! Zip archives of bags, and unpacking of submitted archives.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::bag::{BAG_INFO_TXT, Bag, BagInfo, PAYLOAD_OXUM, PROFILE_IDENTIFIER, SOFTWARE_AGENT};
use crate::error::{BagError, BagResult};
use crate::fs::walk_files;

/// Boilerplate metadata keys hidden from inspection
pub const INSPECT_HIDDEN: [&str; 3] = [SOFTWARE_AGENT, PROFILE_IDENTIFIER, PAYLOAD_OXUM];

const SYMLINK_MODE: u32 = 0o120000;
const FILE_TYPE_MASK: u32 = 0o170000;

/// Writes a bag into a single zip file
#[derive(Debug, Clone, Copy)]
pub struct Packager {
    compression: CompressionMethod,
}

impl Default for Packager {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl Packager {
    /// Packager using deflate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store entries without compression
    #[must_use]
    pub fn stored(mut self) -> Self {
        self.compression = CompressionMethod::Stored;
        self
    }

    /// Zip every file under the bag root into `destination`.
    ///
    /// Entry names are bag-relative, so the archive root is the bag root.
    /// The archive is written under a temporary name and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns error if the bag cannot be read or the archive written
    #[tracing::instrument(level = "debug", skip(self, bag), fields(root = %bag.root().display()))]
    pub fn package(&self, bag: &Bag, destination: &Path) -> BagResult<PathBuf> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BagError::io(parent, e))?;
        }
        let partial = destination.with_extension("zip.partial");
        let result = self.write_archive(bag, &partial);
        match result {
            Ok(entries) => {
                std::fs::rename(&partial, destination)
                    .map_err(|e| BagError::io(destination, e))?;
                tracing::debug!(entries, dest = %destination.display(), "bag archived");
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    fn write_archive(&self, bag: &Bag, path: &Path) -> BagResult<usize> {
        let file = std::fs::File::create(path).map_err(|e| BagError::io(path, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(self.compression);

        let files = walk_files(bag.root())?;
        for entry in &files {
            writer.start_file(entry.relative.as_str(), options)?;
            let mut input = std::fs::File::open(&entry.path)
                .map(BufReader::new)
                .map_err(|e| BagError::io(&entry.path, e))?;
            std::io::copy(&mut input, &mut writer).map_err(|e| BagError::io(&entry.path, e))?;
        }
        let mut inner = writer.finish()?;
        inner.flush().map_err(|e| BagError::io(path, e))?;
        Ok(files.len())
    }
}

/// Extract `archive` into `destination`.
///
/// Entries that would land outside `destination` and symlink entries are
/// rejected before anything is written for them.
///
/// # Errors
///
/// Returns `BagError::UnsafePath` for escaping or symlink entries, and
/// archive or I/O errors otherwise
pub fn unpack_archive(archive: &Path, destination: &Path) -> BagResult<usize> {
    let file = std::fs::File::open(archive).map_err(|e| BagError::io(archive, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    std::fs::create_dir_all(destination).map_err(|e| BagError::io(destination, e))?;

    let mut written = 0;
    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        let name = entry.name().to_string();
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & FILE_TYPE_MASK == SYMLINK_MODE)
        {
            return Err(BagError::UnsafePath(name));
        }
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| BagError::UnsafePath(name.clone()))?;
        let target = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| BagError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BagError::io(parent, e))?;
        }
        let mut out = std::fs::File::create(&target)
            .map(BufWriter::new)
            .map_err(|e| BagError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| BagError::io(&target, e))?;
        out.flush().map_err(|e| BagError::io(&target, e))?;
        written += 1;
    }
    Ok(written)
}

/// Metadata of an archived bag, without the boilerplate keys in
/// [`INSPECT_HIDDEN`].
///
/// # Errors
///
/// Returns `BagError::NotABag` if the archive holds no `bag-info.txt`
pub fn inspect_archive(archive: &Path) -> BagResult<BagInfo> {
    let file = std::fs::File::open(archive).map_err(|e| BagError::io(archive, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    let name = {
        let suffix = format!("/{BAG_INFO_TXT}");
        let mut candidates: Vec<&str> = zip
            .file_names()
            .filter(|n| *n == BAG_INFO_TXT || n.ends_with(&suffix))
            .collect();
        candidates.sort_by_key(|n| n.len());
        candidates
            .first()
            .map(|n| (*n).to_string())
            .ok_or_else(|| BagError::NotABag(archive.to_path_buf()))?
    };

    let mut text = String::new();
    zip.by_name(&name)?
        .read_to_string(&mut text)
        .map_err(|e| BagError::io(archive, e))?;
    Ok(BagInfo::parse(&text)
        .iter()
        .filter(|(key, _)| !INSPECT_HIDDEN.contains(key))
        .collect())
}
