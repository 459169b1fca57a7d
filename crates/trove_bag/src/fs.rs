//! Directory walking and copying helpers.

use std::path::{Component, Path, PathBuf};

use crate::error::{BagError, BagResult};

/// A regular file found under a root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WalkedFile {
    /// `/`-separated path relative to the walk root
    pub relative: String,
    /// Absolute (root-joined) path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// List every regular file below `root`, sorted by relative path.
///
/// Symlinks are never followed: a link is skipped with a warning, so nothing
/// outside `root` can be read through one. Special files are skipped too.
/// Directories are recursed into but not listed.
///
/// # Errors
///
/// Returns error if a directory cannot be read
pub fn walk_files(root: &Path) -> BagResult<Vec<WalkedFile>> {
    let mut out = Vec::new();
    walk_into(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk_into(root: &Path, dir: &Path, out: &mut Vec<WalkedFile>) -> BagResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| BagError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BagError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| BagError::io(&path, e))?;
        if file_type.is_symlink() {
            tracing::warn!(path = %path.display(), "skipping symbolic link");
            continue;
        }
        if file_type.is_dir() {
            walk_into(root, &path, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| BagError::io(&path, e))?;
        out.push(WalkedFile {
            relative: relative_string(root, &path)?,
            path,
            size: meta.len(),
        });
    }
    Ok(())
}

/// `path` relative to `root`, joined with `/`
///
/// # Errors
///
/// Returns `BagError::UnsafePath` if `path` is not below `root` or is not
/// valid UTF-8
pub fn relative_string(root: &Path, path: &Path) -> BagResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| BagError::UnsafePath(path.display().to_string()))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| BagError::UnsafePath(path.display().to_string()))?,
            ),
            _ => return Err(BagError::UnsafePath(path.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

/// Resolve a `/`-separated relative path under `root`, rejecting anything
/// that would escape it
///
/// # Errors
///
/// Returns `BagError::UnsafePath` for absolute paths and `..` components
pub fn safe_join(root: &Path, relative: &str) -> BagResult<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(BagError::UnsafePath(relative.to_string())),
        }
    }
    Ok(out)
}

/// Recursively copy `src` into `dst`, creating `dst`.
///
/// Symlinks are skipped with a warning rather than followed.
///
/// # Errors
///
/// Returns error if anything cannot be read or written
pub fn copy_tree(src: &Path, dst: &Path) -> BagResult<usize> {
    std::fs::create_dir_all(dst).map_err(|e| BagError::io(dst, e))?;
    let mut copied = 0;
    let entries = std::fs::read_dir(src).map_err(|e| BagError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BagError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| BagError::io(&from, e))?;
        if file_type.is_symlink() {
            tracing::warn!(path = %from.display(), "not copying symbolic link");
        } else if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to).map_err(|e| BagError::io(&from, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Remove a directory tree, ignoring one that does not exist
///
/// # Errors
///
/// Returns any other removal error
pub fn remove_tree(path: &Path) -> BagResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BagError::io(path, e)),
    }
}
