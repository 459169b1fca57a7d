//! Runs and the files they leave in storage.

use std::path::{Path, PathBuf};

use trove_core::{ImageSettings, ImageTag, RunId, Timestamp};
use trove_runtime::Submission;

use crate::state::RunStateMachine;

const DECLARATION_EXT: &str = "jsonld";
const SIGNATURE_EXT: &str = "sig";
const TOKEN_EXT: &str = "tsr";
const ARCHIVE_SUFFIX: &str = "_run.zip";
const PAYLOAD_EXT: &str = "zip";

/// One submission moving through the pipeline
#[derive(Debug, Clone)]
pub struct Run {
    /// Run id
    pub id: RunId,
    /// Submitted code and data
    pub submission: Submission,
    /// Tag of the image built for this run
    pub image: ImageTag,
    /// Entrypoint, user, target directory and network flag
    pub settings: ImageSettings,
    /// When the entrypoint started
    pub started_at: Option<Timestamp>,
    /// When the entrypoint finished
    pub ended_at: Option<Timestamp>,
    /// Progress through the pipeline
    pub state: RunStateMachine,
}

impl Run {
    /// New run for `submission`
    #[must_use]
    pub fn new(submission: Submission, settings: ImageSettings) -> Self {
        let id = RunId::new();
        Self {
            image: ImageTag::for_run(&id),
            id,
            submission,
            settings,
            started_at: None,
            ended_at: None,
            state: RunStateMachine::new(),
        }
    }

    /// Base name of every file the run stores
    #[must_use]
    pub fn basename(&self) -> String {
        self.id.basename()
    }
}

/// Where a run's declaration, signature, token and archive live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutputs {
    /// `<storage>/<run>.jsonld`
    pub declaration: PathBuf,
    /// `<storage>/<run>.sig`
    pub signature: PathBuf,
    /// `<storage>/<run>.tsr`
    pub token: PathBuf,
    /// `<storage>/<run>_run.zip`
    pub archive: PathBuf,
    /// `<storage>/<run>.zip`, where an archive submission is kept
    pub payload: PathBuf,
}

impl RunOutputs {
    /// Paths for the run named `basename`
    #[must_use]
    pub fn new(storage: &Path, basename: &str) -> Self {
        Self {
            declaration: storage.join(format!("{basename}.{DECLARATION_EXT}")),
            signature: storage.join(format!("{basename}.{SIGNATURE_EXT}")),
            token: storage.join(format!("{basename}.{TOKEN_EXT}")),
            archive: storage.join(format!("{basename}{ARCHIVE_SUFFIX}")),
            payload: storage.join(format!("{basename}.{PAYLOAD_EXT}")),
        }
    }

    /// Every output the run produces. The stored payload is an input and is
    /// not among them.
    #[must_use]
    pub fn paths(&self) -> [&Path; 4] {
        [&self.declaration, &self.signature, &self.token, &self.archive]
    }

    /// File name of the archive
    #[must_use]
    pub fn archive_name(&self) -> String {
        self.archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Delete whatever outputs exist; returns how many were removed
    pub fn remove(&self) -> usize {
        let mut removed = 0;
        for path in self.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove run output");
                }
            }
        }
        removed
    }
}

/// A completed run found in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRun {
    /// Base name
    pub basename: String,
    /// Its output paths
    pub outputs: RunOutputs,
}

impl StoredRun {
    /// Whether the declaration, token and archive are all present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outputs.paths().iter().all(|p| p.is_file())
    }
}

/// Runs in `storage` that have a signature file, sorted by name
///
/// # Errors
///
/// Returns the I/O error if `storage` cannot be listed
pub fn stored_runs(storage: &Path) -> std::io::Result<Vec<StoredRun>> {
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(storage)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SIGNATURE_EXT) {
            continue;
        }
        let Some(basename) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        runs.push(StoredRun {
            basename: basename.to_string(),
            outputs: RunOutputs::new(storage, basename),
        });
    }
    runs.sort_by(|a, b| a.basename.cmp(&b.basename));
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_layout() {
        let outputs = RunOutputs::new(Path::new("/srv/storage"), "abc");
        assert_eq!(outputs.declaration, Path::new("/srv/storage/abc.jsonld"));
        assert_eq!(outputs.signature, Path::new("/srv/storage/abc.sig"));
        assert_eq!(outputs.token, Path::new("/srv/storage/abc.tsr"));
        assert_eq!(outputs.archive, Path::new("/srv/storage/abc_run.zip"));
        assert_eq!(outputs.archive_name(), "abc_run.zip");
        assert_eq!(outputs.payload, Path::new("/srv/storage/abc.zip"));
        assert!(!outputs.paths().contains(&outputs.payload.as_path()));
    }

    #[test]
    fn test_run_names_derive_from_id() {
        let a = Run::new(Submission::Directory(PathBuf::from("/src")), ImageSettings::default());
        let b = Run::new(Submission::Directory(PathBuf::from("/src")), ImageSettings::default());
        assert_ne!(a.id, b.id);
        assert_ne!(a.image, b.image);
        assert_eq!(a.basename(), a.id.basename());
        assert!(a.state.current().is_none());
    }

    #[test]
    fn test_remove_deletes_only_existing() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = RunOutputs::new(dir.path(), "run");
        std::fs::write(&outputs.declaration, "{}").unwrap();
        std::fs::write(&outputs.signature, "sig").unwrap();
        assert_eq!(outputs.remove(), 2);
        assert!(!outputs.declaration.exists());
        assert_eq!(outputs.remove(), 0);
    }

    #[test]
    fn test_stored_runs_by_signature_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a"] {
            for path in RunOutputs::new(dir.path(), name).paths() {
                std::fs::write(path, "x").unwrap();
            }
        }
        // stray files, and a declaration without a signature
        std::fs::write(dir.path().join("c.zip"), "x").unwrap();
        std::fs::write(dir.path().join("d.jsonld"), "x").unwrap();
        std::fs::write(dir.path().join("e.sig"), "x").unwrap();

        let runs = stored_runs(dir.path()).unwrap();
        let names: Vec<_> = runs.iter().map(|r| r.basename.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "e"]);
        assert!(runs[0].is_complete());
        assert!(!runs[2].is_complete());
    }
}
