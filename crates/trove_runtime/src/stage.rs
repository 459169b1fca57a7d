//! Submission staging.
//!
//! A submission is either a zip payload or a local directory. Either way it
//! lands in the run's workspace, any top-level `.git` is dropped, and the
//! tree is handed to the configured ownership normalizer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use trove_bag::fs::{copy_tree, remove_tree};
use trove_bag::unpack_archive;
use trove_core::{OwnershipConfig, RunId};

use crate::error::{RuntimeError, RuntimeResult};

const WORKSPACE_DIR: &str = "workspace";
const INITIAL_DIR: &str = "initial";

/// Where the submitted code and data come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Zip payload
    Archive(PathBuf),
    /// Directory copied as-is
    Directory(PathBuf),
}

/// Per-run scratch directories, named after the run id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirs {
    /// `<scratch>/<run-id>`
    pub root: PathBuf,
    /// Directory the entrypoint runs in, bagged in place as the final state
    pub workspace: PathBuf,
    /// Copy of the workspace taken before execution
    pub initial: PathBuf,
}

impl RunDirs {
    /// Layout for `run_id` under `scratch`
    #[must_use]
    pub fn for_run(scratch: &Path, run_id: &RunId) -> Self {
        let root = scratch.join(run_id.basename());
        Self {
            workspace: root.join(WORKSPACE_DIR),
            initial: root.join(INITIAL_DIR),
            root,
        }
    }

    /// Remove everything under the run's scratch root
    ///
    /// # Errors
    ///
    /// Returns error if an existing tree cannot be removed
    pub fn remove(&self) -> RuntimeResult<()> {
        remove_tree(&self.root).map_err(RuntimeError::from)
    }
}

/// Recursively sets the owner of a staged tree
#[async_trait]
pub trait OwnershipNormalizer: Send + Sync {
    /// Apply `ownership` to `dir` and everything below it
    async fn normalize(&self, dir: &Path, ownership: OwnershipConfig) -> RuntimeResult<()>;
}

/// Runs `chown -R uid:gid`
#[derive(Debug, Clone)]
pub struct ChownCommand {
    binary: PathBuf,
}

impl Default for ChownCommand {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("chown"),
        }
    }
}

impl ChownCommand {
    /// Use a specific `chown` binary
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OwnershipNormalizer for ChownCommand {
    async fn normalize(&self, dir: &Path, ownership: OwnershipConfig) -> RuntimeResult<()> {
        let owner = format!("{}:{}", ownership.uid, ownership.gid);
        tracing::debug!(dir = %dir.display(), %owner, "normalizing ownership");
        let output = tokio::process::Command::new(&self.binary)
            .arg("-R")
            .arg(&owner)
            .arg(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::stage(format!("cannot run {}: {e}", self.binary.display())))?;
        if !output.status.success() {
            return Err(RuntimeError::stage(format!(
                "chown {owner} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Places a submission into a run's workspace
#[derive(Clone)]
pub struct SubmissionStager {
    normalizer: Arc<dyn OwnershipNormalizer>,
    ownership: Option<OwnershipConfig>,
}

impl std::fmt::Debug for SubmissionStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionStager")
            .field("ownership", &self.ownership)
            .finish_non_exhaustive()
    }
}

impl SubmissionStager {
    /// Stager applying `ownership` through `normalizer`; `None` skips it
    #[must_use]
    pub fn new(normalizer: Arc<dyn OwnershipNormalizer>, ownership: Option<OwnershipConfig>) -> Self {
        Self {
            normalizer,
            ownership,
        }
    }

    /// Unpack or copy `submission` into `dirs.workspace`. Returns the number
    /// of files staged.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Stage` if the submission is missing, holds
    /// entries escaping the workspace, or cannot be normalized
    #[tracing::instrument(skip(self, dirs), fields(root = %dirs.root.display()))]
    pub async fn stage(&self, submission: &Submission, dirs: &RunDirs) -> RuntimeResult<usize> {
        tokio::fs::create_dir_all(&dirs.workspace)
            .await
            .map_err(|e| RuntimeError::io(&dirs.workspace, e))?;

        let workspace = dirs.workspace.clone();
        let owned = submission.clone();
        let staged = tokio::task::spawn_blocking(move || place(&owned, &workspace))
            .await
            .map_err(|e| RuntimeError::stage(format!("staging task failed: {e}")))??;

        if let Some(ownership) = self.ownership {
            self.normalizer.normalize(&dirs.workspace, ownership).await?;
        }
        tracing::info!(files = staged, "submission staged");
        Ok(staged)
    }
}

fn place(submission: &Submission, workspace: &Path) -> RuntimeResult<usize> {
    let staged = match submission {
        Submission::Archive(path) => {
            if !path.is_file() {
                return Err(RuntimeError::stage(format!(
                    "payload {} not found",
                    path.display()
                )));
            }
            unpack_archive(path, workspace).map_err(|e| RuntimeError::stage(e.to_string()))?
        }
        Submission::Directory(path) => {
            if !path.is_dir() {
                return Err(RuntimeError::stage(format!(
                    "directory {} not found",
                    path.display()
                )));
            }
            copy_tree(path, workspace)?
        }
    };
    remove_tree(&workspace.join(".git"))?;
    Ok(staged)
}
