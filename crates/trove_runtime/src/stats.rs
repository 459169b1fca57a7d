//! Resource usage sampling for a running container.
//!
//! Samples are appended to a temporary side file, each prefixed with the
//! local sampling time. The engine's stats stream never ends by itself, so
//! the sampler runs until its cancellation token fires.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trove_core::Timestamp;

use crate::engine::{ContainerEngine, ContainerId};
use crate::error::{RuntimeError, RuntimeResult};

/// Sanitized stats side file
pub const STATS_FILE: &str = ".docker_stats";
/// Raw stats side file, removed after sanitizing
pub const STATS_TMP_FILE: &str = ".docker_stats.tmp";

static SCREEN_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[HJ]").expect("literal pattern compiles"));

/// Strip cursor-home and clear-screen sequences
#[must_use]
pub fn sanitize(text: &str) -> Cow<'_, str> {
    SCREEN_CONTROL.replace_all(text, "")
}

/// Background stats writer for one container
#[derive(Debug)]
pub struct StatsSampler {
    token: CancellationToken,
    handle: JoinHandle<RuntimeResult<usize>>,
    raw_path: PathBuf,
}

impl StatsSampler {
    /// Start sampling `id` into `<run_dir>/.docker_stats.tmp`
    #[must_use]
    pub fn spawn(engine: Arc<dyn ContainerEngine>, id: ContainerId, run_dir: &Path) -> Self {
        let token = CancellationToken::new();
        let raw_path = run_dir.join(STATS_TMP_FILE);
        let handle = tokio::spawn(sample(engine, id, raw_path.clone(), token.clone()));
        Self {
            token,
            handle,
            raw_path,
        }
    }

    /// Stop sampling, wait for the writer, and write the sanitized log to
    /// `.docker_stats` next to the raw file. Returns the number of samples.
    ///
    /// # Errors
    ///
    /// Returns error if the writer failed or the side files cannot be
    /// rewritten
    pub async fn finish(self) -> RuntimeResult<usize> {
        self.token.cancel();
        let samples = self
            .handle
            .await
            .map_err(|e| RuntimeError::stage(format!("stats sampler panicked: {e}")))??;

        let final_path = self.raw_path.with_file_name(STATS_FILE);
        let raw = match tokio::fs::read_to_string(&self.raw_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(RuntimeError::io(&self.raw_path, e)),
        };
        tokio::fs::write(&final_path, sanitize(&raw).as_bytes())
            .await
            .map_err(|e| RuntimeError::io(&final_path, e))?;
        match tokio::fs::remove_file(&self.raw_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RuntimeError::io(&self.raw_path, e)),
        }
        Ok(samples)
    }
}

async fn sample(
    engine: Arc<dyn ContainerEngine>,
    id: ContainerId,
    raw_path: PathBuf,
    token: CancellationToken,
) -> RuntimeResult<usize> {
    let mut file = tokio::fs::File::create(&raw_path)
        .await
        .map_err(|e| RuntimeError::io(&raw_path, e))?;
    let opened = tokio::select! {
        () = token.cancelled() => return Ok(0),
        opened = engine.stats(&id) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            // a missing sample log does not invalidate the run
            tracing::warn!(container = %id, error = %e, "stats unavailable");
            return Ok(0);
        }
    };

    let mut samples = 0;
    loop {
        let line = tokio::select! {
            () = token.cancelled() => break,
            line = stream.next() => line,
        };
        match line {
            Some(Ok(line)) => {
                let entry = format!("{} {}\n", Timestamp::now().to_stats_prefix(), line);
                file.write_all(entry.as_bytes())
                    .await
                    .map_err(|e| RuntimeError::io(&raw_path, e))?;
                samples += 1;
            }
            Some(Err(e)) => {
                tracing::warn!(container = %id, error = %e, "stats stream failed");
                break;
            }
            None => break,
        }
    }
    file.flush()
        .await
        .map_err(|e| RuntimeError::io(&raw_path, e))?;
    tracing::debug!(container = %id, samples, "stats sampler stopped");
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_screen_control() {
        assert_eq!(
            sanitize("\x1b[2J\x1b[H0.00%,1MiB / 2GiB,0B / 0B,0B / 0B,1"),
            "0.00%,1MiB / 2GiB,0B / 0B,0B / 0B,1"
        );
        assert_eq!(sanitize("plain"), "plain");
        // other escapes are kept
        assert_eq!(sanitize("\x1b[1mbold"), "\x1b[1mbold");
    }
}
