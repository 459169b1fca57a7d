//! Isolated execution of a built image.
//!
//! The run directory is mounted at the target directory, which is also the
//! working directory, and `sh <entrypoint>` runs as the container user.
//! While it runs, log lines are relayed and resource usage is sampled; both
//! are joined before the container's output is written to side files.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use trove_core::{EventSink, ImageSettings, ImageTag, LogSource, Timestamp};

use crate::engine::{ContainerEngine, ContainerId, ContainerSpec, VolumeMount};
use crate::error::{RuntimeError, RuntimeResult};
use crate::stats::StatsSampler;

/// Captured standard output
pub const STDOUT_FILE: &str = ".stdout";
/// Captured standard error
pub const STDERR_FILE: &str = ".stderr";
/// Name of the entrypoint that ran
pub const ENTRYPOINT_FILE: &str = ".entrypoint";

/// What to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Built image
    pub image: ImageTag,
    /// Run directory as seen by this process
    pub run_dir: PathBuf,
    /// Run directory as seen by the engine host
    pub host_run_dir: PathBuf,
    /// Entrypoint, user, target directory and isolation
    pub settings: ImageSettings,
    /// Container name
    pub name: Option<String>,
}

/// Outcome of a finished container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Entrypoint exit code
    pub exit_code: i64,
    /// Taken just before the container started
    pub started_at: Timestamp,
    /// Taken once the container exited
    pub ended_at: Timestamp,
    /// Resource usage samples recorded
    pub stats_samples: usize,
    /// Log lines relayed
    pub log_lines: usize,
}

/// Runs entrypoints under isolation
#[derive(Clone)]
pub struct ExecutionDriver {
    engine: Arc<dyn ContainerEngine>,
}

impl std::fmt::Debug for ExecutionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDriver").finish_non_exhaustive()
    }
}

impl ExecutionDriver {
    /// Driver over `engine`
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Container for `request`. The network stays detached unless the
    /// settings opt in.
    #[must_use]
    pub fn container_spec(request: &ExecutionRequest) -> ContainerSpec {
        let settings = &request.settings;
        let mut spec = ContainerSpec::new(
            request.image.as_str(),
            vec!["sh".to_string(), settings.entrypoint.clone()],
        )
        .with_user(settings.container_user.clone())
        .with_working_dir(settings.target_repo_dir.clone())
        .with_network(settings.network_enabled)
        .with_mount(VolumeMount::read_write(
            &request.host_run_dir,
            settings.target_repo_dir.clone(),
        ));
        if let Some(name) = &request.name {
            spec = spec.with_name(name.clone());
        }
        spec
    }

    /// Execute and wait for the entrypoint.
    ///
    /// The container is removed on every path.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::ExecutionFailed` on a non-zero exit code, or an
    /// engine or I/O error if the container cannot be run or its output
    /// cannot be written
    #[tracing::instrument(skip(self, request, sink), fields(image = %request.image))]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        sink: &EventSink,
    ) -> RuntimeResult<ExecutionReport> {
        let spec = Self::container_spec(request);
        let id = self.engine.create(&spec).await?;
        tracing::debug!(container = %id, network = spec.network_enabled, "run container created");

        let outcome = self.run_container(&id, request, sink).await;

        if let Err(e) = self.engine.remove(&id).await {
            tracing::warn!(container = %id, error = %e, "failed to remove run container");
        }

        let report = outcome?;
        if report.exit_code != 0 {
            tracing::info!(exit_code = report.exit_code, "entrypoint failed");
            return Err(RuntimeError::ExecutionFailed {
                exit_code: report.exit_code,
            });
        }
        tracing::info!(
            samples = report.stats_samples,
            lines = report.log_lines,
            "entrypoint finished"
        );
        Ok(report)
    }

    async fn run_container(
        &self,
        id: &ContainerId,
        request: &ExecutionRequest,
        sink: &EventSink,
    ) -> RuntimeResult<ExecutionReport> {
        let started_at = Timestamp::now();
        self.engine.start(id).await?;

        let sampler = StatsSampler::spawn(self.engine.clone(), id.clone(), &request.run_dir);
        let waited = match relay_logs(self.engine.as_ref(), id, sink, LogSource::Run).await {
            Ok(lines) => self
                .engine
                .wait(id)
                .await
                .map(|code| (code, lines))
                .map_err(RuntimeError::from),
            Err(e) => Err(e),
        };
        let ended_at = Timestamp::now();
        // joined on every path so the sampler never outlives the container
        let stats_samples = sampler.finish().await?;
        let (exit_code, log_lines) = waited?;

        let captured = self.engine.captured_output(id).await?;
        let run_dir = &request.run_dir;
        for (name, bytes) in [
            (STDOUT_FILE, captured.stdout.as_slice()),
            (STDERR_FILE, captured.stderr.as_slice()),
            (ENTRYPOINT_FILE, request.settings.entrypoint.as_bytes()),
        ] {
            let path = run_dir.join(name);
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| RuntimeError::io(&path, e))?;
        }

        Ok(ExecutionReport {
            exit_code,
            started_at,
            ended_at,
            stats_samples,
            log_lines,
        })
    }
}

/// Relay a container's log lines to `sink` until the container exits
pub(crate) async fn relay_logs(
    engine: &dyn ContainerEngine,
    id: &ContainerId,
    sink: &EventSink,
    source: LogSource,
) -> RuntimeResult<usize> {
    let mut lines = engine.follow_logs(id).await?;
    let mut count = 0;
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                sink.log(source, line).await;
                count += 1;
            }
            Err(e) => {
                tracing::warn!(container = %id, error = %e, "log stream interrupted");
                break;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{STATS_FILE, STATS_TMP_FILE};
    use crate::testing::{ScriptedContainer, ScriptedEngine};
    use trove_core::{EventKind, RunId};

    fn request(run_dir: &std::path::Path, settings: ImageSettings) -> ExecutionRequest {
        ExecutionRequest {
            image: ImageTag::new("local/trove-abc"),
            run_dir: run_dir.to_path_buf(),
            host_run_dir: run_dir.to_path_buf(),
            settings,
            name: Some("trove-abc".to_string()),
        }
    }

    #[test]
    fn test_spec_is_isolated_unless_opted_in() {
        let dir = PathBuf::from("/srv/scratch/r/workspace");
        let spec = ExecutionDriver::container_spec(&request(&dir, ImageSettings::default()));
        assert!(!spec.network_enabled);
        assert_eq!(spec.command, vec!["sh", "run.sh"]);
        assert_eq!(spec.user.as_deref(), Some("jovyan"));
        assert_eq!(spec.working_dir.as_deref(), Some("/home/jovyan/work"));
        assert_eq!(
            spec.mounts,
            vec![VolumeMount::read_write(&dir, "/home/jovyan/work")]
        );

        let open = ImageSettings::default().with_network(true);
        assert!(ExecutionDriver::container_spec(&request(&dir, open)).network_enabled);
    }

    #[tokio::test]
    async fn test_success_writes_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ScriptedEngine::new().with_run(
                ScriptedContainer::exiting(0)
                    .with_logs(["hello"])
                    .with_stats(["\x1b[2J\x1b[H1.00%,1MiB / 1GiB,0B / 0B,0B / 0B,2"])
                    .with_stdout("hello\n")
                    .writes("out.txt", "hello"),
            ),
        );
        let driver = ExecutionDriver::new(engine.clone());
        let (sink, mut rx) = EventSink::channel(RunId::new(), 8);

        let report = driver
            .execute(&request(dir.path(), ImageSettings::default()), &sink)
            .await
            .unwrap();
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.log_lines, 1);
        assert!(report.started_at <= report.ended_at);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::Log { source: LogSource::Run, .. }));

        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(STDOUT_FILE)).unwrap(),
            "hello\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join(ENTRYPOINT_FILE)).unwrap(),
            "run.sh"
        );
        let stats = std::fs::read_to_string(dir.path().join(STATS_FILE)).unwrap();
        assert!(!stats.contains('\x1b'));
        assert!(!dir.path().join(STATS_TMP_FILE).exists());
        assert_eq!(engine.removed().len(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_and_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new().with_run(ScriptedContainer::exiting(3)));
        let driver = ExecutionDriver::new(engine.clone());
        let (sink, _rx) = EventSink::channel(RunId::new(), 8);

        let err = driver
            .execute(&request(dir.path(), ImageSettings::default()), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ExecutionFailed { exit_code: 3 }));
        assert_eq!(engine.removed().len(), 1);
    }
}
