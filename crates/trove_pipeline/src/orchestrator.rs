//! Run orchestration.
//!
//! Each submission runs on its own task and walks the state sequence once.
//! Progress is streamed on the run's channel; a failure names the state
//! being entered, removes whatever outputs were already written, and ends
//! the stream. Scratch directories are removed on every path.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use trove_bag::{ArrangementRecorder, Bag, BagInfo, Packager};
use trove_certify::{AttestError, Attestor};
use trove_core::{
    EventKind, EventSink, ImageSettings, ProgressEvent, RunId, RunState, ServiceConfig, Timestamp,
};
use trove_declaration::{CompositionFingerprinter, DeclarationBuilder, InferSniffer, Performance};
use trove_runtime::{
    ContainerEngine, ExecutionDriver, ExecutionRequest, ImageBuilder, OwnershipNormalizer,
    RunDirs, RuntimeError, Submission, SubmissionStager,
};

use crate::run::{Run, RunOutputs};
use crate::state::RunStateMachine;

/// Why a run failed
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Submission could not be placed in the workspace or bagged
    #[error("submission rejected: {0}")]
    Stage(RuntimeError),
    /// Image builder failed
    #[error("image build failed: {0}")]
    BuildFailed(RuntimeError),
    /// Entrypoint failed or could not be run
    #[error("execution failed: {0}")]
    ExecutionFailed(RuntimeError),
    /// Signing or timestamping failed
    #[error("attestation failed: {0}")]
    AttestationFailed(AttestError),
    /// Anything else
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl RunError {
    fn internal(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Internal(error.into())
    }
}

/// A failed run
#[derive(Debug, thiserror::Error)]
#[error("run failed at {stage}: {error}")]
pub struct RunFailure {
    /// State that could not be entered
    pub stage: RunState,
    /// Cause
    #[source]
    pub error: RunError,
}

/// A completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Run id
    pub run_id: RunId,
    /// Where the declaration, signature, token and archive were written
    pub outputs: RunOutputs,
    /// Entrypoint start
    pub started_at: Timestamp,
    /// Entrypoint end
    pub ended_at: Timestamp,
    /// Distinct artifacts in the composition
    pub artifacts: usize,
}

/// What to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Submitted code and data
    pub submission: Submission,
    /// Image and execution settings
    pub settings: ImageSettings,
}

/// Handle to a submitted run
#[derive(Debug)]
pub struct RunHandle {
    /// Run id
    pub run_id: RunId,
    /// Progress stream; ends after `Completed` or `Failed`
    pub events: mpsc::Receiver<ProgressEvent>,
    entering: watch::Receiver<RunState>,
    task: JoinHandle<Result<RunSummary, RunFailure>>,
}

impl RunHandle {
    /// Stop listening and wait for the run to finish
    ///
    /// # Errors
    ///
    /// Returns the run's failure, or an internal failure at the state being
    /// entered if its task panicked or was aborted
    pub async fn finish(self) -> Result<RunSummary, RunFailure> {
        let Self {
            events,
            entering,
            task,
            ..
        } = self;
        drop(events);
        task.await.unwrap_or_else(|e| {
            Err(RunFailure {
                stage: *entering.borrow(),
                error: RunError::internal(e),
            })
        })
    }

    /// Drain every event, then wait for the run
    pub async fn collect(mut self) -> (Vec<ProgressEvent>, Result<RunSummary, RunFailure>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.finish().await)
    }
}

/// Drives submissions through stage, build, execute, bag, attest and package
pub struct Orchestrator {
    config: Arc<ServiceConfig>,
    stager: SubmissionStager,
    builder: ImageBuilder,
    driver: ExecutionDriver,
    attestor: Attestor,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("storage_dir", &self.config.storage_dir)
            .field("scratch_dir", &self.config.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator over `engine`, writing to the configured storage
    #[must_use]
    pub fn new(
        config: Arc<ServiceConfig>,
        engine: Arc<dyn ContainerEngine>,
        normalizer: Arc<dyn OwnershipNormalizer>,
        attestor: Attestor,
    ) -> Self {
        Self {
            stager: SubmissionStager::new(normalizer, config.ownership),
            builder: ImageBuilder::new(engine.clone(), &config),
            driver: ExecutionDriver::new(engine),
            attestor,
            config,
        }
    }

    /// Start a run on its own task
    pub fn submit(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        let run = Run::new(request.submission, request.settings);
        let run_id = run.id;
        let (sink, events) = EventSink::channel(run_id, self.config.event_buffer);
        let (entering_tx, entering) = watch::channel(RunState::Staged);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.drive(run, sink, entering_tx).await });
        RunHandle {
            run_id,
            events,
            entering,
            task,
        }
    }

    #[tracing::instrument(skip_all, fields(run_id = %run.id))]
    async fn drive(
        &self,
        mut run: Run,
        sink: EventSink,
        entering: watch::Sender<RunState>,
    ) -> Result<RunSummary, RunFailure> {
        let dirs = RunDirs::for_run(&self.config.scratch_dir, &run.id);
        let outputs = RunOutputs::new(&self.config.storage_dir, &run.basename());
        tracing::info!(image = %run.image, "run submitted");

        let mut machine = RunStateMachine::new();
        let result = self
            .stages(&mut run, &mut machine, &entering, &dirs, &outputs, &sink)
            .await;
        run.state = machine;
        tracing::debug!(phase = %run.state.phase(), "pipeline finished");

        if let Err(e) = dirs.remove() {
            tracing::warn!(root = %dirs.root.display(), error = %e, "failed to remove scratch");
        }
        match &result {
            Ok(summary) => {
                tracing::info!(archive = %summary.outputs.archive.display(), "run completed");
                sink.emit(EventKind::Completed {
                    archive: outputs.archive_name(),
                })
                .await;
            }
            Err(failure) => {
                let removed = outputs.remove();
                tracing::warn!(stage = %failure.stage, error = %failure.error, removed, "run failed");
                sink.emit(EventKind::Failed {
                    stage: failure.stage,
                    cause: failure.error.to_string(),
                })
                .await;
            }
        }
        result
    }

    async fn stages(
        &self,
        run: &mut Run,
        machine: &mut RunStateMachine,
        entering: &watch::Sender<RunState>,
        dirs: &RunDirs,
        outputs: &RunOutputs,
        sink: &EventSink,
    ) -> Result<RunSummary, RunFailure> {
        let recorder = ArrangementRecorder::new(self.bag_info());

        enter(machine, entering, sink, RunState::Staged, async {
            run.settings.validate().map_err(|e| {
                RunError::Stage(RuntimeError::Stage {
                    reason: e.to_string(),
                })
            })?;
            let submission = match &run.submission {
                Submission::Archive(source) => {
                    store_payload(source, &outputs.payload).await?;
                    Submission::Archive(outputs.payload.clone())
                }
                direct @ Submission::Directory(_) => direct.clone(),
            };
            let staged = self
                .stager
                .stage(&submission, dirs)
                .await
                .map_err(RunError::Stage)?;
            sink.note(format!("{staged} files staged")).await;
            Ok(())
        })
        .await?;

        let initial = enter(machine, entering, sink, RunState::InitialBagged, {
            let recorder = recorder.clone();
            let (workspace, destination) = (dirs.workspace.clone(), dirs.initial.clone());
            blocking(move || {
                recorder
                    .record_initial(&workspace, &destination)
                    .map_err(|e| RunError::Stage(RuntimeError::Bag(e)))
            })
        })
        .await?;

        enter(machine, entering, sink, RunState::ImageBuilt, async {
            self.builder
                .build(&dirs.workspace, &run.image, &run.settings, sink)
                .await
                .map_err(RunError::BuildFailed)
        })
        .await?;

        let report = enter(machine, entering, sink, RunState::Executed, async {
            let request = ExecutionRequest {
                image: run.image.clone(),
                run_dir: dirs.workspace.clone(),
                host_run_dir: self.config.host_path(&dirs.workspace),
                settings: run.settings.clone(),
                name: Some(format!("{}-run", run.basename())),
            };
            self.driver
                .execute(&request, sink)
                .await
                .map_err(RunError::ExecutionFailed)
        })
        .await?;
        run.started_at = Some(report.started_at);
        run.ended_at = Some(report.ended_at);

        let result = enter(machine, entering, sink, RunState::ResultBagged, {
            let workspace = dirs.workspace.clone();
            blocking(move || recorder.record_final(&workspace).map_err(RunError::internal))
        })
        .await?;

        let performance = Performance {
            started_at: report.started_at,
            ended_at: report.ended_at,
            network_enabled: run.settings.network_enabled,
        };
        let (signed, artifacts) = enter(machine, entering, sink, RunState::Signed, async {
            let composition = blocking(move || {
                CompositionFingerprinter::new(InferSniffer)
                    .fingerprint(&[&initial, &result])
                    .map_err(RunError::internal)
            })
            .await?;
            let public_key = self.attestor.public_key().to_armored();
            let declaration = DeclarationBuilder::new(self.config.trs.clone(), public_key)
                .build(&run.basename(), &composition, &performance);
            let signed = self
                .attestor
                .sign(&declaration)
                .map_err(RunError::AttestationFailed)?;
            write_output(&outputs.declaration, signed.declaration_bytes()).await?;
            write_output(&outputs.signature, signed.signature_text().as_bytes()).await?;
            Ok((signed, composition.artifacts().len()))
        })
        .await?;

        enter(machine, entering, sink, RunState::Timestamped, async {
            let token = self
                .attestor
                .timestamp(&signed)
                .await
                .map_err(RunError::AttestationFailed)?;
            write_output(&outputs.token, token.as_bytes()).await
        })
        .await?;

        enter(machine, entering, sink, RunState::Packaged, {
            let (workspace, archive) = (dirs.workspace.clone(), outputs.archive.clone());
            blocking(move || {
                let bag = Bag::open(&workspace).map_err(RunError::internal)?;
                Packager::new()
                    .package(&bag, &archive)
                    .map_err(RunError::internal)
            })
        })
        .await?;

        enter(machine, entering, sink, RunState::Done, async { Ok(()) }).await?;

        Ok(RunSummary {
            run_id: run.id,
            outputs: outputs.clone(),
            started_at: report.started_at,
            ended_at: report.ended_at,
            artifacts,
        })
    }

    fn bag_info(&self) -> BagInfo {
        let mut info = BagInfo::new();
        for (key, value) in &self.config.trs.claims {
            info.push(key.clone(), value.clone());
        }
        info.push("id", self.config.trs.id.clone());
        info.push("public_key_fingerprint", self.attestor.public_key().fingerprint());
        info
    }
}

async fn enter<T>(
    machine: &mut RunStateMachine,
    entering: &watch::Sender<RunState>,
    sink: &EventSink,
    state: RunState,
    work: impl Future<Output = Result<T, RunError>>,
) -> Result<T, RunFailure> {
    entering.send_replace(state);
    sink.emit(EventKind::StageStarted { state }).await;
    match work.await {
        Ok(value) => {
            machine.advance(state).map_err(|e| RunFailure {
                stage: state,
                error: RunError::internal(e),
            })?;
            tracing::info!(%state, "state entered");
            sink.emit(EventKind::StageCompleted { state }).await;
            Ok(value)
        }
        Err(error) => {
            let stage = machine.fail(error.to_string()).unwrap_or(state);
            Err(RunFailure { stage, error })
        }
    }
}

async fn blocking<T, F>(work: F) -> Result<T, RunError>
where
    F: FnOnce() -> Result<T, RunError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(RunError::internal)?
}

async fn store_payload(source: &Path, stored: &Path) -> Result<(), RunError> {
    if source == stored {
        return Ok(());
    }
    let io = |path: &Path, source: std::io::Error| {
        RunError::Stage(RuntimeError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    if let Some(parent) = stored.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io(parent, e))?;
    }
    tokio::fs::copy(source, stored)
        .await
        .map_err(|e| io(source, e))?;
    tracing::debug!(payload = %stored.display(), "payload stored");
    Ok(())
}

async fn write_output(path: &Path, contents: &[u8]) -> Result<(), RunError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RunError::internal(format!("create {}: {e}", parent.display())))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| RunError::internal(format!("write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_certify::testing::{InProcessAuthority, InProcessVerifier};
    use trove_certify::{Evidence, PublicKey, Signer, Verifier};
    use trove_declaration::Declaration;
    use trove_runtime::testing::{NoopNormalizer, ScriptedContainer, ScriptedEngine};

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Arc<ServiceConfig>,
        source: std::path::PathBuf,
        engine: Arc<ScriptedEngine>,
        authority: Arc<InProcessAuthority>,
        orchestrator: Arc<Orchestrator>,
        key: PublicKey,
    }

    fn fixture(engine: ScriptedEngine, authority: InProcessAuthority) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("submission");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("run.sh"), "echo hello > out.txt\n").unwrap();
        std::fs::write(source.join("input.csv"), "a,b\n1,2\n").unwrap();

        let config = Arc::new(ServiceConfig {
            storage_dir: dir.path().join("storage"),
            scratch_dir: dir.path().join("scratch"),
            ownership: None,
            ..ServiceConfig::default()
        });
        let engine = Arc::new(engine);
        let authority = Arc::new(authority);
        let signer = Arc::new(Signer::generate());
        let key = signer.public_key();
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            engine.clone(),
            Arc::new(NoopNormalizer),
            Attestor::new(signer, authority.clone()),
        ));
        Fixture {
            _dir: dir,
            config,
            source,
            engine,
            authority,
            orchestrator,
            key,
        }
    }

    fn request(source: &Path) -> RunRequest {
        RunRequest {
            submission: Submission::Directory(source.to_path_buf()),
            settings: ImageSettings::default(),
        }
    }

    fn scratch_is_empty(config: &ServiceConfig) -> bool {
        std::fs::read_dir(&config.scratch_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    fn storage_is_empty(config: &ServiceConfig) -> bool {
        std::fs::read_dir(&config.storage_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn test_successful_run_produces_verifiable_outputs() {
        let engine = ScriptedEngine::new().with_run(
            ScriptedContainer::exiting(0)
                .with_logs(["running"])
                .writes("out.txt", "hello\n"),
        );
        let fx = fixture(engine, InProcessAuthority::new());

        let handle = fx.orchestrator.submit(request(&fx.source));
        let run_id = handle.run_id;
        let (events, result) = handle.collect().await;
        let summary = result.unwrap();

        assert_eq!(summary.run_id, run_id);
        let outputs = &summary.outputs;
        for path in outputs.paths() {
            assert!(path.is_file(), "missing {}", path.display());
        }
        assert_eq!(fx.authority.issued(), 1);
        assert!(scratch_is_empty(&fx.config));

        let bytes = std::fs::read(&outputs.declaration).unwrap();
        let declaration = Declaration::from_slice(&bytes).unwrap();
        let initial = declaration.locations(0);
        let final_ = declaration.locations(1);
        assert!(initial.contains(&"run.sh"));
        assert!(!initial.contains(&"out.txt"));
        assert!(final_.contains(&"out.txt"));
        assert!(final_.contains(&"input.csv"));

        let evidence = Evidence::load(&outputs.declaration, &outputs.signature, &outputs.token)
            .unwrap();
        let report = Verifier::new(Arc::new(InProcessVerifier))
            .with_pinned_key(fx.key)
            .verify(&evidence, Some(&outputs.archive))
            .await;
        assert!(report.passed(), "{}", report.summary());

        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(EventKind::Completed { archive }) if *archive == outputs.archive_name()
        ));
        assert!(events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::Log { line, .. } if line == "running")));
    }

    fn zip_payload(dir: &Path) -> std::path::PathBuf {
        use std::io::Write;
        let path = dir.join("upload.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("run.sh", options).unwrap();
        zip.write_all(b"echo hello > out.txt\n").unwrap();
        zip.start_file(".git/HEAD", options).unwrap();
        zip.write_all(b"ref: refs/heads/main\n").unwrap();
        zip.finish().unwrap();
        path
    }

    #[tokio::test]
    async fn test_archive_submission_is_stored_then_staged() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::new());
        let upload = zip_payload(fx.source.parent().unwrap());
        let summary = fx
            .orchestrator
            .submit(RunRequest {
                submission: Submission::Archive(upload.clone()),
                settings: ImageSettings::default(),
            })
            .finish()
            .await
            .unwrap();

        let stored = &summary.outputs.payload;
        assert_eq!(std::fs::read(stored).unwrap(), std::fs::read(&upload).unwrap());
        let bytes = std::fs::read(&summary.outputs.declaration).unwrap();
        let declaration = Declaration::from_slice(&bytes).unwrap();
        assert!(declaration.locations(0).contains(&"run.sh"));
        assert!(!declaration.locations(0).iter().any(|l| l.starts_with(".git")));
    }

    #[tokio::test]
    async fn test_events_follow_state_order() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::new());
        let (events, result) = fx.orchestrator.submit(request(&fx.source)).collect().await;
        result.unwrap();

        let completed: Vec<RunState> = events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::StageCompleted { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(completed, RunState::ALL.to_vec());

        let started: Vec<RunState> = events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::StageStarted { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(started, RunState::ALL.to_vec());
        assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_entrypoint_leaves_nothing_behind() {
        let engine = ScriptedEngine::new().with_run(
            ScriptedContainer::exiting(3).writes("out.txt", "partial\n"),
        );
        let fx = fixture(engine, InProcessAuthority::new());
        let (events, result) = fx.orchestrator.submit(request(&fx.source)).collect().await;

        let failure = result.unwrap_err();
        assert_eq!(failure.stage, RunState::Executed);
        assert!(matches!(
            failure.error,
            RunError::ExecutionFailed(RuntimeError::ExecutionFailed { exit_code: 3 })
        ));
        assert!(storage_is_empty(&fx.config));
        assert!(scratch_is_empty(&fx.config));
        assert_eq!(fx.authority.issued(), 0);
        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(EventKind::Failed { stage: RunState::Executed, .. })
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e.kind, EventKind::StageCompleted { state: RunState::Executed })));
    }

    #[tokio::test]
    async fn test_failed_build_stops_before_execution() {
        let engine = ScriptedEngine::new().with_build(ScriptedContainer::exiting(1));
        let fx = fixture(engine, InProcessAuthority::new());
        let failure = fx.orchestrator.submit(request(&fx.source)).finish().await.unwrap_err();

        assert_eq!(failure.stage, RunState::ImageBuilt);
        assert!(matches!(failure.error, RunError::BuildFailed(_)));
        // only the builder container was created
        assert_eq!(fx.engine.created().len(), 1);
        assert!(scratch_is_empty(&fx.config));
    }

    #[tokio::test]
    async fn test_refused_timestamp_discards_signed_outputs() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::rejecting());
        let failure = fx.orchestrator.submit(request(&fx.source)).finish().await.unwrap_err();

        assert_eq!(failure.stage, RunState::Timestamped);
        assert!(matches!(failure.error, RunError::AttestationFailed(_)));
        assert!(storage_is_empty(&fx.config));
        assert!(scratch_is_empty(&fx.config));
    }

    #[tokio::test]
    async fn test_missing_submission_fails_staging() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::new());
        let missing = fx.source.join("nope");
        let failure = fx.orchestrator.submit(request(&missing)).finish().await.unwrap_err();

        assert_eq!(failure.stage, RunState::Staged);
        assert!(matches!(failure.error, RunError::Stage(_)));
        assert!(fx.engine.created().is_empty());
    }

    #[tokio::test]
    async fn test_bag_metadata_carries_claims_and_key() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::new());
        let summary = fx.orchestrator.submit(request(&fx.source)).finish().await.unwrap();

        let info = trove_bag::inspect_archive(&summary.outputs.archive).unwrap();
        assert_eq!(info.get("id"), Some(fx.config.trs.id.as_str()));
        assert_eq!(info.get("public_key_fingerprint"), Some(fx.key.fingerprint().as_str()));
        assert_eq!(info.get("Platform"), Some("trove"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_share_scratch() {
        let fx = fixture(ScriptedEngine::new(), InProcessAuthority::new());
        let a = fx.orchestrator.submit(request(&fx.source));
        let b = fx.orchestrator.submit(request(&fx.source));
        assert_ne!(a.run_id, b.run_id);
        let (a, b) = tokio::join!(a.finish(), b.finish());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.outputs.archive, b.outputs.archive);
        assert_eq!(fx.authority.issued(), 2);
    }

    async fn crashing_run(entering: watch::Sender<RunState>) -> Result<RunSummary, RunFailure> {
        entering.send_replace(RunState::ImageBuilt);
        panic!("builder client crashed");
    }

    #[tokio::test]
    async fn test_crashed_task_names_the_state_being_entered() {
        let (_sink, events) = EventSink::channel(RunId::new(), 1);
        let (entering_tx, entering) = watch::channel(RunState::Staged);
        let handle = RunHandle {
            run_id: RunId::new(),
            events,
            entering,
            task: tokio::spawn(crashing_run(entering_tx)),
        };
        let failure = handle.finish().await.unwrap_err();
        assert_eq!(failure.stage, RunState::ImageBuilt);
        assert!(matches!(failure.error, RunError::Internal(_)));
    }
}
