//! Image building through an external repository-to-image builder.
//!
//! The builder runs in a privileged helper container that reaches the engine
//! through its control socket and sees the scratch root read-only at the same
//! path the service uses.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use trove_core::{BuilderConfig, EventSink, ImageSettings, ImageTag, LogSource, ServiceConfig};

use crate::driver::relay_logs;
use crate::engine::{ContainerEngine, ContainerSpec, VolumeMount};
use crate::error::{RuntimeError, RuntimeResult};

const ENGINE_SOCKET_IN_BUILDER: &str = "/var/run/docker.sock";

/// Builds one image per run
pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
    config: BuilderConfig,
    scratch_dir: PathBuf,
    host_scratch_dir: PathBuf,
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("config", &self.config)
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl ImageBuilder {
    /// Builder for the service's scratch layout
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &ServiceConfig) -> Self {
        Self {
            engine,
            config: config.builder.clone(),
            scratch_dir: config.scratch_dir.clone(),
            host_scratch_dir: config.builder_scratch_dir().to_path_buf(),
        }
    }

    /// Builder command line
    #[must_use]
    pub fn command(&self, source_dir: &Path, tag: &ImageTag, settings: &ImageSettings) -> Vec<String> {
        let mut cmd = vec![
            "jupyter-repo2docker".to_string(),
            "--engine".to_string(),
            "dockercli".to_string(),
            format!("--config={}", self.config.config_path),
            format!("--target-repo-dir={}", settings.target_repo_dir),
            format!("--user-id={}", self.config.user_id),
            format!("--user-name={}", settings.container_user),
            "--no-clean".to_string(),
            "--no-run".to_string(),
            "--debug".to_string(),
        ];
        cmd.extend(settings.extra_args.iter().cloned());
        cmd.extend([
            "--image-name".to_string(),
            tag.as_str().to_string(),
            source_dir.display().to_string(),
        ]);
        cmd
    }

    /// Helper container running [`Self::command`]
    #[must_use]
    pub fn container_spec(
        &self,
        source_dir: &Path,
        tag: &ImageTag,
        settings: &ImageSettings,
    ) -> ContainerSpec {
        let mut spec = ContainerSpec::new(
            self.config.image.clone(),
            self.command(source_dir, tag, settings),
        )
        .with_network(true)
        .with_privileged()
        .with_working_dir(settings.target_repo_dir.clone())
        .with_mount(VolumeMount::read_write(
            &self.config.engine_socket,
            ENGINE_SOCKET_IN_BUILDER,
        ))
        .with_mount(VolumeMount::read_only(
            &self.host_scratch_dir,
            self.scratch_dir.display().to_string(),
        ))
        .with_env("DOCKER_HOST", format!("unix://{ENGINE_SOCKET_IN_BUILDER}"));
        if let Some(name) = tag.as_str().rsplit('/').next() {
            spec = spec.with_name(format!("{name}-build"));
        }
        spec
    }

    /// Build `source_dir` into `tag`, relaying builder output to `sink`.
    /// The helper container is removed on every path.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::BuildFailed` if the builder exits non-zero, or
    /// an engine error if the helper cannot be run
    #[tracing::instrument(skip(self, settings, sink), fields(tag = %tag))]
    pub async fn build(
        &self,
        source_dir: &Path,
        tag: &ImageTag,
        settings: &ImageSettings,
        sink: &EventSink,
    ) -> RuntimeResult<()> {
        let spec = self.container_spec(source_dir, tag, settings);
        let id = self.engine.create(&spec).await?;
        tracing::debug!(container = %id, "builder container created");

        let outcome = async {
            self.engine.start(&id).await?;
            relay_logs(self.engine.as_ref(), &id, sink, LogSource::Build).await?;
            Ok::<_, RuntimeError>(self.engine.wait(&id).await?)
        }
        .await;

        if let Err(e) = self.engine.remove(&id).await {
            tracing::warn!(container = %id, error = %e, "failed to remove builder container");
        }

        match outcome? {
            0 => {
                tracing::info!("image built");
                Ok(())
            }
            exit_code => Err(RuntimeError::BuildFailed { exit_code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedContainer, ScriptedEngine};
    use trove_core::{EventKind, RunId};

    fn service_config() -> ServiceConfig {
        ServiceConfig {
            scratch_dir: PathBuf::from("/srv/scratch"),
            host_scratch_dir: Some(PathBuf::from("/host/tmp")),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_command_line() {
        let builder = ImageBuilder::new(Arc::new(ScriptedEngine::new()), &service_config());
        let tag = ImageTag::new("local/trove-abc");
        let settings = ImageSettings {
            extra_args: vec!["--no-cache".to_string()],
            ..ImageSettings::default()
        };
        let cmd = builder.command(Path::new("/srv/scratch/r/workspace"), &tag, &settings);
        assert_eq!(cmd[0], "jupyter-repo2docker");
        assert!(cmd.contains(&"--target-repo-dir=/home/jovyan/work".to_string()));
        assert!(cmd.contains(&"--user-name=jovyan".to_string()));
        assert!(cmd.contains(&"--user-id=1000".to_string()));
        assert!(cmd.contains(&"--no-cache".to_string()));
        assert_eq!(
            &cmd[cmd.len() - 3..],
            &["--image-name", "local/trove-abc", "/srv/scratch/r/workspace"]
        );
    }

    #[test]
    fn test_helper_sees_scratch_read_only() {
        let builder = ImageBuilder::new(Arc::new(ScriptedEngine::new()), &service_config());
        let spec = builder.container_spec(
            Path::new("/srv/scratch/r/workspace"),
            &ImageTag::new("local/trove-abc"),
            &ImageSettings::default(),
        );
        assert_eq!(spec.name.as_deref(), Some("trove-abc-build"));
        assert!(spec.privileged);
        assert_eq!(spec.working_dir.as_deref(), Some("/home/jovyan/work"));
        let args = crate::docker::create_args(&spec);
        assert!(args.contains(&"--privileged".to_string()));
        assert!(args.windows(2).any(|w| w == ["--workdir", "/home/jovyan/work"]));
        assert!(spec.mounts.contains(&VolumeMount::read_only("/host/tmp", "/srv/scratch")));
        assert!(spec.mounts.contains(&VolumeMount::read_write(
            "/var/run/docker.sock",
            "/var/run/docker.sock"
        )));
        assert!(spec
            .env
            .contains(&("DOCKER_HOST".to_string(), "unix:///var/run/docker.sock".to_string())));
    }

    #[tokio::test]
    async fn test_build_relays_logs_and_removes_helper() {
        let engine = Arc::new(
            ScriptedEngine::new().with_build(ScriptedContainer::exiting(0).with_logs(["Step 1/3"])),
        );
        let builder = ImageBuilder::new(engine.clone(), &service_config());
        let (sink, mut rx) = EventSink::channel(RunId::new(), 8);

        builder
            .build(
                Path::new("/srv/scratch/r/workspace"),
                &ImageTag::new("local/trove-abc"),
                &ImageSettings::default(),
                &sink,
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            EventKind::Log {
                source: LogSource::Build,
                line: "Step 1/3".to_string()
            }
        );
        assert_eq!(engine.removed().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_still_removes_helper() {
        let engine = Arc::new(ScriptedEngine::new().with_build(ScriptedContainer::exiting(1)));
        let builder = ImageBuilder::new(engine.clone(), &service_config());
        let (sink, _rx) = EventSink::channel(RunId::new(), 8);

        let err = builder
            .build(
                Path::new("/srv/scratch/r/workspace"),
                &ImageTag::new("local/trove-abc"),
                &ImageSettings::default(),
                &sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BuildFailed { exit_code: 1 }));
        assert_eq!(engine.removed().len(), 1);
    }
}
