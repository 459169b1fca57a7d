//! `ContainerEngine` over the docker command-line client.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::process::{Child, Command};
use tokio_util::codec::{FramedRead, LinesCodec};
use trove_core::EngineConfig;

use crate::engine::{
    CapturedOutput, ContainerEngine, ContainerId, ContainerSpec, EngineError, EngineResult,
    LineStream,
};

/// Format of one resource usage sample
pub const STATS_FORMAT: &str = "{{.CPUPerc}},{{.MemUsage}},{{.NetIO}},{{.BlockIO}},{{.PIDs}}";

/// Docker CLI client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Client invoking `binary`
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Client from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.binary)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn render(&self, args: &[String]) -> String {
        let mut rendered = self.binary.display().to_string();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    async fn output(&self, args: &[String]) -> EngineResult<std::process::Output> {
        tracing::debug!(command = %self.render(args), "engine command");
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: self.render(args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn stdout_text(&self, args: &[String]) -> EngineResult<String> {
        let output = self.output(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn spawn_lines(&self, args: &[String]) -> EngineResult<LineStream> {
        tracing::debug!(command = %self.render(args), "engine stream");
        let child = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;
        child_lines(child)
    }
}

/// Arguments of `docker create` for `spec`
#[must_use]
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if let Some(name) = &spec.name {
        args.extend(["--name".to_string(), name.clone()]);
    }
    if let Some(user) = &spec.user {
        args.extend(["--user".to_string(), user.clone()]);
    }
    if let Some(dir) = &spec.working_dir {
        args.extend(["--workdir".to_string(), dir.clone()]);
    }
    if spec.privileged {
        args.push("--privileged".to_string());
    }
    if !spec.network_enabled {
        args.extend(["--network".to_string(), "none".to_string()]);
    }
    for mount in &spec.mounts {
        args.extend(["--volume".to_string(), mount.to_arg()]);
    }
    for (key, value) in &spec.env {
        args.extend(["--env".to_string(), format!("{key}={value}")]);
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Merge a child's stdout and stderr into one line stream that owns the
/// child and reaps it once both pipes close
fn child_lines(mut child: Child) -> EngineResult<LineStream> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Protocol("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::Protocol("child stderr not captured".to_string()))?;

    let lines = stream::select(
        FramedRead::new(stdout, LinesCodec::new()),
        FramedRead::new(stderr, LinesCodec::new()),
    )
    .map(|line| line.map_err(|e| EngineError::Stream(e.to_string())));
    let reaper = stream::once(async move {
        if let Err(e) = child.wait().await {
            tracing::warn!(error = %e, "failed to reap engine client");
        }
    })
    .filter_map(|()| async { None::<EngineResult<String>> });

    Ok(lines.chain(reaper).boxed())
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn create(&self, spec: &ContainerSpec) -> EngineResult<ContainerId> {
        let id = self.stdout_text(&create_args(spec)).await?;
        if id.is_empty() {
            return Err(EngineError::Protocol("create returned no id".to_string()));
        }
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> EngineResult<()> {
        self.output(&["start".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }

    async fn follow_logs(&self, id: &ContainerId) -> EngineResult<LineStream> {
        self.spawn_lines(&["logs".to_string(), "--follow".to_string(), id.to_string()])
    }

    async fn wait(&self, id: &ContainerId) -> EngineResult<i64> {
        let text = self.stdout_text(&["wait".to_string(), id.to_string()]).await?;
        text.lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| EngineError::Protocol(format!("unparseable exit code {text:?}")))
    }

    async fn stats(&self, id: &ContainerId) -> EngineResult<LineStream> {
        self.spawn_lines(&[
            "stats".to_string(),
            "--format".to_string(),
            STATS_FORMAT.to_string(),
            id.to_string(),
        ])
    }

    async fn captured_output(&self, id: &ContainerId) -> EngineResult<CapturedOutput> {
        let output = self.output(&["logs".to_string(), id.to_string()]).await?;
        Ok(CapturedOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn remove(&self, id: &ContainerId) -> EngineResult<()> {
        self.output(&["rm".to_string(), "--force".to_string(), id.to_string()])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::VolumeMount;

    #[test]
    fn test_create_args_isolated_by_default() {
        let spec = ContainerSpec::new("local/trove-abc", vec!["sh".into(), "run.sh".into()])
            .with_user("jovyan")
            .with_working_dir("/home/jovyan/work")
            .with_mount(VolumeMount::read_write("/tmp/run", "/home/jovyan/work"));
        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--user",
                "jovyan",
                "--workdir",
                "/home/jovyan/work",
                "--network",
                "none",
                "--volume",
                "/tmp/run:/home/jovyan/work",
                "local/trove-abc",
                "sh",
                "run.sh",
            ]
        );
    }

    #[test]
    fn test_create_args_with_network_and_env() {
        let spec = ContainerSpec::new("builder", vec![])
            .with_name("b1")
            .with_network(true)
            .with_env("DOCKER_HOST", "unix:///var/run/docker.sock");
        let args = create_args(&spec);
        assert!(!args.contains(&"none".to_string()));
        assert!(!args.contains(&"--privileged".to_string()));
        assert_eq!(&args[1..3], &["--name", "b1"]);
        assert!(args.contains(&"DOCKER_HOST=unix:///var/run/docker.sock".to_string()));
    }

    #[test]
    fn test_create_args_privileged() {
        let spec = ContainerSpec::new("builder", vec![])
            .with_privileged()
            .with_network(true);
        assert_eq!(create_args(&spec), vec!["create", "--privileged", "builder"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cli = DockerCli::new("/nonexistent/trove-docker");
        let err = cli.start(&ContainerId::new("x")).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_child_lines_merges_and_ends() {
        let child = Command::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let mut lines: Vec<String> = child_lines(child)
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }
}
