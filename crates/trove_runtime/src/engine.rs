//! Container engine seam.
//!
//! Everything the builder and driver need from a container engine, as a
//! trait object. Streams are `'static` and own whatever process backs them;
//! dropping a stream releases it.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Result type for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

/// Line stream from a running container
pub type LineStream = BoxStream<'static, EngineResult<String>>;

/// Engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine client could not be launched
    #[error("failed to launch {program}: {source}")]
    Spawn {
        /// Client binary
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Engine client reported failure
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Engine answered with something unexpected
    #[error("unexpected engine response: {0}")]
    Protocol(String),

    /// Reading a stream failed
    #[error("stream error: {0}")]
    Stream(String),
}

/// Bind mount into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Path on the engine host
    pub host: PathBuf,
    /// Mount point inside the container
    pub container: String,
    /// Mount read-only
    pub read_only: bool,
}

impl VolumeMount {
    /// Read-write mount
    #[must_use]
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// Read-only mount
    #[must_use]
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::read_write(host, container)
        }
    }

    /// `host:container[:ro]`
    #[must_use]
    pub fn to_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// What to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,
    /// Command and arguments
    pub command: Vec<String>,
    /// Container name
    pub name: Option<String>,
    /// User the command runs as
    pub user: Option<String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Attach a network. `false` leaves the container without one.
    pub network_enabled: bool,
    /// Run with extended privileges
    pub privileged: bool,
    /// Bind mounts
    pub mounts: Vec<VolumeMount>,
    /// Environment variables
    pub env: Vec<(String, String)>,
}

impl ContainerSpec {
    /// Spec with no network, mounts or environment
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            name: None,
            user: None,
            working_dir: None,
            network_enabled: false,
            privileged: false,
            mounts: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Set the container name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Attach or detach the network
    #[must_use]
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    /// Run the container privileged
    #[must_use]
    pub fn with_privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Add a bind mount
    #[must_use]
    pub fn with_mount(mut self, mount: VolumeMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Engine-assigned container id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wrap an engine id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Complete output of a finished container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output
    pub stdout: Vec<u8>,
    /// Standard error
    pub stderr: Vec<u8>,
}

/// Container engine operations
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container without starting it
    async fn create(&self, spec: &ContainerSpec) -> EngineResult<ContainerId>;

    /// Start a created container
    async fn start(&self, id: &ContainerId) -> EngineResult<()>;

    /// Interleaved stdout/stderr lines; ends when the container exits
    async fn follow_logs(&self, id: &ContainerId) -> EngineResult<LineStream>;

    /// Block until the container exits, returning its exit code
    async fn wait(&self, id: &ContainerId) -> EngineResult<i64>;

    /// Periodic resource usage lines
    /// (`<cpu%>,<mem usage>,<net io>,<block io>,<pids>`).
    /// The stream does not end on its own when the container exits.
    async fn stats(&self, id: &ContainerId) -> EngineResult<LineStream>;

    /// Full stdout and stderr of a finished container
    async fn captured_output(&self, id: &ContainerId) -> EngineResult<CapturedOutput>;

    /// Remove the container, killing it if still running
    async fn remove(&self, id: &ContainerId) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_args() {
        assert_eq!(
            VolumeMount::read_write("/host/run", "/home/jovyan/work").to_arg(),
            "/host/run:/home/jovyan/work"
        );
        assert_eq!(
            VolumeMount::read_only("/var/run/docker.sock", "/var/run/docker.sock").to_arg(),
            "/var/run/docker.sock:/var/run/docker.sock:ro"
        );
    }

    #[test]
    fn test_spec_defaults_to_no_network() {
        let spec = ContainerSpec::new("img", vec!["sh".into(), "run.sh".into()]);
        assert!(!spec.network_enabled);
        assert!(spec.with_network(true).network_enabled);
    }
}
