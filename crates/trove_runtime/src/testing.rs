//! Scripted container engine for tests.
//!
//! Builder containers (command starting with `jupyter-repo2docker`) and run
//! containers each follow their own script. Run containers write their
//! scripted files into the first read-write mount when started.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::{StreamExt, stream};

use crate::engine::{
    CapturedOutput, ContainerEngine, ContainerId, ContainerSpec, EngineError, EngineResult,
    LineStream,
};

/// Behavior of one scripted container
#[derive(Debug, Clone, Default)]
pub struct ScriptedContainer {
    exit_code: i64,
    logs: Vec<String>,
    stats: Vec<String>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    writes: Vec<(String, Vec<u8>)>,
}

impl ScriptedContainer {
    /// Container exiting with `exit_code`
    #[must_use]
    pub fn exiting(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Log lines emitted while running
    #[must_use]
    pub fn with_logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Stats samples emitted before the stream goes quiet
    #[must_use]
    pub fn with_stats<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stats = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Captured standard output
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Captured standard error
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// File written relative to the working mount on start
    #[must_use]
    pub fn writes(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Build,
    Run,
}

#[derive(Debug, Default)]
struct EngineState {
    next_id: u64,
    containers: HashMap<ContainerId, (Role, ContainerSpec)>,
    created: Vec<ContainerSpec>,
    removed: Vec<ContainerId>,
}

/// In-memory `ContainerEngine`
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    build: ScriptedContainer,
    run: ScriptedContainer,
    state: Mutex<EngineState>,
}

impl ScriptedEngine {
    /// Engine whose containers all exit 0 silently
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for builder containers
    #[must_use]
    pub fn with_build(mut self, script: ScriptedContainer) -> Self {
        self.build = script;
        self
    }

    /// Script for run containers
    #[must_use]
    pub fn with_run(mut self, script: ScriptedContainer) -> Self {
        self.run = script;
        self
    }

    /// Every spec passed to `create`, in order
    #[must_use]
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state().created.clone()
    }

    /// Every container removed, in order
    #[must_use]
    pub fn removed(&self) -> Vec<ContainerId> {
        self.state().removed.clone()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lookup(&self, id: &ContainerId) -> EngineResult<(Role, ContainerSpec)> {
        self.state()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Protocol(format!("no such container {id}")))
    }

    fn script(&self, role: Role) -> &ScriptedContainer {
        match role {
            Role::Build => &self.build,
            Role::Run => &self.run,
        }
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn create(&self, spec: &ContainerSpec) -> EngineResult<ContainerId> {
        let role = match spec.command.first().map(String::as_str) {
            Some("jupyter-repo2docker") => Role::Build,
            _ => Role::Run,
        };
        let mut state = self.state();
        state.next_id += 1;
        let id = ContainerId::new(format!("scripted-{}", state.next_id));
        state.containers.insert(id.clone(), (role, spec.clone()));
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> EngineResult<()> {
        let (role, spec) = self.lookup(id)?;
        let script = self.script(role);
        if script.writes.is_empty() {
            return Ok(());
        }
        let mount = spec
            .mounts
            .iter()
            .find(|m| !m.read_only)
            .ok_or_else(|| EngineError::Protocol("no writable mount".to_string()))?;
        for (path, content) in &script.writes {
            let target = mount.host.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::Protocol(e.to_string()))?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
        }
        Ok(())
    }

    async fn follow_logs(&self, id: &ContainerId) -> EngineResult<LineStream> {
        let (role, _) = self.lookup(id)?;
        let lines = self.script(role).logs.clone();
        Ok(stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn wait(&self, id: &ContainerId) -> EngineResult<i64> {
        let (role, _) = self.lookup(id)?;
        Ok(self.script(role).exit_code)
    }

    async fn stats(&self, id: &ContainerId) -> EngineResult<LineStream> {
        let (role, _) = self.lookup(id)?;
        let lines = self.script(role).stats.clone();
        Ok(stream::iter(lines.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }

    async fn captured_output(&self, id: &ContainerId) -> EngineResult<CapturedOutput> {
        let (role, _) = self.lookup(id)?;
        let script = self.script(role);
        Ok(CapturedOutput {
            stdout: script.stdout.clone(),
            stderr: script.stderr.clone(),
        })
    }

    async fn remove(&self, id: &ContainerId) -> EngineResult<()> {
        let mut state = self.state();
        state.containers.remove(id);
        state.removed.push(id.clone());
        Ok(())
    }
}

/// Normalizer that changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNormalizer;

#[async_trait]
impl crate::stage::OwnershipNormalizer for NoopNormalizer {
    async fn normalize(
        &self,
        _dir: &std::path::Path,
        _ownership: trove_core::OwnershipConfig,
    ) -> crate::error::RuntimeResult<()> {
        Ok(())
    }
}
