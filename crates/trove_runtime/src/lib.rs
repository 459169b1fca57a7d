//! Trove Runtime
//!
//! Everything that touches a container engine: staging submissions into a
//! run's workspace, building an image from it, and executing the entrypoint
//! with network isolation while logs and resource usage are captured.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod docker;
pub mod driver;
pub mod engine;
pub mod error;
pub mod stage;
pub mod stats;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::ImageBuilder;
pub use docker::DockerCli;
pub use driver::{ExecutionDriver, ExecutionReport, ExecutionRequest};
pub use engine::{
    CapturedOutput, ContainerEngine, ContainerId, ContainerSpec, EngineError, EngineResult,
    LineStream, VolumeMount,
};
pub use error::{RuntimeError, RuntimeResult};
pub use stage::{ChownCommand, OwnershipNormalizer, RunDirs, Submission, SubmissionStager};
pub use stats::{StatsSampler, sanitize};
