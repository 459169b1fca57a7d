//! Trove Pipeline
//!
//! Drives one submission at a time through staging, image build, isolated
//! execution, bagging, signing, timestamping and packaging. Every run has
//! its own task, scratch directory and progress stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod orchestrator;
pub mod run;
pub mod state;

pub use orchestrator::{Orchestrator, RunError, RunFailure, RunHandle, RunRequest, RunSummary};
pub use run::{Run, RunOutputs, StoredRun, stored_runs};
pub use state::{Phase, RunStateMachine, TransitionError};
