//! Progress events streamed to the caller of a run.
//!
//! Events are produced as stages complete and sent over a bounded channel;
//! transport to the caller is not this crate's concern.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::id::RunId;
use crate::state::RunState;
use crate::time::Timestamp;

/// Where a relayed log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Image builder container
    Build,
    /// Entrypoint container
    Run,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Work towards a state started
    StageStarted {
        /// State being entered
        state: RunState,
    },
    /// A state was entered
    StageCompleted {
        /// State entered
        state: RunState,
    },
    /// A container log line
    Log {
        /// Producing container
        source: LogSource,
        /// Line without trailing newline
        line: String,
    },
    /// Informational note
    Note {
        /// Message text
        message: String,
    },
    /// Terminal success marker
    Completed {
        /// File name of the result archive
        archive: String,
    },
    /// Terminal failure marker
    Failed {
        /// State that could not be entered
        stage: RunState,
        /// Rendered cause
        cause: String,
    },
}

impl EventKind {
    /// Whether the event ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// One progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Run that produced the event
    pub run_id: RunId,
    /// When it was emitted
    pub at: Timestamp,
    /// Payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EventKind::StageStarted { state } => write!(f, "-> {}", stage_message(*state)),
            EventKind::StageCompleted { state } => write!(f, "ok {}", state),
            EventKind::Log { line, .. } => f.write_str(line),
            EventKind::Note { message } => f.write_str(message),
            EventKind::Completed { archive } => {
                write!(f, "Your bag is available as: {}", archive)
            }
            EventKind::Failed { stage, cause } => write!(f, "FAILED at {}: {}", stage, cause),
        }
    }
}

fn stage_message(state: RunState) -> &'static str {
    match state {
        RunState::Staged => "Staging submission",
        RunState::InitialBagged => "Bagging initial state",
        RunState::ImageBuilt => "Building image",
        RunState::Executed => "Running",
        RunState::ResultBagged => "Bagging result",
        RunState::Signed => "Computing digests and signing the declaration",
        RunState::Timestamped => "Timestamping the declaration and signature",
        RunState::Packaged => "Zipping the bag",
        RunState::Done => "Done",
    }
}

/// Sending half of a run's progress stream
#[derive(Debug, Clone)]
pub struct EventSink {
    run_id: RunId,
    tx: mpsc::Sender<ProgressEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the caller drains
    #[must_use]
    pub fn channel(run_id: RunId, capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { run_id, tx }, rx)
    }

    /// Run this sink reports for
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Emit an event.
    ///
    /// A caller that stopped listening does not stop the run.
    pub async fn emit(&self, kind: EventKind) {
        let event = ProgressEvent {
            run_id: self.run_id,
            at: Timestamp::now(),
            kind,
        };
        if self.tx.send(event).await.is_err() {
            tracing::debug!(run_id = %self.run_id, "progress receiver dropped");
        }
    }

    /// Relay a container log line
    pub async fn log(&self, source: LogSource, line: impl Into<String>) {
        self.emit(EventKind::Log {
            source,
            line: line.into(),
        })
        .await;
    }

    /// Emit a note
    pub async fn note(&self, message: impl Into<String>) {
        self.emit(EventKind::Note {
            message: message.into(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let run_id = RunId::new();
        let (sink, mut rx) = EventSink::channel(run_id, 4);
        sink.emit(EventKind::StageStarted {
            state: RunState::Staged,
        })
        .await;
        sink.log(LogSource::Build, "step 1").await;
        drop(sink);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.run_id, run_id);
        assert!(matches!(first.kind, EventKind::StageStarted { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.to_string(), "step 1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel(RunId::new(), 1);
        drop(rx);
        sink.note("nobody listens").await;
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = ProgressEvent {
            run_id: RunId::new(),
            at: Timestamp::now(),
            kind: EventKind::Failed {
                stage: RunState::Executed,
                cause: "exit code 3".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["stage"], "Executed");
        assert!(event.kind.is_terminal());
        assert_eq!(event.to_string(), "FAILED at Executed: exit code 3");
    }
}
