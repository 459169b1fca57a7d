//! States of a single run.

use serde::{Deserialize, Serialize};

/// Pipeline state, entered strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunState {
    /// Payload unpacked into the run's workspace
    Staged,
    /// Initial arrangement copied and bagged
    InitialBagged,
    /// Image built from the workspace
    ImageBuilt,
    /// Entrypoint executed under isolation
    Executed,
    /// Final arrangement bagged
    ResultBagged,
    /// Declaration built and signed
    Signed,
    /// Declaration and signature timestamped
    Timestamped,
    /// Final bag archived
    Packaged,
    /// Terminal success
    Done,
}

impl RunState {
    /// Every state in order
    pub const ALL: [RunState; 9] = [
        RunState::Staged,
        RunState::InitialBagged,
        RunState::ImageBuilt,
        RunState::Executed,
        RunState::ResultBagged,
        RunState::Signed,
        RunState::Timestamped,
        RunState::Packaged,
        RunState::Done,
    ];

    /// The state that must follow this one
    #[must_use]
    pub const fn next(&self) -> Option<RunState> {
        match self {
            Self::Staged => Some(Self::InitialBagged),
            Self::InitialBagged => Some(Self::ImageBuilt),
            Self::ImageBuilt => Some(Self::Executed),
            Self::Executed => Some(Self::ResultBagged),
            Self::ResultBagged => Some(Self::Signed),
            Self::Signed => Some(Self::Timestamped),
            Self::Timestamped => Some(Self::Packaged),
            Self::Packaged => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Whether no further state follows
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Stable name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Staged => "Staged",
            Self::InitialBagged => "InitialBagged",
            Self::ImageBuilt => "ImageBuilt",
            Self::Executed => "Executed",
            Self::ResultBagged => "ResultBagged",
            Self::Signed => "Signed",
            Self::Timestamped => "Timestamped",
            Self::Packaged => "Packaged",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_walks_all_states() {
        let mut state = RunState::Staged;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            seen.push(next);
            state = next;
        }
        assert_eq!(seen, RunState::ALL.to_vec());
        assert!(state.is_terminal());
    }
}
