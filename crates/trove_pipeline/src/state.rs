//! Strictly sequential run state machine.

use std::fmt;

use trove_core::RunState;

/// Where a run stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No state entered yet
    Pending,
    /// Last state entered
    At(RunState),
    /// Entering `stage` failed; terminal
    Failed {
        /// State that could not be entered
        stage: RunState,
        /// Rendered cause
        cause: String,
    },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::At(state) => write!(f, "{state}"),
            Self::Failed { stage, cause } => write!(f, "failed at {stage}: {cause}"),
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Target is not the next state
    #[error("cannot enter {to} from {from}")]
    OutOfOrder {
        /// Current phase
        from: String,
        /// Requested state
        to: RunState,
    },
    /// Run already finished
    #[error("run already finished ({0})")]
    Finished(String),
}

/// Enforces `Staged → … → Done` with a single terminal failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStateMachine {
    phase: Phase,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    /// Machine before the first state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Pending,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Last state entered, if any
    #[must_use]
    pub const fn current(&self) -> Option<RunState> {
        match self.phase {
            Phase::At(state) => Some(state),
            _ => None,
        }
    }

    /// State that may be entered next
    #[must_use]
    pub const fn upcoming(&self) -> Option<RunState> {
        match &self.phase {
            Phase::Pending => Some(RunState::Staged),
            Phase::At(state) => state.next(),
            Phase::Failed { .. } => None,
        }
    }

    /// Whether the run reached `Done` or failed
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.upcoming().is_none()
    }

    /// Enter `to`
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless `to` is the upcoming state
    pub fn advance(&mut self, to: RunState) -> Result<(), TransitionError> {
        match self.upcoming() {
            Some(next) if next == to => {
                self.phase = Phase::At(to);
                Ok(())
            }
            Some(_) => Err(TransitionError::OutOfOrder {
                from: self.phase.to_string(),
                to,
            }),
            None => Err(TransitionError::Finished(self.phase.to_string())),
        }
    }

    /// Record that entering the upcoming state failed; returns that state
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::Finished` if the run already finished
    pub fn fail(&mut self, cause: impl Into<String>) -> Result<RunState, TransitionError> {
        let stage = self
            .upcoming()
            .ok_or_else(|| TransitionError::Finished(self.phase.to_string()))?;
        self.phase = Phase::Failed {
            stage,
            cause: cause.into(),
        };
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_sequence() {
        let mut machine = RunStateMachine::new();
        for state in RunState::ALL {
            machine.advance(state).unwrap();
            assert_eq!(machine.current(), Some(state));
        }
        assert!(machine.is_finished());
        assert!(matches!(
            machine.advance(RunState::Staged),
            Err(TransitionError::Finished(_))
        ));
        assert!(machine.fail("late").is_err());
    }

    #[test]
    fn test_no_skipping() {
        let mut machine = RunStateMachine::new();
        machine.advance(RunState::Staged).unwrap();
        assert!(matches!(
            machine.advance(RunState::ImageBuilt),
            Err(TransitionError::OutOfOrder { .. })
        ));
        assert_eq!(machine.current(), Some(RunState::Staged));
    }

    #[test]
    fn test_failure_names_state_being_entered() {
        let mut machine = RunStateMachine::new();
        for state in [RunState::Staged, RunState::InitialBagged, RunState::ImageBuilt] {
            machine.advance(state).unwrap();
        }
        let stage = machine.fail("exit code 3").unwrap();
        assert_eq!(stage, RunState::Executed);
        assert_eq!(
            machine.phase(),
            &Phase::Failed {
                stage: RunState::Executed,
                cause: "exit code 3".to_string()
            }
        );
        assert!(machine.is_finished());
        assert!(machine.advance(RunState::Executed).is_err());
        assert_eq!(machine.phase().to_string(), "failed at Executed: exit code 3");
    }

    #[test]
    fn test_failure_before_first_state() {
        let mut machine = RunStateMachine::new();
        assert_eq!(machine.fail("bad zip").unwrap(), RunState::Staged);
    }

    proptest! {
        #[test]
        fn prop_entered_states_are_a_prefix(
            attempts in proptest::collection::vec(0usize..RunState::ALL.len(), 0..40)
        ) {
            let mut machine = RunStateMachine::new();
            let mut entered = Vec::new();
            for idx in attempts {
                if machine.advance(RunState::ALL[idx]).is_ok() {
                    entered.push(RunState::ALL[idx]);
                }
            }
            prop_assert_eq!(&entered[..], &RunState::ALL[..entered.len()]);
        }
    }
}
