use serde::{Deserialize, Serialize};

/// Lifecycle of a supervised process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// No process, or it exited.
    #[default]
    NotRunning,

    /// Spawned, readiness not yet decided.
    Running,

    /// Spawned and ready.
    Initialized,

    /// Spawned but readiness failed.
    NotInitialized,
}

/// Computes the next state from the current one and the latest inputs.
#[must_use]
pub const fn next_state(current: ProcessState, running: bool, initialized: bool) -> ProcessState {
    match (current, running, initialized) {
        (ProcessState::NotRunning, true, _) => ProcessState::Running,
        (ProcessState::Running, true, true) => ProcessState::Initialized,
        (ProcessState::Running, true, false) => ProcessState::NotInitialized,
        (_, false, _) => ProcessState::NotRunning,
        (state, true, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_transition_table() {
        use ProcessState::{Initialized, NotInitialized, NotRunning, Running};

        assert_eq!(next_state(NotRunning, true, false), Running);
        assert_eq!(next_state(NotRunning, false, false), NotRunning);
        assert_eq!(next_state(Running, true, true), Initialized);
        assert_eq!(next_state(Running, false, true), NotRunning);
        assert_eq!(next_state(Running, false, false), NotRunning);
        assert_eq!(next_state(Running, true, false), NotInitialized);
        assert_eq!(next_state(Initialized, false, true), NotRunning);
        assert_eq!(next_state(NotInitialized, false, false), NotRunning);
    }

    fn any_state() -> impl Strategy<Value = ProcessState> {
        prop_oneof![
            Just(ProcessState::NotRunning),
            Just(ProcessState::Running),
            Just(ProcessState::Initialized),
            Just(ProcessState::NotInitialized),
        ]
    }

    proptest! {
        #[test]
        fn test_exit_always_leads_to_not_running(state in any_state(), initialized: bool) {
            prop_assert_eq!(next_state(state, false, initialized), ProcessState::NotRunning);
        }

        #[test]
        fn test_decided_states_hold_while_running(initialized: bool) {
            prop_assert_eq!(
                next_state(ProcessState::Initialized, true, initialized),
                ProcessState::Initialized
            );
            prop_assert_eq!(
                next_state(ProcessState::NotInitialized, true, initialized),
                ProcessState::NotInitialized
            );
        }
    }
}
