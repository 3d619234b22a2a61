// SPDX-License-Identifier: Apache-2.0

//! The engine's lifecycle state machine: `NEW -> RUNNING -> SHUTDOWN ->
//! TERMINATED`. Illegal transitions are rejected rather than silently
//! coerced.

use std::sync::atomic::{AtomicU8, Ordering};

/// One state in the engine's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    New,
    Running,
    Shutdown,
    Terminated,
}

impl EngineState {
    fn to_u8(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Running => 1,
            Self::Shutdown => 2,
            Self::Terminated => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::New,
            1 => Self::Running,
            2 => Self::Shutdown,
            _ => Self::Terminated,
        }
    }
}

/// Atomic holder for the engine's current state. Shared across every loop
/// thread and whichever thread calls `start`/`shutdown`/`awaitTermination`.
#[derive(Debug)]
pub struct AtomicEngineState(AtomicU8);

impl AtomicEngineState {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(EngineState::New.to_u8()))
    }

    #[must_use]
    pub fn load(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Transitions from `from` to `to` if the current state is exactly
    /// `from`. Returns whether the transition happened.
    pub fn transition(&self, from: EngineState, to: EngineState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally sets the state. Used for the `NEW -> TERMINATED`
    /// shortcut and terminal transitions that cannot race.
    pub fn store(&self, state: EngineState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

impl Default for AtomicEngineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_new() {
        assert_eq!(AtomicEngineState::new().load(), EngineState::New);
    }

    #[test]
    fn transition_fails_from_wrong_state() {
        let state = AtomicEngineState::new();
        assert!(!state.transition(EngineState::Running, EngineState::Shutdown));
        assert_eq!(state.load(), EngineState::New);
    }

    #[test]
    fn transition_succeeds_from_matching_state() {
        let state = AtomicEngineState::new();
        assert!(state.transition(EngineState::New, EngineState::Running));
        assert_eq!(state.load(), EngineState::Running);
    }
}
