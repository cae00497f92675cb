use std::fmt;
use std::ops::RangeInclusive;

use crate::error::{OrchestratorError, Result};

/// Where the phase loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Uninitialized,
    Running(u32),
    Finished,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseState::Uninitialized => write!(f, "uninitialized"),
            PhaseState::Running(phase) => write!(f, "phase {phase}"),
            PhaseState::Finished => write!(f, "finished"),
        }
    }
}

/// Drives the phase loop over a range fixed at setup time.
#[derive(Debug, Clone)]
pub struct PhaseCursor {
    state: PhaseState,
    first: u32,
    last: u32,
}

impl PhaseCursor {
    pub fn new(range: RangeInclusive<u32>) -> Self {
        Self {
            state: PhaseState::Uninitialized,
            first: *range.start(),
            last: *range.end(),
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Number of phases the range covers.
    pub fn total(&self) -> u32 {
        if self.last < self.first {
            0
        } else {
            self.last - self.first + 1
        }
    }

    pub fn validate_transition(&self, to: PhaseState) -> Result<()> {
        let allowed = match (self.state, to) {
            (PhaseState::Uninitialized, PhaseState::Running(p)) => p == self.first,
            (PhaseState::Uninitialized, PhaseState::Finished) => self.total() == 0,
            (PhaseState::Running(current), PhaseState::Running(next)) => {
                next == current + 1 && next <= self.last
            }
            (PhaseState::Running(current), PhaseState::Finished) => current == self.last,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn next_state(&self) -> PhaseState {
        match self.state {
            PhaseState::Uninitialized if self.total() > 0 => PhaseState::Running(self.first),
            PhaseState::Running(current) if current < self.last => PhaseState::Running(current + 1),
            _ => PhaseState::Finished,
        }
    }

    /// Step to the next phase; `None` once the range is exhausted.
    pub fn advance(&mut self) -> Result<Option<u32>> {
        if self.state == PhaseState::Finished {
            return Ok(None);
        }
        let next = self.next_state();
        self.validate_transition(next)?;
        self.state = next;
        Ok(match next {
            PhaseState::Running(phase) => Some(phase),
            _ => None,
        })
    }
}
