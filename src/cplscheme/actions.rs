//! Obligations the scheme places on the embedding solver.

use std::fmt;

/// A named action the solver has to perform before the next `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Save the solver state at the start of an implicit timestep.
    WriteIterationCheckpoint,
    /// Restore the saved state; the iteration did not converge.
    ReadIterationCheckpoint,
    /// Write initial interface data before `initialize_data`.
    WriteInitialData,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::WriteIterationCheckpoint => "write-iteration-checkpoint",
            Action::ReadIterationCheckpoint => "read-iteration-checkpoint",
            Action::WriteInitialData => "write-initial-data",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
