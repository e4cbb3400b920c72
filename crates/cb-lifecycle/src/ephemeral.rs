use serde::{Deserialize, Serialize};

use crate::transition::TransitionError;

/// Lifecycle of a task dispatched through the in-memory ephemeral path. A
/// task is born `Created` the moment a caller's future is registered and
/// ends in exactly one of `Completed`/`Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Queued,
    Claimed,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    /// Ordinal position in the forward-only lifecycle graph. Terminal states
    /// share the highest ordinal since neither can move to the other.
    fn rank(self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Queued => 1,
            TaskState::Claimed => 2,
            TaskState::Running => 3,
            TaskState::Completed | TaskState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Validate a proposed move. States only ever advance; a terminal state
    /// never transitions again.
    pub fn validate_transition(self, to: TaskState) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                from: format!("{self:?}"),
                to: format!("{to:?}"),
            });
        }
        if to.rank() <= self.rank() && to != self {
            return Err(TransitionError {
                from: format!("{self:?}"),
                to: format!("{to:?}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(TaskState::Created.validate_transition(TaskState::Queued).is_ok());
        assert!(TaskState::Queued.validate_transition(TaskState::Claimed).is_ok());
        assert!(TaskState::Running.validate_transition(TaskState::Completed).is_ok());
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(TaskState::Claimed.validate_transition(TaskState::Created).is_err());
        assert!(TaskState::Running.validate_transition(TaskState::Queued).is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(TaskState::Completed.validate_transition(TaskState::Running).is_err());
        assert!(TaskState::Failed.validate_transition(TaskState::Completed).is_err());
    }
}
