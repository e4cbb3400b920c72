use serde::{Deserialize, Serialize};

use crate::transition::TransitionError;

/// Lifecycle of a task dispatched through the object-store-backed detached
/// path. The detached path has no visibility into a task before it is
/// written, so there is no `Created`/`Queued` split: a task simply exists in
/// `Pending` until some worker's atomic claim moves it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachedState {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
}

impl DetachedState {
    fn rank(self) -> u8 {
        match self {
            DetachedState::Pending => 0,
            DetachedState::Claimed => 1,
            DetachedState::Running => 2,
            DetachedState::Completed | DetachedState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DetachedState::Completed | DetachedState::Failed)
    }

    pub fn validate_transition(self, to: DetachedState) -> Result<(), TransitionError> {
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
    fn pending_to_claimed_allowed() {
        assert!(DetachedState::Pending.validate_transition(DetachedState::Claimed).is_ok());
    }

    #[test]
    fn claimed_cannot_return_to_pending() {
        assert!(DetachedState::Claimed.validate_transition(DetachedState::Pending).is_err());
    }

    #[test]
    fn completed_is_terminal() {
        assert!(DetachedState::Completed
            .validate_transition(DetachedState::Running)
            .is_err());
    }
}
