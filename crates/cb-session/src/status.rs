//! Per-task status object: `sessions/<sid>/tasks/<tid>/status.blob`.

use cb_lifecycle::DetachedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: Uuid,
    pub state: DetachedState,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn pending(task_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            state: DetachedState::Pending,
            created_at,
            claimed_at: None,
            claimed_by: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn claim(&mut self, worker_id: impl Into<String>, now: DateTime<Utc>) {
        self.state = DetachedState::Claimed;
        self.claimed_at = Some(now);
        self.claimed_by = Some(worker_id.into());
    }

    pub fn start_running(&mut self, now: DateTime<Utc>) {
        self.state = DetachedState::Running;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = DetachedState::Completed;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.state = DetachedState::Failed;
        self.completed_at = Some(now);
        self.error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_status_has_no_claim() {
        let s = TaskStatus::pending(Uuid::new_v4(), Utc::now());
        assert_eq!(s.state, DetachedState::Pending);
        assert!(s.claimed_by.is_none());
    }

    #[test]
    fn claim_then_fail_records_error() {
        let mut s = TaskStatus::pending(Uuid::new_v4(), Utc::now());
        let now = Utc::now();
        s.claim("worker-1", now);
        s.start_running(now);
        s.fail("boom", now);
        assert_eq!(s.state, DetachedState::Failed);
        assert_eq!(s.error.as_deref(), Some("boom"));
    }
}
