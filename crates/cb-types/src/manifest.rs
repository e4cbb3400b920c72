//! The detached session manifest: the single object-store-resident record
//! of which tasks exist, who has claimed them, and how they finished.

use std::collections::BTreeMap;

use cb_lifecycle::DetachedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One task's row within a `SessionManifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManifestEntry {
    pub state: DetachedState,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskManifestEntry {
    pub fn pending() -> Self {
        Self {
            state: DetachedState::Pending,
            claimed_by: None,
            claimed_at: None,
            attempt: 0,
            finished_at: None,
        }
    }
}

/// The full state of a detached session, round-tripped through the object
/// store via compare-and-swap on every update (invariant D2/D3: a manifest
/// write only succeeds if the writer's read `revision` is still current).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: Uuid,
    pub bucket: String,
    pub created_at: DateTime<Utc>,
    /// Monotonically non-decreasing on every successful CAS write (D3);
    /// readers use it to detect a stalled session, not for concurrency
    /// control itself (the object store's ETag is the actual CAS token).
    pub last_activity: DateTime<Utc>,
    /// Reattach refuses sessions whose deadline has passed (B5); workers
    /// self-exit once it passes. `None` means no lifetime cap.
    pub absolute_deadline: Option<DateTime<Utc>>,
    /// Monotonically incremented on every successful CAS write; used only
    /// for human-readable diagnostics, never for concurrency control itself
    /// (the object store's ETag is the actual compare-and-swap token).
    pub revision: u64,
    pub tasks: BTreeMap<Uuid, TaskManifestEntry>,
    /// ARNs of every worker container task launched for this session, used
    /// by cleanup's best-effort stop pass.
    pub container_task_arns: Vec<String>,
    pub closed: bool,
}

impl SessionManifest {
    pub fn new(session_id: Uuid, bucket: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            bucket: bucket.into(),
            created_at,
            last_activity: created_at,
            absolute_deadline: None,
            revision: 0,
            tasks: BTreeMap::new(),
            container_task_arns: Vec::new(),
            closed: false,
        }
    }

    pub fn with_absolute_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.absolute_deadline = Some(deadline);
        self
    }

    pub fn add_task(&mut self, task_id: Uuid) {
        self.tasks.entry(task_id).or_insert_with(TaskManifestEntry::pending);
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !t.state.is_terminal())
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.state.is_terminal())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.absolute_deadline.map(|d| d < now).unwrap_or(false)
    }

    /// Bump the revision counter and `last_activity` after a successful
    /// write; called by the session core immediately before re-serializing
    /// for the next CAS put.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manifest_has_no_tasks() {
        let m = SessionManifest::new(Uuid::new_v4(), "bucket", Utc::now());
        assert_eq!(m.tasks.len(), 0);
        assert!(m.all_terminal());
    }

    #[test]
    fn pending_count_ignores_terminal_tasks() {
        let mut m = SessionManifest::new(Uuid::new_v4(), "bucket", Utc::now());
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        m.add_task(t1);
        m.add_task(t2);
        assert_eq!(m.pending_count(), 2);
        m.tasks.get_mut(&t1).unwrap().state = DetachedState::Completed;
        assert_eq!(m.pending_count(), 1);
        assert!(!m.all_terminal());
    }
}
