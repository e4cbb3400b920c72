//! The wave queue and the per-future state the ephemeral dispatcher tracks
//! in memory.
//!
//! Breaking the cyclic Future/Cluster reference the source carries (§9):
//! a [`FutureHandle`] is a cheap `Copy` token (`task_id` only); all mutable
//! state lives in the dispatcher's index-keyed table, never on the handle
//! itself.

use std::collections::VecDeque;

use cb_lifecycle::TaskState;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A lightweight, `Copy` reference to a submitted task. All state is
/// looked up from the owning dispatcher by `task_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FutureHandle {
    pub task_id: Uuid,
}

/// The dispatcher-owned record a `FutureHandle` refers to.
#[derive(Debug, Clone)]
pub struct FutureState {
    pub task_id: Uuid,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub container_task_arn: Option<String>,
    pub cached_result: Option<Vec<u8>>,
    pub failed: Option<String>,
}

impl FutureState {
    pub fn new(task_id: Uuid, submitted_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            state: TaskState::Created,
            submitted_at,
            container_task_arn: None,
            cached_result: None,
            failed: None,
        }
    }
}

/// FIFO queue of futures awaiting dispatch plus the set currently
/// in-flight, bounding concurrency to `workers_per_wave` under quota
/// (invariant P6). A wave only opens once the previous one has fully
/// drained (strict wave boundaries, §4.5).
#[derive(Debug, Default)]
pub struct WaveQueue {
    pub pending: VecDeque<Uuid>,
    pub in_flight: Vec<Uuid>,
    pub wave_index: u32,
    pub completed_count: u32,
}

impl WaveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task_id: Uuid) {
        self.pending.push_back(task_id);
    }

    /// True exactly when a new wave may open (the previous one is empty).
    pub fn can_open_wave(&self) -> bool {
        self.in_flight.is_empty() && !self.pending.is_empty()
    }

    /// Take up to `n` tasks off the front of `pending` and move them into
    /// `in_flight`, advancing the wave index. FIFO order within the wave.
    pub fn open_wave(&mut self, n: usize) -> Vec<Uuid> {
        let take = n.min(self.pending.len());
        let mut dispatched = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(tid) = self.pending.pop_front() {
                self.in_flight.push(tid);
                dispatched.push(tid);
            }
        }
        if !dispatched.is_empty() {
            self.wave_index += 1;
        }
        dispatched
    }

    pub fn mark_done(&mut self, task_id: Uuid) {
        self.in_flight.retain(|t| *t != task_id);
        self.completed_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_does_not_open_while_previous_is_in_flight() {
        let mut q = WaveQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.push(a);
        q.push(b);
        let dispatched = q.open_wave(1);
        assert_eq!(dispatched, vec![a]);
        assert!(!q.can_open_wave(), "wave still in flight");
    }

    #[test]
    fn wave_opens_once_previous_drains() {
        let mut q = WaveQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.push(a);
        q.push(b);
        q.open_wave(1);
        q.mark_done(a);
        assert!(q.can_open_wave());
        let dispatched = q.open_wave(1);
        assert_eq!(dispatched, vec![b]);
        assert_eq!(q.wave_index, 2);
    }
}
