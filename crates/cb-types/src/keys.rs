//! Object-store key-naming conventions. Centralized here so the dispatcher,
//! session core, and worker runtime never hand-construct a key and risk
//! drifting apart from each other (per the layout in the external
//! interfaces section).

use uuid::Uuid;

const BOOTSTRAP_PREFIX: &str = "bootstrap/";

pub fn task_key(task_id: Uuid) -> String {
    format!("tasks/{task_id}.blob")
}

pub fn result_key(task_id: Uuid) -> String {
    format!("results/{task_id}.blob")
}

pub fn session_manifest_key(session_id: Uuid) -> String {
    format!("sessions/{session_id}/manifest.blob")
}

pub fn session_task_status_key(session_id: Uuid, task_id: Uuid) -> String {
    format!("sessions/{session_id}/tasks/{task_id}/status.blob")
}

pub fn session_task_result_key(session_id: Uuid, task_id: Uuid) -> String {
    format!("sessions/{session_id}/tasks/{task_id}/result.blob")
}

pub fn bootstrap_key(name: &str) -> String {
    format!("{BOOTSTRAP_PREFIX}{name}")
}

/// Bootstrap objects (worker init scripts, shared wheels, etc.) live outside
/// the `tasks/`/`results/`/`sessions/` namespace and must never be swept up
/// by session cleanup or task listing.
pub fn is_bootstrap_key(key: &str) -> bool {
    key.starts_with(BOOTSTRAP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        let tid = Uuid::nil();
        let sid = Uuid::nil();
        assert_eq!(task_key(tid), "tasks/00000000-0000-0000-0000-000000000000.blob");
        assert_eq!(result_key(tid), "results/00000000-0000-0000-0000-000000000000.blob");
        assert_ne!(
            session_task_status_key(sid, tid),
            session_task_result_key(sid, tid)
        );
    }

    #[test]
    fn bootstrap_keys_are_excluded_from_session_namespace() {
        assert!(is_bootstrap_key(&bootstrap_key("init.sh")));
        assert!(!is_bootstrap_key(&task_key(Uuid::nil())));
    }
}
