//! Wire schemas for the blobs exchanged between dispatcher/session core and
//! worker processes through the object store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker reads to know what to run. Encoded with the blob codec and
/// written under the `tasks/<task_id>.blob` key (or inlined for the
/// ephemeral path, where it travels via container environment variables
/// instead of the object store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub session_id: Option<Uuid>,
    /// Opaque, codec-encoded payload: the function and arguments to
    /// evaluate. The worker runtime does not interpret this; it hands the
    /// raw bytes to the configured evaluator.
    pub payload: Vec<u8>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// What a worker writes back after evaluating a `TaskEnvelope`. Written
/// under the `results/<task_id>.blob` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: Uuid,
    pub error: bool,
    /// Present when `error` is false: the codec-encoded return value.
    #[serde(default)]
    pub value: Option<Vec<u8>>,
    /// Present when `error` is true: a human-readable failure message.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    /// Success only: whether the evaluated expression's value should be
    /// printed (an invisible assignment result is still a value, just not
    /// one a REPL would echo). Irrelevant, and always `true`, on the error
    /// path.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Success only: messages/warnings raised but not fatal during
    /// evaluation (captured conditions), in the order raised. Always empty
    /// on the error path.
    #[serde(default)]
    pub conditions: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

fn default_visible() -> bool {
    true
}

impl ResultEnvelope {
    pub fn ok(task_id: Uuid, value: Vec<u8>, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            error: false,
            value: Some(value),
            message: None,
            stdout: None,
            visible: true,
            conditions: Vec::new(),
            started_at,
            finished_at,
        }
    }

    /// Like [`Self::ok`], but for a call whose result was assigned
    /// invisibly or that raised non-fatal conditions along the way.
    pub fn ok_with(
        task_id: Uuid,
        value: Vec<u8>,
        visible: bool,
        conditions: Vec<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            error: false,
            value: Some(value),
            message: None,
            stdout: None,
            visible,
            conditions,
            started_at,
            finished_at,
        }
    }

    pub fn failed(
        task_id: Uuid,
        message: impl Into<String>,
        stdout: Option<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            error: true,
            value: None,
            message: Some(message.into()),
            stdout,
            visible: true,
            conditions: Vec::new(),
            started_at,
            finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_envelope_ok_has_no_message() {
        let now = Utc::now();
        let r = ResultEnvelope::ok(Uuid::new_v4(), vec![1, 2, 3], now, now);
        assert!(!r.error);
        assert!(r.message.is_none());
        assert_eq!(r.value.as_deref(), Some([1, 2, 3].as_slice()));
        assert!(r.visible, "ok() defaults to a visible result");
        assert!(r.conditions.is_empty());
    }

    #[test]
    fn result_envelope_ok_with_carries_visibility_and_conditions() {
        let now = Utc::now();
        let r = ResultEnvelope::ok_with(
            Uuid::new_v4(),
            vec![1],
            false,
            vec!["low memory".to_string()],
            now,
            now,
        );
        assert!(!r.visible);
        assert_eq!(r.conditions, vec!["low memory".to_string()]);
    }

    #[test]
    fn decoding_an_envelope_missing_new_fields_defaults_them() {
        // Older encodings predate `visible`/`conditions`; the codec must
        // still decode them with the documented defaults (visible=true,
        // conditions=[]) rather than failing.
        #[derive(Serialize)]
        struct LegacyResultEnvelope {
            task_id: Uuid,
            error: bool,
            value: Option<Vec<u8>>,
            message: Option<String>,
            stdout: Option<String>,
            started_at: DateTime<Utc>,
            finished_at: DateTime<Utc>,
        }
        let now = Utc::now();
        let legacy = LegacyResultEnvelope {
            task_id: Uuid::new_v4(),
            error: false,
            value: Some(vec![9]),
            message: None,
            stdout: None,
            started_at: now,
            finished_at: now,
        };
        let bytes = cb_codec::encode(&legacy).unwrap();
        let decoded: ResultEnvelope = cb_codec::decode(&bytes).unwrap();
        assert!(decoded.visible);
        assert!(decoded.conditions.is_empty());
    }

    #[test]
    fn result_envelope_failed_has_no_value() {
        let now = Utc::now();
        let r = ResultEnvelope::failed(Uuid::new_v4(), "boom", Some("trace".into()), now, now);
        assert!(r.error);
        assert!(r.value.is_none());
        assert_eq!(r.message.as_deref(), Some("boom"));
    }
}
