//! Manifest CAS update loop (§4.4), used by every writer: submit, extend,
//! terminate. Loses ordinary CAS races silently and retries with
//! backoff+jitter; only persistent contention past `MAX_RETRIES` escalates.

use std::time::Duration;

use cb_object_store::{ObjectStore, ObjectStoreError, PutOptions};
use cb_types::{keys, SessionManifest};
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::error::SessionError;

pub const MAX_RETRIES: u32 = 10;

pub async fn load_manifest<O: ObjectStore>(store: &O, session_id: Uuid) -> Result<(SessionManifest, String), SessionError> {
    let key = keys::session_manifest_key(session_id);
    let (bytes, etag) = store.get(&key).await.map_err(|e| match e {
        ObjectStoreError::NotFound(_) => SessionError::NotFound(session_id),
        other => other.into(),
    })?;
    let manifest: SessionManifest = cb_codec::decode(&bytes)?;
    Ok((manifest, etag))
}

/// Apply `f` to the current manifest and CAS it back. Retries on a lost
/// race up to [`MAX_RETRIES`] times with jittered backoff, matching the
/// cadence the object-store retry policy uses elsewhere in the workspace.
pub async fn update_manifest<O, F>(store: &O, session_id: Uuid, mut f: F) -> Result<SessionManifest, SessionError>
where
    O: ObjectStore,
    F: FnMut(&mut SessionManifest),
{
    let key = keys::session_manifest_key(session_id);
    let mut attempt = 0;
    loop {
        let (mut manifest, etag) = load_manifest(store, session_id).await?;
        f(&mut manifest);
        let now = Utc::now();
        manifest.touch(now);
        let encoded = cb_codec::encode(&manifest)?;
        match store.put(&key, encoded, PutOptions::if_match(etag)).await {
            Ok(_) => return Ok(manifest),
            Err(ObjectStoreError::PreconditionFailed { .. }) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    return Err(SessionError::ManifestContention { session_id, attempts: attempt });
                }
                let jitter_ms: u64 = rand::thread_rng().gen_range(0..100);
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64 + jitter_ms)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_object_store::memory::InMemoryObjectStore;

    async fn seed_manifest(store: &InMemoryObjectStore, session_id: Uuid) {
        let manifest = SessionManifest::new(session_id, "bucket", Utc::now());
        let bytes = cb_codec::encode(&manifest).unwrap();
        store
            .put(&keys::session_manifest_key(session_id), bytes, PutOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_updates_all_land() {
        use std::sync::Arc;

        let store = InMemoryObjectStore::shared();
        let session_id = Uuid::new_v4();
        seed_manifest(&store, session_id).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                update_manifest(&*store, session_id, |m| {
                    m.add_task(Uuid::new_v4());
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let (manifest, _) = load_manifest(&store, session_id).await.unwrap();
        assert_eq!(manifest.tasks.len(), 5, "every concurrent update's change survives (P2)");
    }

    #[tokio::test]
    async fn last_activity_is_monotonic() {
        let store = InMemoryObjectStore::new();
        let session_id = Uuid::new_v4();
        seed_manifest(&store, session_id).await;

        let (before, _) = load_manifest(&store, session_id).await.unwrap();
        update_manifest(&store, session_id, |m| m.add_task(Uuid::new_v4())).await.unwrap();
        let (after, _) = load_manifest(&store, session_id).await.unwrap();
        assert!(after.last_activity >= before.last_activity);
        assert!(after.revision > before.revision);
    }
}
