//! S3-backed `ObjectStore`, wrapped by the shared retry policy.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use cb_retry::RetryPolicy;

use crate::{DeleteOutcome, ListedKey, ObjectStore, ObjectStoreError, PutOptions, Result};

/// Object-store client backed by a real S3 bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub async fn from_env(region: &str, bucket: impl Into<String>) -> Self {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), bucket)
    }

    /// The retryable set from the spec: throttling, timeouts, 5xx, and S3's
    /// own `SlowDown`.
    fn classify(err: &aws_sdk_s3::error::SdkError<impl std::error::Error + 'static>) -> ObjectStoreError {
        use aws_sdk_s3::error::SdkError;
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                ObjectStoreError::Transient(err.to_string())
            }
            SdkError::ServiceError(service_err) => {
                let raw = service_err.raw();
                let status = raw.status().as_u16();
                if status >= 500 || status == 429 {
                    ObjectStoreError::Transient(err.to_string())
                } else {
                    ObjectStoreError::Other(err.to_string())
                }
            }
            _ => ObjectStoreError::Other(err.to_string()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, opts: PutOptions) -> Result<String> {
        let result = self
            .retry
            .run(ObjectStoreError::is_retryable, || {
                let bytes = bytes.clone();
                async {
                    let mut req = self
                        .client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .body(ByteStream::from(bytes));
                    if let Some(etag) = &opts.if_match {
                        req = req.if_match(etag);
                    } else {
                        // Unconditional create — still guard against
                        // clobbering via `if_none_match` when the caller
                        // passed no precondition but also didn't opt into
                        // overwrite semantics explicitly is out of scope:
                        // absence of `if_match` means overwrite is allowed.
                    }
                    if opts.sse {
                        req = req.server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
                    }
                    req.send().await.map_err(|e| Self::classify(&e))
                }
            })
            .await;

        match result {
            Ok(output) => Ok(output.e_tag().unwrap_or_default().trim_matches('"').to_string()),
            Err(retry_err) => {
                if retry_err.last_error.contains("PreconditionFailed")
                    || retry_err.last_error.contains("412")
                {
                    Err(ObjectStoreError::PreconditionFailed { key: key.to_string() })
                } else {
                    Err(ObjectStoreError::Transient(retry_err.to_string()))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<(Vec<u8>, String)> {
        let result = self
            .retry
            .run(ObjectStoreError::is_retryable, || async {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| Self::classify(&e))
            })
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| ObjectStoreError::Other(e.to_string()))?
                    .into_bytes()
                    .to_vec();
                Ok((bytes, etag))
            }
            Err(retry_err) => {
                if retry_err.last_error.contains("NoSuchKey") {
                    Err(ObjectStoreError::NotFound(key.to_string()))
                } else {
                    Err(ObjectStoreError::Transient(retry_err.to_string()))
                }
            }
        }
    }

    async fn head(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(output) => Ok(Some(output.e_tag().unwrap_or_default().trim_matches('"').to_string())),
            Err(e) => {
                let svc_err = e.as_service_error();
                if svc_err.map(|e| e.is_not_found()).unwrap_or(false) {
                    Ok(None)
                } else {
                    Err(ObjectStoreError::Transient(e.to_string()))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListedKey>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let output = self
                .retry
                .run(ObjectStoreError::is_retryable, || async {
                    req.clone().send().await.map_err(|e| Self::classify(&e))
                })
                .await
                .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    keys.push(ListedKey { key: key.to_string() });
                }
            }
            if output.is_truncated().unwrap_or(false) {
                continuation = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<DeleteOutcome> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        let mut outcome = DeleteOutcome::default();
        for batch in keys.chunks(1000) {
            let ids: Vec<ObjectIdentifier> = batch
                .iter()
                .filter_map(|k| ObjectIdentifier::builder().key(k).build().ok())
                .collect();
            let delete = Delete::builder().set_objects(Some(ids)).build().map_err(|e| {
                ObjectStoreError::Other(format!("building delete batch: {e}"))
            })?;

            let result = self
                .retry
                .run(ObjectStoreError::is_retryable, || async {
                    self.client
                        .delete_objects()
                        .bucket(&self.bucket)
                        .delete(delete.clone())
                        .send()
                        .await
                        .map_err(|e| Self::classify(&e))
                })
                .await
                .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;

            for deleted in result.deleted() {
                if let Some(key) = deleted.key() {
                    outcome.deleted.push(key.to_string());
                }
            }
            for err in result.errors() {
                outcome.errors.push((
                    err.key().unwrap_or_default().to_string(),
                    err.message().unwrap_or_default().to_string(),
                ));
            }
        }
        Ok(outcome)
    }
}
