//! S3-compatible object backend.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, R2). A custom
//! endpoint switches the client to path-style addressing. Every call is
//! bounded by the configured timeout so a stalled store cannot pin request
//! workers indefinitely.
//!
//! Feature-gated behind `s3-backend`.

use std::time::Duration;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use crate::{ObjectMeta, ObjectStore, StorageError, StoredObject};

/// Connection settings for [`S3Backend`].
#[derive(Clone, Default)]
pub struct S3Settings {
    /// Bucket holding all objects.
    pub bucket: String,
    /// AWS region (any value works for most S3-compatible services).
    pub region: String,
    /// Custom endpoint URL; enables path-style addressing.
    pub endpoint_url: Option<String>,
    /// Static access key ID. Falls back to the default credential chain.
    pub access_key_id: Option<String>,
    /// Static secret access key.
    pub secret_access_key: Option<String>,
    /// Upper bound for each storage call.
    pub timeout: Duration,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("secret_access_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An object backend backed by an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    timeout: Duration,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client from settings plus the ambient AWS configuration
    /// (environment, profile, instance metadata).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the bucket name is empty.
    pub async fn connect(settings: &S3Settings) -> Result<Self, StorageError> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::Open {
                location: "s3".to_owned(),
                reason: "bucket name is empty".to_owned(),
            });
        }

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            let creds = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "device-management",
            );
            builder = builder.credentials_provider(
                aws_credential_types::provider::SharedCredentialsProvider::new(creds),
            );
        }

        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::from_client(
            aws_sdk_s3::Client::from_conf(builder.build()),
            settings.bucket.clone(),
            settings.timeout,
        ))
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: aws_sdk_s3::Client, bucket: String, timeout: Duration) -> Self {
        Self {
            client,
            bucket,
            timeout,
        }
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn timeout_err(&self, operation: &'static str, key: &str) -> StorageError {
        StorageError::Timeout {
            operation,
            key: key.to_owned(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send();

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| self.timeout_err("put", key))?
            .map_err(|e| StorageError::Write {
                key: key.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(bucket = %self.bucket, key, "object written to s3");
        Ok(format!("s3://{}/{key}", self.bucket))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        let output = match tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| self.timeout_err("get", key))?
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => {
                return Err(StorageError::Read {
                    key: key.to_owned(),
                    reason: DisplayErrorContext(&e).to_string(),
                });
            }
        };

        let meta = ObjectMeta {
            size: output.content_length().and_then(|n| u64::try_from(n).ok()),
            content_type: output.content_type().map(str::to_owned),
        };

        Ok(Some(StoredObject {
            meta,
            body: Box::pin(output.body.into_async_read()),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let request = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        match tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| self.timeout_err("head", key))?
        {
            Ok(output) => Ok(Some(ObjectMeta {
                size: output.content_length().and_then(|n| u64::try_from(n).ok()),
                content_type: output.content_type().map(str::to_owned),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| self.timeout_err("delete", key))?
            .map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let config = PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Read {
            key: key.to_owned(),
            reason: format!("invalid presign TTL: {e}"),
        })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(presigned.uri().to_owned())
    }

    async fn probe(&self) -> Result<(), StorageError> {
        let request = self.client.head_bucket().bucket(&self.bucket).send();

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| StorageError::Unreachable {
                backend: "s3",
                reason: format!("head_bucket timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| StorageError::Unreachable {
                backend: "s3",
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}
