//! S3-backed artifact store.
//!
//! One bucket holds both namespaces; each `S3ArtifactStore` instance is
//! scoped to a key prefix (for example `images/` or `metadata/`) and
//! exposes only the names within it.

use crate::store::{ArtifactStore, StoreError, StoredObject};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// S3 connection settings shared by all namespaces of a deployment
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    /// Bucket holding images and metadata
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Artifact store on one S3 bucket under one key prefix.
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    /// Build a client from settings and scope it to a namespace prefix.
    pub async fn new(settings: &S3Settings, prefix: impl Into<String>) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = settings.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());
        Self::with_client(client, &settings.bucket, prefix)
    }

    /// Scope an existing client to a bucket and namespace prefix.
    pub fn with_client(client: S3Client, bucket: &str, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        info!(
            bucket = %bucket,
            prefix = %prefix,
            "S3 artifact store initialized"
        );
        Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    fn full_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(name))
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(name.to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(name))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(name.to_string())
                } else {
                    StoreError::Request(e.to_string())
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(name))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StoreError::Request(e.to_string()))
                }
            }
        }
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<StoredObject>, StoreError> {
        let list_prefix = format!("{}{}", self.prefix, prefix.unwrap_or(""));
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                let Some(name) = key.strip_prefix(&self.prefix) else {
                    continue;
                };

                // Backends can omit last-modified; fall back to now so a
                // listing never fails over a missing timestamp.
                let created_at = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now);

                objects.push(StoredObject {
                    name: name.to_string(),
                    created_at,
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn url_for(&self, name: &str, expiry: Duration) -> Result<Option<String>, StoreError> {
        let presigning = PresigningConfig::expires_in(expiry)
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(name))
            .presigned(presigning)
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Some(presigned.uri().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_store(prefix: &str) -> S3ArtifactStore {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        S3ArtifactStore::with_client(S3Client::from_conf(conf), "iris", prefix)
    }

    #[test]
    fn test_full_key_applies_prefix() {
        let store = offline_store("images/");
        assert_eq!(store.full_key("a.jpg"), "images/a.jpg");
    }

    #[test]
    fn test_empty_prefix_passes_name_through() {
        let store = offline_store("");
        assert_eq!(store.full_key("a.jpg"), "a.jpg");
    }
}
