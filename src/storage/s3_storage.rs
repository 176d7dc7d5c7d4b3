//! S3-compatible object storage implementation of the StorageManager trait
//!
//! Containers are emulated with key prefixes: listing uses the `/`
//! delimiter and removing a container deletes every key below it.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::{
    ClientConfig, Result, StorageDescription, StorageEntry, StorageError, StorageKind,
    StorageManager, path_segments,
};

/// Provides S3 storage for backup copies
pub struct S3StorageManager {
    id: String,
    client: S3Client,
    bucket: String,
    /// Key prefix of the volume root, empty or ending with `/`
    prefix: String,
    endpoint: Option<String>,
}

impl S3StorageManager {
    /// Build a client from explicit credentials and verify the bucket
    pub async fn open(conf: &ClientConfig) -> Result<Self> {
        if conf.bucket_name.is_empty() {
            return Err(StorageError::Config(format!(
                "volume '{}' has no bucket_name",
                conf.id
            )));
        }

        let credentials = Credentials::new(
            conf.key_id.clone(),
            conf.key_secret.clone(),
            None,
            None,
            "backilli",
        );

        let mut loader = aws_config::from_env()
            .region(Region::new(conf.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &conf.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let aws_config = loader.load().await;
        let client = S3Client::new(&aws_config);

        match client.head_bucket().bucket(&conf.bucket_name).send().await {
            Ok(_) => {
                info!("Successfully connected to S3 bucket: {}", &conf.bucket_name);
            }
            Err(err) => {
                error!("Failed to access S3 bucket: {}: {}", &conf.bucket_name, err);
                return Err(StorageError::S3(format!(
                    "Failed to access S3 bucket {}: {}",
                    &conf.bucket_name, err
                )));
            }
        }

        Ok(Self::with_client(conf, client))
    }

    fn with_client(conf: &ClientConfig, client: S3Client) -> Self {
        Self {
            id: conf.id.clone(),
            client,
            bucket: conf.bucket_name.clone(),
            prefix: key_prefix(&conf.root),
            endpoint: conf.endpoint.clone(),
        }
    }

    /// Get the object key for a storage path
    fn object_key(&self, path: &str) -> String {
        let relative: Vec<&str> = path_segments(path).collect();
        format!("{}{}", self.prefix, relative.join("/"))
    }

    /// Key prefix of the container at `path`
    fn container_prefix(&self, path: &str) -> String {
        let key = self.object_key(path);
        if key.is_empty() || key.ends_with('/') {
            key
        } else {
            format!("{key}/")
        }
    }

    /// Map AWS S3 errors to StorageError
    fn map_s3_error<E: std::fmt::Debug>(&self, error: SdkError<E>, operation: &str, key: &str) -> StorageError {
        match &error {
            SdkError::TimeoutError(_) => StorageError::Timeout(format!("{}/{}", self.bucket, key)),
            SdkError::ServiceError(service_err) if service_err.raw().http().status() == 404 => {
                StorageError::NotFound(format!("{}/{}", self.bucket, key))
            }
            _ => StorageError::S3(format!("{} failed for {}/{}: {:?}", operation, self.bucket, key, error)),
        }
    }

    /// Every key below `prefix`, following continuation tokens
    async fn keys_below(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|err| self.map_s3_error(err, "list", prefix))?;

            keys.extend(
                resp.contents()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.map_s3_error(err, "delete", key))?;
        Ok(())
    }
}

fn key_prefix(root: &str) -> String {
    let parts: Vec<&str> = path_segments(root).collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("{}/", parts.join("/"))
    }
}

/// Last segment of a key or common prefix
fn entry_name(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

#[async_trait]
impl StorageManager for S3StorageManager {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.object_key(path);
        debug!("Reading {} from S3 bucket {}", key, self.bucket);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| self.map_s3_error(err, "get", &key))?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("Failed to read S3 response body: {}", e)))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, content: &[u8], path: &str) -> Result<String> {
        let key = self.object_key(path);
        debug!("Uploading {} bytes to S3 bucket {} with key {}", content.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(|err| self.map_s3_error(err, "put", &key))?;

        Ok(format!("{}/{}", self.bucket, key))
    }

    async fn ls(&self, path: &str) -> Result<Vec<StorageEntry>> {
        let prefix = self.container_prefix(path);
        let mut entries = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|err| self.map_s3_error(err, "list", &prefix))?;

            for common in resp.common_prefixes().unwrap_or_default() {
                if let Some(name) = common.prefix().map(entry_name).filter(|n| !n.is_empty()) {
                    entries.push(StorageEntry::new(name, None));
                }
            }
            for obj in resp.contents().unwrap_or_default() {
                let Some(name) = obj.key().map(entry_name).filter(|n| !n.is_empty()) else {
                    continue;
                };
                let modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
                entries.push(StorageEntry::new(name, modified));
            }

            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let key = self.object_key(path);
        if key.is_empty() || key == self.prefix {
            return Err(StorageError::Config(format!(
                "refusing to remove the root of volume '{}'",
                self.id
            )));
        }

        for nested in self.keys_below(&self.container_prefix(path)).await? {
            self.delete_key(&nested).await?;
        }
        self.delete_key(&key).await?;

        info!("Removed {} from S3 bucket {}", key, self.bucket);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> StorageDescription {
        let location = match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, self.bucket, self.prefix),
            None => format!("{}/{}", self.bucket, self.prefix),
        };

        StorageDescription {
            id: self.id.clone(),
            kind: StorageKind::S3,
            location: location.trim_end_matches('/').to_string(),
        }
    }
}
