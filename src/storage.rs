//! Blob store adapter (S3-compatible) with mounted-volume fallback
//!
//! Uploads go through the object API first; when the API is unreachable and
//! a volume mount mirrors the buckets, files are copied straight onto the
//! mount as a last resort. Downloads prefer the mount (no network hop) and
//! fall back to the API.

use crate::config::BlobSettings;
use crate::error::PlatformError;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    bucket: String,
    volume_path: String,
}

impl BlobStore {
    pub fn new(settings: &BlobSettings) -> Self {
        let scheme = if settings.secure { "https" } else { "http" };
        let endpoint = format!("{}://{}", scheme, settings.endpoint);

        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "static",
        );
        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
            volume_path: settings.volume_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Path the object would have on the mounted volume, in the given bucket
    pub fn volume_candidate(&self, bucket: &str, object_key: &str) -> PathBuf {
        PathBuf::from(format!("{}/{}/{}", self.volume_path, bucket, object_key))
    }

    /// Upload a local file to `object_key` in the configured bucket.
    ///
    /// Returns the object key. Overwrites cleanly on replay.
    pub async fn upload_file(
        &self,
        object_key: &str,
        local_path: &Path,
        content_type: &str,
    ) -> crate::Result<String> {
        let body = match ByteStream::from_path(local_path).await {
            Ok(body) => body,
            Err(e) => {
                return Err(PlatformError::Blob(format!(
                    "cannot read {}: {}",
                    local_path.display(),
                    e
                )))
            }
        };

        let api_result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .body(body)
            .send()
            .await;

        match api_result {
            Ok(_) => {
                info!(
                    "uploaded {} -> s3://{}/{}",
                    local_path.display(),
                    self.bucket,
                    object_key
                );
                Ok(object_key.to_string())
            }
            Err(e) => {
                error!("blob API upload failed for {}: {}", object_key, e);
                self.volume_fallback_copy(object_key, local_path).await?;
                Ok(object_key.to_string())
            }
        }
    }

    /// Upload raw bytes (manifest writes)
    pub async fn upload_bytes(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> crate::Result<String> {
        let api_result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .body(ByteStream::from(bytes.clone()))
            .send()
            .await;

        match api_result {
            Ok(_) => {
                info!("uploaded s3://{}/{}", self.bucket, object_key);
                Ok(object_key.to_string())
            }
            Err(e) => {
                error!("blob API upload failed for {}: {}", object_key, e);
                let target = self.volume_candidate(&self.bucket, object_key);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, &bytes).await.map_err(|e| {
                    PlatformError::Blob(format!("all storage methods failed: {}", e))
                })?;
                info!("volume fallback write -> {}", target.display());
                Ok(object_key.to_string())
            }
        }
    }

    /// Download `bucket/object_key` to `local_path`, volume mount first.
    pub async fn download_to(
        &self,
        bucket: &str,
        object_key: &str,
        local_path: &Path,
    ) -> crate::Result<()> {
        let direct = self.volume_candidate(bucket, object_key);
        if tokio::fs::metadata(&direct).await.is_ok() {
            info!("downloading via direct mount: {}", direct.display());
            tokio::fs::copy(&direct, local_path).await?;
            return Ok(());
        }

        info!("downloading s3://{}/{} via API", bucket, object_key);
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| PlatformError::Blob(format!("download {} failed: {}", object_key, e)))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| PlatformError::Blob(format!("download {} failed: {}", object_key, e)))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, data.into_bytes()).await?;
        Ok(())
    }

    async fn volume_fallback_copy(&self, object_key: &str, local_path: &Path) -> crate::Result<()> {
        let target = self.volume_candidate(&self.bucket, object_key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(local_path, &target).await {
            Ok(_) => {
                warn!(
                    "volume fallback copy: {} -> {}",
                    local_path.display(),
                    target.display()
                );
                Ok(())
            }
            Err(e) => Err(PlatformError::Blob(format!(
                "all storage methods failed: {}",
                e
            ))),
        }
    }
}

/// Object keys for highlight artifacts
pub fn clip_key(video_id: &str, index: usize) -> String {
    format!("highlights/{}/clip_{:03}.mp4", video_id, index)
}

pub fn thumb_key(video_id: &str, index: usize) -> String {
    format!("highlights/{}/thumb_{:03}.jpg", video_id, index)
}

pub fn manifest_key(video_id: &str) -> String {
    format!("highlights/{}/highlights.json", video_id)
}

pub fn subtitle_key(video_id: &str) -> String {
    format!("subtitles/{}/en.vtt", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_keys() {
        assert_eq!(clip_key("v1", 0), "highlights/v1/clip_000.mp4");
        assert_eq!(thumb_key("v1", 12), "highlights/v1/thumb_012.jpg");
        assert_eq!(manifest_key("v1"), "highlights/v1/highlights.json");
        assert_eq!(subtitle_key("v1"), "subtitles/v1/en.vtt");
    }
}
