use async_trait::async_trait;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Id;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("other: {0}")]
    Other(String),
}

/// Object storage for board photos, addressed by slash-separated keys.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError>;
}

/// Storage key for a processed board photo. Content addressed, so the same
/// bytes uploaded twice for a location land on the same object.
pub fn object_key(location_id: Id, sha256_hex: &str) -> String {
    format!("locations/{location_id}/{sha256_hex}.jpg")
}

/// Reject keys that could escape the store root or address odd objects.
pub fn validate_key(key: &str) -> Result<(), ImageStoreError> {
    let ok = !key.is_empty()
        && key.len() <= 512
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'));
    if ok { Ok(()) } else { Err(ImageStoreError::InvalidKey(key.to_string())) }
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3ImageStore {
    pub async fn new(endpoint: String) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "pinboard-photos".into());
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let region_clone_for_hint = region.clone();
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style: MinIO and local endpoints have no wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client (path-style addressing enabled)");

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) => {
                        if attempt >= max_attempts {
                            let region_hint = if region_clone_for_hint != "us-east-1" {
                                " (non us-east-1 regions may need a CreateBucketConfiguration)"
                            } else {
                                ""
                            };
                            error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                            return Err(anyhow::anyhow!(
                                "failed to ensure bucket '{bucket}': {e2}{region_hint}"
                            ));
                        }
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "boards".into());
        Ok(Self { bucket, client, prefix })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        validate_key(key)?;
        let full = self.full_key(key);
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .is_ok()
        {
            return Err(ImageStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed key={full} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(ImageStoreError::Other(format!("{e}{hint}")));
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        validate_key(key)?;
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let declared = obj.content_type().map(str::to_string);
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = declared.unwrap_or_else(|| sniff_mime(&bytes));
        Ok((bytes, mime))
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        validate_key(key)?;
        // not-found counts as deleted
        let _ = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;
        Ok(())
    }
}

// ---------------- Filesystem Implementation (local development) ----------------
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ImageStoreError::Other(format!("create_dir_all {}: {e}", dir.display())))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("write failed path={} err={e}", path.display());
            ImageStoreError::Other(e.to_string())
        })
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mime = sniff_mime(&bytes);
                Ok((bytes, mime))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ImageStoreError::NotFound),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }
}

/// S3 when `S3_ENDPOINT` is configured, otherwise files under `data_dir/photos`.
pub async fn build_image_store(data_dir: &std::path::Path) -> anyhow::Result<Arc<dyn ImageStore>> {
    match std::env::var("S3_ENDPOINT") {
        Ok(endpoint) if !endpoint.is_empty() => Ok(Arc::new(S3ImageStore::new(endpoint).await?)),
        _ => {
            let root = data_dir.join("photos");
            info!("S3_ENDPOINT not set; storing photos under {}", root.display());
            Ok(Arc::new(FsImageStore::new(root)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_validated() {
        assert!(validate_key(&object_key(7, "abc123")).is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path.jpg").is_err());
        assert!(validate_key("a//b.jpg").is_err());
        assert!(validate_key("a/b c.jpg").is_err());
        assert!(validate_key("").is_err());
    }

    #[tokio::test]
    async fn fs_store_roundtrip_and_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let key = object_key(1, "deadbeef");
        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0];
        store.save(&key, "image/jpeg", &jpeg_magic).await.unwrap();
        assert!(matches!(
            store.save(&key, "image/jpeg", &jpeg_magic).await,
            Err(ImageStoreError::Duplicate)
        ));
        let (bytes, mime) = store.load(&key).await.unwrap();
        assert_eq!(bytes, jpeg_magic);
        assert_eq!(mime, "image/jpeg");
        store.delete(&key).await.unwrap();
        assert!(matches!(store.load(&key).await, Err(ImageStoreError::NotFound)));
        // deleting twice is fine
        store.delete(&key).await.unwrap();
    }
}
