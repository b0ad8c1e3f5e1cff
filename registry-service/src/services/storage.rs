use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use registry_core::error::AppError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

use crate::config::{StorageBackend, StorageConfig};

pub const ZIP_CONTENT_TYPE: &str = "application/zip";

const ZIP_LOCAL_FILE_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("unexpected content type for {key}: {content_type}")]
    UnexpectedContentType { key: String, content_type: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::StorageError(anyhow::Error::new(err))
    }
}

/// Fetches packaged module archives by their opaque source locator.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn fetch_module_source(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    fn backing_store_name(&self) -> &str;
}

pub async fn build_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>, AppError> {
    match config.backend {
        StorageBackend::Filesystem => {
            tracing::info!(path = %config.local_path, "Using filesystem module storage");
            Ok(Arc::new(FilesystemStorage::new(&config.local_path)))
        }
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.clone().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("storage.s3_bucket is not set"))
            })?;
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = &config.s3_region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            let sdk_config = loader.load().await;
            tracing::info!(bucket = %bucket, "Using S3 module storage");
            Ok(Arc::new(S3Storage::new(S3Client::new(&sdk_config), bucket)))
        }
    }
}

fn looks_like_zip(data: &[u8]) -> bool {
    data.starts_with(ZIP_LOCAL_FILE_HEADER) || data.starts_with(ZIP_EMPTY_ARCHIVE)
}

/// Archives stored under a local directory; keys are paths relative to it.
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Joins `key` under the base path. Keys that are absolute or climb out
    /// of the base path resolve to nothing.
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.base_path.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FilesystemStorage {
    async fn fetch_module_source(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self
            .resolve(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })?;

        if !looks_like_zip(&data) {
            return Err(StorageError::UnexpectedContentType {
                key: key.to_string(),
                content_type: "application/octet-stream".to_string(),
            });
        }

        tracing::debug!(key = %key, bytes = data.len(), "Fetched module archive from filesystem");
        Ok(data)
    }

    fn backing_store_name(&self) -> &str {
        "filesystem"
    }
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn fetch_module_source(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(anyhow::anyhow!("S3 download failed: {}", e))
                }
            })?;

        let content_type = output.content_type().unwrap_or_default().to_string();
        if content_type != ZIP_CONTENT_TYPE {
            return Err(StorageError::UnexpectedContentType {
                key: key.to_string(),
                content_type,
            });
        }

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(anyhow::anyhow!("S3 body collection failed: {}", e)))?
            .into_bytes()
            .to_vec();

        tracing::debug!(bucket = %self.bucket, key = %key, bytes = data.len(), "Fetched module archive from S3");
        Ok(data)
    }

    fn backing_store_name(&self) -> &str {
        &self.bucket
    }
}
