//! # Output Storage
//!
//! Where finished daily files go. Local paths are written through tokio's file
//! API; `s3://bucket/key` destinations are uploaded with the AWS SDK.
//!
//! ```rust,no_run
//! use conus404_wind::storage::{StorageBackend, StorageFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dest = "s3://climate-archive/conus404/1979/ny_wind_10m_1979-10-01.nc";
//!     let storage = StorageFactory::from_path(dest).await?;
//!     storage.publish_file(std::path::Path::new("/tmp/day.nc"), dest).await?;
//!     Ok(())
//! }
//! ```

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use log::debug;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS S3 PutObject error: {0}")]
    S3PutObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>),

    #[error("Invalid S3 path format: {0}")]
    InvalidS3Path(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination of daily output files.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Writes `data`, replacing any previous object at `path`
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Copies a finished local file to `dest`
    async fn publish_file(&self, local: &Path, dest: &str) -> StorageResult<()> {
        let data = fs::read(local).await?;
        debug!("Publishing {} ({} bytes) to {}", local.display(), data.len(), dest);
        self.write(dest, &data).await
    }
}

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage;

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::write(path, data).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(StorageError::PermissionDenied(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Bucket and key of an `s3://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(uri: &str) -> StorageResult<Self> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| {
            StorageError::InvalidS3Path(format!("S3 path must start with 's3://': {}", uri))
        })?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(S3Location {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(StorageError::InvalidS3Path(format!(
                "Expected 's3://bucket/key': {}",
                uri
            ))),
        }
    }
}

/// Amazon S3 storage backend.
///
/// Credentials come from the standard AWS chain (environment, profile files,
/// instance roles).
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    pub async fn new() -> StorageResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(S3Storage {
            client: S3Client::new(&config),
        })
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Storage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let location = S3Location::parse(path)?;

        self.client
            .put_object()
            .bucket(location.bucket)
            .key(location.key)
            .content_type("application/x-netcdf")
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await?;

        Ok(())
    }
}

#[derive(Debug)]
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage),
}

#[async_trait::async_trait]
impl StorageBackend for Storage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        match self {
            Storage::Local(storage) => storage.write(path, data).await,
            Storage::S3(storage) => storage.write(path, data).await,
        }
    }
}

/// Picks the backend from the destination: `s3://` is S3, anything else is
/// the local filesystem.
pub struct StorageFactory;

impl StorageFactory {
    pub async fn from_path(path: &str) -> StorageResult<Storage> {
        if Self::is_s3_path(path) {
            Ok(Storage::S3(S3Storage::new().await?))
        } else {
            Ok(Storage::Local(LocalStorage))
        }
    }

    pub fn is_s3_path(path: &str) -> bool {
        path.starts_with("s3://")
    }
}
