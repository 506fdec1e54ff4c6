//! Storage strategy abstraction and implementations.
//!
//! Every backend implements the same [`StorageStrategy`] contract:
//!
//! - **S3**: AWS S3 and S3-compatible services (MinIO, Ceph RGW, etc.)
//! - **Azure**: Azure Blob Storage (and Azurite)
//! - **Local**: local filesystem rooted at a directory
//!
//! The cloud flavors share one adapter over `object_store`
//! ([`ObjectStoreStrategy`]); they differ only in how the client is built.

mod azure;
mod checksum;
mod config;
mod filesystem;
mod object_store_backend;
mod s3;
mod types;
mod validation;

pub use azure::{AzureConfig, AZURITE_ACCOUNT, AZURITE_KEY};
pub use checksum::{sha256_hex, CHECKSUM_METADATA_KEY};
pub use config::{BackendConfig, ConnectionParams};
pub use filesystem::LocalStrategy;
pub use object_store_backend::ObjectStoreStrategy;
pub use s3::{S3Config, MINIO_ENDPOINT};
pub use types::{BackendKind, DownloadOptions, FileInfo, StorageStats, UploadOptions};
pub use validation::{validate_key, UploadLimits, DEFAULT_MAX_FILE_SIZE};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::health::StorageHealth;
use crate::{Error, Result};

/// Payloads above this size use multipart upload (5 MB).
pub const CHUNK_THRESHOLD: usize = 5 * 1024 * 1024;

/// Size of each multipart part (5 MB).
pub const PART_SIZE: usize = 5 * 1024 * 1024;

/// Key prefix used by synthetic health probes.
pub const HEALTH_PROBE_PREFIX: &str = "health-check";

/// Marker object name used by `create_directory`.
pub const DIRECTORY_MARKER: &str = ".keep";

/// Uniform contract implemented by every storage backend.
///
/// Path arguments accept either a bare key or the backend's own locator
/// (`s3://bucket/key`, `azure://container/key`, `local://key`). A locator
/// owned by another backend is reported as not found.
#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Backend flavor
    fn kind(&self) -> BackendKind;

    /// Validate and store a payload, returning its backend-qualified locator
    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String>;

    /// Read a payload
    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes>;

    /// Delete a payload; fails with not found if it does not exist
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Check whether a payload exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Run a synthetic upload, download and delete probe
    async fn get_health(&self) -> Result<StorageHealth>;

    /// List payload descriptors (without content) under an optional prefix
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>>;

    /// Copy a payload within this backend
    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool>;

    /// Copy then delete the source. `Ok(false)` means copied, cleanup pending.
    async fn move_file(&self, src: &str, dst: &str) -> Result<bool>;

    /// Metadata for a single payload
    async fn get_file_info(&self, path: &str) -> Result<FileInfo>;

    /// Aggregate usage figures (enumerates every object)
    async fn get_storage_stats(&self) -> Result<StorageStats>;

    /// Create a logical directory marker
    async fn create_directory(&self, path: &str) -> Result<bool>;

    /// Pre-authorized, time-limited download URL
    async fn generate_download_url(&self, path: &str, expiry: Duration) -> Result<String>;
}

/// Create the adapter for a backend configuration.
pub fn create_strategy(config: &BackendConfig) -> Result<Arc<dyn StorageStrategy>> {
    match &config.connection {
        ConnectionParams::S3(s3_config) => Ok(Arc::new(ObjectStoreStrategy::s3(
            s3_config.clone(),
            config.limits.clone(),
        )?)),
        ConnectionParams::Azure(azure_config) => Ok(Arc::new(ObjectStoreStrategy::azure(
            azure_config.clone(),
            config.limits.clone(),
        )?)),
        ConnectionParams::Local { root, max_capacity } => Ok(Arc::new(LocalStrategy::new(
            root.clone(),
            *max_capacity,
            config.limits.clone(),
        ))),
        ConnectionParams::Memory => Ok(Arc::new(ObjectStoreStrategy::in_memory(
            config.limits.clone(),
        ))),
    }
}

/// Build a locator such as `s3://bucket/key` or `local://key`.
pub(crate) fn build_locator(kind: BackendKind, container: Option<&str>, key: &str) -> String {
    match container {
        Some(container) => format!("{}://{}/{}", kind.scheme(), container, key),
        None => format!("{}://{}", kind.scheme(), key),
    }
}

/// Resolve a path argument to a bare key for this backend.
pub(crate) fn resolve_key(kind: BackendKind, container: Option<&str>, path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(Error::validation("Path must not be empty"));
    }

    let key = match path.split_once("://") {
        Some((scheme, rest)) => {
            if scheme != kind.scheme() {
                return Err(Error::not_found(format!(
                    "{} (locator belongs to another backend)",
                    path
                )));
            }
            match container {
                Some(container) => rest
                    .strip_prefix(container)
                    .and_then(|r| r.strip_prefix('/'))
                    .ok_or_else(|| Error::not_found(path.to_string()))?,
                None => rest,
            }
        }
        None => path,
    };

    let key = key.trim_start_matches('/');
    validate_key(key)?;
    Ok(key.to_string())
}

/// Unique key for a health probe object.
pub(crate) fn probe_key() -> String {
    format!(
        "{}/probe-{}-{}.txt",
        HEALTH_PROBE_PREFIX,
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4()
    )
}
