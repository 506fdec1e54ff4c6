//! Payload, directive and statistics types shared by every backend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Backend flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// AWS S3 or S3-compatible storage (MinIO, Ceph RGW, etc.)
    S3,
    /// Azure Blob Storage
    Azure,
    /// Local filesystem
    Local,
    /// In-memory object store (tests)
    Memory,
}

impl BackendKind {
    /// Locator scheme for paths returned by this backend.
    pub fn scheme(&self) -> &'static str {
        match self {
            BackendKind::S3 => "s3",
            BackendKind::Azure => "azure",
            BackendKind::Local => "local",
            BackendKind::Memory => "memory",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.scheme()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document payload (or its metadata, when listing).
///
/// `size` must equal `content.len()` whenever content is present. Listings and
/// `get_file_info` return descriptors with empty content.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Logical file name
    pub name: String,
    /// Storage key or backend-qualified locator
    pub path: String,
    /// Payload bytes (empty for metadata-only descriptors)
    pub content: Bytes,
    /// Declared MIME type
    pub mime_type: String,
    /// Declared size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Custom metadata reported by the backend
    pub metadata: HashMap<String, String>,
}

impl FileInfo {
    /// Build a payload for upload. The storage key defaults to the name.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let name = name.into();
        let content = content.into();
        Self {
            path: name.clone(),
            name,
            size: content.len() as u64,
            content,
            mime_type: mime_type.into(),
            last_modified: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Override the storage key.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Descriptor without content, as produced by listings.
    pub fn metadata_only(
        path: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            name,
            path,
            content: Bytes::new(),
            mime_type: mime_type.into(),
            size,
            last_modified,
            metadata: HashMap::new(),
        }
    }

    /// Storage key used for the upload.
    pub fn key(&self) -> &str {
        if self.path.is_empty() {
            &self.name
        } else {
            &self.path
        }
    }
}

/// Per-call upload directive.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Custom key/value metadata attached to the object
    pub metadata: HashMap<String, String>,
    /// Compute and attach a SHA-256 checksum
    pub checksum: bool,
}

impl UploadOptions {
    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Per-call download directive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Verify content against the backend-reported checksum, when present
    pub verify_checksum: bool,
}

impl DownloadOptions {
    pub fn verified() -> Self {
        Self {
            verify_checksum: true,
        }
    }
}

/// Aggregate usage figures, computed by enumerating every object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub backend: BackendKind,
    pub used_bytes: u64,
    pub file_count: u64,
    pub average_file_size: u64,
    pub largest_file_size: u64,
}

impl StorageStats {
    /// Fold a set of object sizes into stats.
    pub fn from_sizes(backend: BackendKind, sizes: impl IntoIterator<Item = u64>) -> Self {
        let mut used_bytes = 0u64;
        let mut file_count = 0u64;
        let mut largest_file_size = 0u64;
        for size in sizes {
            used_bytes += size;
            file_count += 1;
            largest_file_size = largest_file_size.max(size);
        }
        let average_file_size = if file_count == 0 {
            0
        } else {
            used_bytes / file_count
        };
        Self {
            backend,
            used_bytes,
            file_count,
            average_file_size,
            largest_file_size,
        }
    }
}
