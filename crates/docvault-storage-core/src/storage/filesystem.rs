//! Local filesystem storage strategy.
//!
//! Payloads live under a root directory, keyed by their relative path.
//! MIME type, custom metadata and checksums are kept in JSON sidecars under
//! `<root>/.meta/`. Writes go to a temporary file first and are renamed into
//! place, so readers never observe a partially written payload.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::checksum::{self, sha256_hex};
use super::types::{BackendKind, DownloadOptions, FileInfo, StorageStats, UploadOptions};
use super::validation::UploadLimits;
use super::{build_locator, probe_key, resolve_key, StorageStrategy, DIRECTORY_MARKER};
use crate::error::StorageError;
use crate::health::{self, StorageHealth};
use crate::{Error, Result};

/// Directory under the root holding metadata sidecars.
const META_DIR: &str = ".meta";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Sidecar persisted next to each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    mime_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    checksum: Option<String>,
    uploaded_at: DateTime<Utc>,
}

/// Filesystem-based storage strategy
#[derive(Debug, Clone)]
pub struct LocalStrategy {
    root: PathBuf,
    max_capacity: Option<u64>,
    limits: UploadLimits,
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage(StorageError::Backend(format!(
        "Failed to {} {}: {}",
        action,
        path.display(),
        e
    )))
}

fn not_found_or(key: &str, action: &str, path: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::not_found(key.to_string())
    } else {
        io_err(action, path, e)
    }
}

impl LocalStrategy {
    /// Create a new local strategy rooted at `root`
    pub fn new(root: PathBuf, max_capacity: Option<u64>, limits: UploadLimits) -> Self {
        info!(
            "Created local storage at {} (capacity: {:?})",
            root.display(),
            max_capacity
        );
        Self {
            root,
            max_capacity,
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<String> {
        let key = resolve_key(BackendKind::Local, None, path)?;
        if key == META_DIR || key.starts_with(&format!("{}/", META_DIR)) {
            return Err(Error::validation(format!("Reserved path: {}", key)));
        }
        Ok(key)
    }

    /// Convert a storage key to a filesystem path
    fn key_to_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    /// Convert a filesystem path to a storage key
    fn path_to_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create directories for", path, e))?;
        }
        Ok(())
    }

    /// Write to a temporary sibling, then rename into place.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        Self::ensure_parent(path).await?;

        let tmp = Self::temp_sibling(path);

        let write = async {
            let mut file = fs::File::create(&tmp)
                .await
                .map_err(|e| io_err("create file", &tmp, e))?;
            file.write_all(data)
                .await
                .map_err(|e| io_err("write to file", &tmp, e))?;
            file.sync_all()
                .await
                .map_err(|e| io_err("flush file", &tmp, e))?;
            fs::rename(&tmp, path)
                .await
                .map_err(|e| io_err("rename into", path, e))
        }
        .await;

        if write.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        write
    }

    /// Uniquely named hidden file next to `path`.
    fn temp_sibling(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }

    /// Copy `src` to a temp sibling of `dst`, then rename it into place.
    async fn copy_atomic(src: &Path, dst: &Path) -> std::io::Result<()> {
        let tmp = Self::temp_sibling(dst);
        let copy = async {
            fs::copy(src, &tmp).await?;
            fs::rename(&tmp, dst).await
        }
        .await;

        if copy.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        copy
    }

    async fn read_sidecar(&self, key: &str) -> Option<Sidecar> {
        let path = self.sidecar_path(key);
        let raw = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!("Ignoring unreadable metadata sidecar {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn remove_sidecar(&self, key: &str) {
        let path = self.sidecar_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove metadata sidecar {}: {}", path.display(), e);
            }
        }
    }

    fn is_internal(name: &str) -> bool {
        name == DIRECTORY_MARKER || (name.starts_with('.') && name.ends_with(".tmp"))
    }

    /// Walk the tree under `base`, returning `(key, metadata)` for every payload.
    async fn walk(&self, base: PathBuf) -> Result<Vec<(String, std::fs::Metadata)>> {
        let mut results = Vec::new();
        let meta_root = self.root.join(META_DIR);

        let base_meta = match fs::metadata(&base).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(io_err("read", &base, e)),
        };
        if base_meta.is_file() {
            if let Some(key) = self.path_to_key(&base) {
                results.push((key, base_meta));
            }
            return Ok(results);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| io_err("read directory", &dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_err("read directory entry in", &dir, e))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| io_err("stat", &path, e))?;
                if metadata.is_dir() {
                    if path != meta_root {
                        stack.push(path);
                    }
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if Self::is_internal(&name) {
                    continue;
                }
                if let Some(key) = self.path_to_key(&path) {
                    results.push((key, metadata));
                }
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn used_bytes(&self) -> Result<u64> {
        Ok(self
            .walk(self.root.clone())
            .await?
            .iter()
            .map(|(_, m)| m.len())
            .sum())
    }

    async fn check_capacity(&self, key: &str, incoming: u64) -> Result<()> {
        let Some(max) = self.max_capacity else {
            return Ok(());
        };
        let replaced = match fs::metadata(self.key_to_path(key)).await {
            Ok(m) if m.is_file() => m.len(),
            _ => 0,
        };
        let used = self.used_bytes().await?;
        let projected = used.saturating_sub(replaced) + incoming;
        if projected > max {
            return Err(Error::validation(format!(
                "Local storage capacity exceeded: {} of {} bytes used, upload needs {}",
                used, max, incoming
            )));
        }
        Ok(())
    }

    async fn describe(&self, key: &str, metadata: &std::fs::Metadata) -> FileInfo {
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let sidecar = self.read_sidecar(key).await;
        let mime_type = sidecar
            .as_ref()
            .map(|s| s.mime_type.clone())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let mut info = FileInfo::metadata_only(key, metadata.len(), mime_type, last_modified);
        if let Some(sidecar) = sidecar {
            info.metadata = sidecar.metadata;
            if let Some(checksum) = sidecar.checksum {
                info.metadata
                    .insert(checksum::CHECKSUM_METADATA_KEY.to_string(), checksum);
            }
        }
        info
    }

    async fn copy_sidecar(&self, src: &str, dst: &str) {
        let from = self.sidecar_path(src);
        let to = self.sidecar_path(dst);
        match fs::metadata(&from).await {
            Ok(_) => {
                if let Err(e) = Self::ensure_parent(&to).await {
                    warn!("Failed to copy metadata sidecar for {}: {}", dst, e);
                    return;
                }
                if let Err(e) = fs::copy(&from, &to).await {
                    warn!("Failed to copy metadata sidecar for {}: {}", dst, e);
                }
            }
            Err(_) => self.remove_sidecar(dst).await,
        }
    }

    async fn run_probe(&self) -> Result<()> {
        let key = probe_key();
        let path = self.key_to_path(&key);
        let payload = format!("health-check {}", Utc::now().to_rfc3339());

        Self::write_atomic(&path, payload.as_bytes()).await?;
        let read = fs::read(&path)
            .await
            .map_err(|e| io_err("read", &path, e));
        let cleanup = fs::remove_file(&path)
            .await
            .map_err(|e| io_err("delete file", &path, e));

        if read? != payload.as_bytes() {
            return Err(Error::Storage(StorageError::Integrity(format!(
                "probe content mismatch at {}",
                path.display()
            ))));
        }
        cleanup
    }
}

#[async_trait]
impl StorageStrategy for LocalStrategy {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String> {
        self.limits.validate(file)?;
        let key = self.resolve(file.key())?;
        self.check_capacity(&key, file.size).await?;

        let path = self.key_to_path(&key);
        debug!("Local PUT: {} ({} bytes)", path.display(), file.size);
        Self::write_atomic(&path, &file.content).await?;

        let mut metadata = file.metadata.clone();
        metadata.extend(options.metadata.clone());
        let sidecar = Sidecar {
            mime_type: file.mime_type.clone(),
            metadata,
            checksum: options.checksum.then(|| sha256_hex(&file.content)),
            uploaded_at: Utc::now(),
        };
        Self::write_atomic(&self.sidecar_path(&key), &serde_json::to_vec_pretty(&sidecar)?).await?;

        Ok(build_locator(BackendKind::Local, None, &key))
    }

    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes> {
        let key = self.resolve(path)?;
        let file_path = self.key_to_path(&key);
        debug!("Local GET: {}", file_path.display());

        let data = fs::read(&file_path)
            .await
            .map_err(|e| not_found_or(&key, "read file", &file_path, e))?;

        if options.verify_checksum {
            if let Some(expected) = self.read_sidecar(&key).await.and_then(|s| s.checksum) {
                checksum::verify(&key, &expected, &data)?;
            }
        }

        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let file_path = self.key_to_path(&key);
        debug!("Local DELETE: {}", file_path.display());

        fs::remove_file(&file_path)
            .await
            .map_err(|e| not_found_or(&key, "delete file", &file_path, e))?;
        self.remove_sidecar(&key).await;
        Ok(true)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let file_path = self.key_to_path(&key);
        match fs::metadata(&file_path).await {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("stat", &file_path, e)),
        }
    }

    async fn get_health(&self) -> Result<StorageHealth> {
        let mut details = HashMap::new();
        details.insert("root".to_string(), self.root.display().to_string());
        if let Some(max) = self.max_capacity {
            details.insert("max_capacity".to_string(), max.to_string());
        }
        Ok(health::probe("local", BackendKind::Local, details, || self.run_probe()).await)
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        let base = match prefix.map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => self.key_to_path(&self.resolve(p)?),
            _ => self.root.clone(),
        };
        debug!("Local LIST: {}", base.display());

        let mut files = Vec::new();
        for (key, metadata) in self.walk(base).await? {
            files.push(self.describe(&key, &metadata).await);
        }
        Ok(files)
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool> {
        let src_key = self.resolve(src)?;
        let dst_key = self.resolve(dst)?;
        let src_path = self.key_to_path(&src_key);
        let dst_path = self.key_to_path(&dst_key);
        debug!("Local COPY: {} -> {}", src_path.display(), dst_path.display());

        let size = fs::metadata(&src_path)
            .await
            .map_err(|e| not_found_or(&src_key, "stat", &src_path, e))?
            .len();
        self.check_capacity(&dst_key, size).await?;

        Self::ensure_parent(&dst_path).await?;
        Self::copy_atomic(&src_path, &dst_path)
            .await
            .map_err(|e| not_found_or(&src_key, "copy", &src_path, e))?;
        self.copy_sidecar(&src_key, &dst_key).await;
        Ok(true)
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<bool> {
        let src_key = self.resolve(src)?;
        let dst_key = self.resolve(dst)?;
        let src_path = self.key_to_path(&src_key);
        let dst_path = self.key_to_path(&dst_key);

        fs::metadata(&src_path)
            .await
            .map_err(|e| not_found_or(&src_key, "stat", &src_path, e))?;
        Self::ensure_parent(&dst_path).await?;

        if fs::rename(&src_path, &dst_path).await.is_ok() {
            self.copy_sidecar(&src_key, &dst_key).await;
            self.remove_sidecar(&src_key).await;
            debug!("Local MOVE: {} -> {}", src_path.display(), dst_path.display());
            return Ok(true);
        }

        self.copy_file(&src_key, &dst_key).await?;
        match self.delete(&src_key).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(
                    "Local move {} -> {}: copied but source cleanup failed: {}",
                    src_key, dst_key, e
                );
                Ok(false)
            }
        }
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let key = self.resolve(path)?;
        let file_path = self.key_to_path(&key);
        let metadata = fs::metadata(&file_path)
            .await
            .map_err(|e| not_found_or(&key, "stat", &file_path, e))?;
        if !metadata.is_file() {
            return Err(Error::not_found(key));
        }
        let mut info = self.describe(&key, &metadata).await;
        info.path = build_locator(BackendKind::Local, None, &key);
        Ok(info)
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        let entries = self.walk(self.root.clone()).await?;
        Ok(StorageStats::from_sizes(
            BackendKind::Local,
            entries.iter().map(|(_, m)| m.len()),
        ))
    }

    async fn create_directory(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let marker = self
            .key_to_path(key.trim_end_matches('/'))
            .join(DIRECTORY_MARKER);
        match fs::metadata(&marker).await {
            Ok(_) => {
                return Err(Error::validation(format!(
                    "Directory already exists: {}",
                    key
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("stat", &marker, e)),
        }

        Self::write_atomic(&marker, b"").await?;
        debug!("Local created directory marker {}", marker.display());
        Ok(true)
    }

    async fn generate_download_url(&self, _path: &str, _expiry: Duration) -> Result<String> {
        Err(Error::Storage(StorageError::Unsupported(
            "Local backend cannot generate download URLs".to_string(),
        )))
    }
}
