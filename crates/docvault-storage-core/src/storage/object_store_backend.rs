//! Cloud storage adapter built on `object_store`.
//!
//! S3 and Azure Blob Storage share this adapter. Payloads above
//! [`CHUNK_THRESHOLD`] go through the multipart API in [`PART_SIZE`] parts;
//! a failed part aborts the whole upload so no partial object is left behind.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, MultipartUpload, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::azure::{self, AzureConfig};
use super::checksum::{self, sha256_hex, CHECKSUM_METADATA_KEY};
use super::s3::{self, S3Config};
use super::types::{BackendKind, DownloadOptions, FileInfo, StorageStats, UploadOptions};
use super::validation::UploadLimits;
use super::{
    build_locator, probe_key, resolve_key, StorageStrategy, CHUNK_THRESHOLD, DIRECTORY_MARKER,
    PART_SIZE,
};
use crate::error::StorageError;
use crate::health::{self, StorageHealth};
use crate::{Error, Result};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Storage strategy over any `object_store` client.
pub struct ObjectStoreStrategy {
    kind: BackendKind,
    container: Option<String>,
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    prefix: Option<String>,
    endpoint: Option<String>,
    limits: UploadLimits,
}

impl ObjectStoreStrategy {
    /// Assemble an adapter from its parts.
    pub fn new(
        kind: BackendKind,
        container: Option<String>,
        store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            kind,
            container,
            store,
            signer,
            prefix: None,
            endpoint: None,
            limits,
        }
    }

    /// S3 or S3-compatible backend.
    pub fn s3(config: S3Config, limits: UploadLimits) -> Result<Self> {
        let client = Arc::new(s3::build_client(&config)?);
        let mut strategy = Self::new(
            BackendKind::S3,
            Some(config.bucket.clone()),
            client.clone(),
            Some(client),
            limits,
        );
        strategy.prefix = config.prefix;
        strategy.endpoint = config.endpoint;
        Ok(strategy)
    }

    /// Azure Blob Storage backend.
    pub fn azure(config: AzureConfig, limits: UploadLimits) -> Result<Self> {
        let client = Arc::new(azure::build_client(&config)?);
        let mut strategy = Self::new(
            BackendKind::Azure,
            Some(config.container_name.clone()),
            client.clone(),
            Some(client),
            limits,
        );
        strategy.prefix = config.prefix;
        strategy.endpoint = config.endpoint;
        Ok(strategy)
    }

    /// In-memory backend (for testing).
    pub fn in_memory(limits: UploadLimits) -> Self {
        Self::new(
            BackendKind::Memory,
            None,
            Arc::new(InMemory::new()),
            None,
            limits,
        )
    }

    /// Scope every key under a prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = if prefix.trim_matches('/').is_empty() {
            None
        } else {
            Some(prefix)
        };
        self
    }

    fn label(&self) -> &'static str {
        match self.kind {
            BackendKind::S3 => "S3",
            BackendKind::Azure => "Azure",
            BackendKind::Local => "Local",
            BackendKind::Memory => "Memory",
        }
    }

    /// Build the full path for a key
    fn full_path(&self, key: &str) -> Path {
        match &self.prefix {
            Some(prefix) => Path::from(format!("{}/{}", prefix.trim_matches('/'), key)),
            None => Path::from(key),
        }
    }

    /// Remove the configured prefix from a listed location
    fn strip_prefix(&self, location: &Path) -> String {
        let key = location.to_string();
        match &self.prefix {
            Some(p) => key
                .strip_prefix(&format!("{}/", p.trim_matches('/')))
                .unwrap_or(&key)
                .to_string(),
            None => key,
        }
    }

    fn resolve(&self, path: &str) -> Result<String> {
        resolve_key(self.kind, self.container.as_deref(), path)
    }

    fn locator(&self, key: &str) -> String {
        build_locator(self.kind, self.container.as_deref(), key)
    }

    /// Tag backend failures with the operation while keeping their classification.
    fn op_err(&self, op: &str, err: object_store::Error) -> Error {
        match Error::from(err) {
            Error::Storage(StorageError::Backend(msg)) => Error::Storage(StorageError::Backend(
                format!("{} {} failed: {}", self.label(), op, msg),
            )),
            other => other,
        }
    }

    fn build_attributes(
        &self,
        file: &FileInfo,
        options: &UploadOptions,
        checksum: Option<&str>,
    ) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(file.mime_type.clone()),
        );
        for (key, value) in file.metadata.iter().chain(options.metadata.iter()) {
            attributes.insert(
                Attribute::Metadata(Cow::Owned(key.clone())),
                AttributeValue::from(value.clone()),
            );
        }
        if let Some(checksum) = checksum {
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(CHECKSUM_METADATA_KEY)),
                AttributeValue::from(checksum.to_string()),
            );
        }
        attributes
    }

    /// Upload in ordered parts through one multipart session.
    ///
    /// Attributes travel with the session and are applied on completion.
    async fn upload_chunked(&self, path: &Path, content: Bytes, attributes: Attributes) -> Result<()> {
        let opts = PutMultipartOpts {
            attributes,
            ..Default::default()
        };
        let mut upload = self
            .store
            .put_multipart_opts(path, opts)
            .await
            .map_err(|e| self.op_err("CREATE MULTIPART", e))?;

        let total = content.len().div_ceil(PART_SIZE);
        let mut part = 0usize;
        let mut offset = 0usize;
        while offset < content.len() {
            let end = (offset + PART_SIZE).min(content.len());
            part += 1;
            debug!(
                "{} PUT PART {}/{} for {} ({} bytes)",
                self.label(),
                part,
                total,
                path,
                end - offset
            );

            let payload = PutPayload::from_bytes(content.slice(offset..end));
            if let Err(e) = upload.put_part(payload).await {
                self.abort_upload(path, upload.as_mut()).await;
                return Err(self.op_err("PUT PART", e));
            }
            offset = end;
        }

        if let Err(e) = upload.complete().await {
            self.abort_upload(path, upload.as_mut()).await;
            return Err(self.op_err("COMPLETE MULTIPART", e));
        }

        Ok(())
    }

    async fn abort_upload(&self, path: &Path, upload: &mut dyn MultipartUpload) {
        if let Err(e) = upload.abort().await {
            warn!("{} failed to abort multipart upload {}: {}", self.label(), path, e);
        }
    }

    /// Head request that also returns stored attributes.
    async fn head_with_attributes(
        &self,
        path: &Path,
    ) -> Result<(object_store::ObjectMeta, Attributes)> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(path, options)
            .await
            .map_err(|e| self.op_err("HEAD", e))?;
        Ok((result.meta.clone(), result.attributes.clone()))
    }

    fn describe_object(
        &self,
        key: &str,
        meta: &object_store::ObjectMeta,
        attributes: &Attributes,
    ) -> FileInfo {
        let mut mime_type = DEFAULT_MIME_TYPE.to_string();
        let mut metadata = HashMap::new();
        for (attribute, value) in attributes.iter() {
            let value: &str = value.as_ref();
            match attribute {
                Attribute::ContentType => mime_type = value.to_string(),
                Attribute::Metadata(name) => {
                    metadata.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }
        if let Some(e_tag) = &meta.e_tag {
            metadata.insert("etag".to_string(), e_tag.clone());
        }

        let mut info = FileInfo::metadata_only(key, meta.size as u64, mime_type, meta.last_modified);
        info.metadata = metadata;
        info
    }

    fn is_marker(key: &str) -> bool {
        key.rsplit('/').next() == Some(DIRECTORY_MARKER)
    }

    async fn list_metas(&self, prefix: Option<&str>) -> Result<Vec<object_store::ObjectMeta>> {
        let list_prefix = match prefix.map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => Some(self.full_path(p)),
            _ => self.prefix.as_deref().map(|p| Path::from(p.trim_matches('/'))),
        };
        debug!("{} LIST: {:?}", self.label(), list_prefix);

        let mut metas = Vec::new();
        let mut stream = self.store.list(list_prefix.as_ref());
        while let Some(result) = stream.next().await {
            let meta = result.map_err(|e| self.op_err("LIST", e))?;
            if Self::is_marker(meta.location.as_ref()) {
                continue;
            }
            metas.push(meta);
        }
        Ok(metas)
    }

    fn health_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();
        if let Some(container) = &self.container {
            details.insert("container".to_string(), container.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            details.insert("endpoint".to_string(), endpoint.clone());
        }
        if let Some(prefix) = &self.prefix {
            details.insert("prefix".to_string(), prefix.clone());
        }
        details
    }

    async fn run_probe(&self) -> Result<()> {
        let path = self.full_path(&probe_key());
        let payload = Bytes::from(format!("health-check {}", chrono::Utc::now().to_rfc3339()));

        self.store
            .put(&path, PutPayload::from_bytes(payload.clone()))
            .await
            .map_err(|e| self.op_err("PROBE PUT", e))?;

        let read = async {
            let result = self
                .store
                .get(&path)
                .await
                .map_err(|e| self.op_err("PROBE GET", e))?;
            result.bytes().await.map_err(|e| self.op_err("PROBE READ", e))
        }
        .await;

        let cleanup = self
            .store
            .delete(&path)
            .await
            .map_err(|e| self.op_err("PROBE DELETE", e));

        let read = read?;
        if read != payload {
            return Err(Error::Storage(StorageError::Integrity(format!(
                "probe content mismatch at {}",
                path
            ))));
        }
        cleanup
    }
}

#[async_trait]
impl StorageStrategy for ObjectStoreStrategy {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn upload(&self, file: &FileInfo, options: &UploadOptions) -> Result<String> {
        self.limits.validate(file)?;
        let key = self.resolve(file.key())?;
        let path = self.full_path(&key);
        let checksum = options.checksum.then(|| sha256_hex(&file.content));
        let attributes = self.build_attributes(file, options, checksum.as_deref());

        if file.content.len() > CHUNK_THRESHOLD {
            info!(
                "{} chunked upload: {} ({} bytes)",
                self.label(),
                path,
                file.size
            );
            self.upload_chunked(&path, file.content.clone(), attributes)
                .await?;
        } else {
            debug!("{} PUT: {} ({} bytes)", self.label(), path, file.size);
            let options = PutOptions {
                attributes,
                ..Default::default()
            };
            self.store
                .put_opts(&path, PutPayload::from_bytes(file.content.clone()), options)
                .await
                .map_err(|e| self.op_err("PUT", e))?;
        }

        Ok(self.locator(&key))
    }

    async fn download(&self, path: &str, options: &DownloadOptions) -> Result<Bytes> {
        let key = self.resolve(path)?;
        let full = self.full_path(&key);
        debug!("{} GET: {}", self.label(), full);

        let result = self
            .store
            .get(&full)
            .await
            .map_err(|e| self.op_err("GET", e))?;
        let attributes = result.attributes.clone();
        let bytes = result
            .bytes()
            .await
            .map_err(|e| self.op_err("READ", e))?;

        if options.verify_checksum {
            if let Some(expected) =
                attributes.get(&Attribute::Metadata(Cow::Borrowed(CHECKSUM_METADATA_KEY)))
            {
                checksum::verify(&key, expected.as_ref(), &bytes)?;
            }
        }

        Ok(bytes)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let full = self.full_path(&key);
        debug!("{} DELETE: {}", self.label(), full);

        self.store
            .head(&full)
            .await
            .map_err(|e| self.op_err("HEAD", e))?;
        self.store
            .delete(&full)
            .await
            .map_err(|e| self.op_err("DELETE", e))?;
        Ok(true)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let full = self.full_path(&key);
        debug!("{} HEAD: {}", self.label(), full);

        match self.store.head(&full).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.op_err("HEAD", e)),
        }
    }

    async fn get_health(&self) -> Result<StorageHealth> {
        Ok(health::probe(self.kind.as_str(), self.kind, self.health_details(), || {
            self.run_probe()
        })
        .await)
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        let metas = self.list_metas(prefix).await?;
        let mut files = Vec::with_capacity(metas.len());
        for meta in metas {
            let key = self.strip_prefix(&meta.location);
            let (_, attributes) = self.head_with_attributes(&meta.location).await?;
            files.push(self.describe_object(&key, &meta, &attributes));
        }
        Ok(files)
    }

    async fn copy_file(&self, src: &str, dst: &str) -> Result<bool> {
        let src_key = self.resolve(src)?;
        let dst_key = self.resolve(dst)?;
        let src_path = self.full_path(&src_key);
        let dst_path = self.full_path(&dst_key);
        debug!("{} COPY: {} -> {}", self.label(), src_path, dst_path);

        self.store
            .copy(&src_path, &dst_path)
            .await
            .map_err(|e| self.op_err("COPY", e))?;
        Ok(true)
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<bool> {
        self.copy_file(src, dst).await?;
        match self.delete(src).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(
                    "{} move {} -> {}: copied but source cleanup failed: {}",
                    self.label(),
                    src,
                    dst,
                    e
                );
                Ok(false)
            }
        }
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        let key = self.resolve(path)?;
        let full = self.full_path(&key);
        let (meta, attributes) = self.head_with_attributes(&full).await?;
        let mut info = self.describe_object(&key, &meta, &attributes);
        info.path = self.locator(&key);
        Ok(info)
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        let metas = self.list_metas(None).await?;
        Ok(StorageStats::from_sizes(
            self.kind,
            metas.iter().map(|m| m.size as u64),
        ))
    }

    async fn create_directory(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        let marker = format!("{}/{}", key.trim_end_matches('/'), DIRECTORY_MARKER);
        let full = self.full_path(&marker);

        match self.store.head(&full).await {
            Ok(_) => {
                return Err(Error::validation(format!(
                    "Directory already exists: {}",
                    key
                )))
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(self.op_err("HEAD", e)),
        }

        self.store
            .put(&full, PutPayload::from_static(b""))
            .await
            .map_err(|e| self.op_err("PUT", e))?;
        debug!("{} created directory marker {}", self.label(), full);
        Ok(true)
    }

    async fn generate_download_url(&self, path: &str, expiry: Duration) -> Result<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            Error::Storage(StorageError::Unsupported(format!(
                "{} backend cannot generate download URLs",
                self.label()
            )))
        })?;

        let key = self.resolve(path)?;
        let full = self.full_path(&key);
        self.store
            .head(&full)
            .await
            .map_err(|e| self.op_err("HEAD", e))?;

        let url = signer
            .signed_url(http::Method::GET, &full, expiry)
            .await
            .map_err(|e| self.op_err("SIGN", e))?;
        Ok(url.to_string())
    }
}
