//! Payload and key validation applied before any backend call.

use serde::{Deserialize, Serialize};

use super::types::FileInfo;
use crate::{Error, Result};

/// Default maximum payload size (100 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Upload restrictions shared by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Maximum payload size in bytes
    pub max_file_size: u64,
    /// Allowed MIME types; `*/*` allows everything and `type/*` a whole family
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: vec!["*/*".to_string()],
        }
    }
}

impl UploadLimits {
    /// Check whether a MIME type is accepted.
    pub fn allows_mime(&self, mime_type: &str) -> bool {
        let mime = mime_type.trim().to_ascii_lowercase();
        self.allowed_mime_types.iter().any(|allowed| {
            let allowed = allowed.trim().to_ascii_lowercase();
            if allowed == "*/*" || allowed == "*" {
                true
            } else if let Some(family) = allowed.strip_suffix("/*") {
                mime.split('/').next() == Some(family)
            } else {
                allowed == mime
            }
        })
    }

    /// Validate a payload for upload.
    pub fn validate(&self, file: &FileInfo) -> Result<()> {
        if file.name.trim().is_empty() {
            return Err(Error::validation("File name must not be empty"));
        }
        if file.content.is_empty() {
            return Err(Error::validation(format!(
                "File content must not be empty: {}",
                file.name
            )));
        }
        if file.size != file.content.len() as u64 {
            return Err(Error::validation(format!(
                "Declared size {} does not match content length {}",
                file.size,
                file.content.len()
            )));
        }
        if file.size > self.max_file_size {
            return Err(Error::validation(format!(
                "File size {} exceeds maximum allowed size {}",
                file.size, self.max_file_size
            )));
        }
        if !self.allows_mime(&file.mime_type) {
            return Err(Error::validation(format!(
                "MIME type '{}' is not allowed",
                file.mime_type
            )));
        }
        validate_key(file.key())
    }
}

/// Reject empty keys and keys that would escape the storage root.
pub fn validate_key(key: &str) -> Result<()> {
    let trimmed = key.trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::validation("Path must not be empty"));
    }
    if trimmed.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(Error::validation(format!(
            "Path must not contain relative segments: {}",
            key
        )));
    }
    Ok(())
}
