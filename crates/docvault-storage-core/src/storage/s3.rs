//! S3-compatible client construction.

use object_store::aws::{AmazonS3, AmazonS3Builder};
use tracing::info;

use crate::{Error, Result};

/// Default endpoint used when the MinIO emulator is enabled.
pub const MINIO_ENDPOINT: &str = "http://localhost:9000";

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: Option<String>,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Key prefix for all operations
    pub prefix: Option<String>,
    /// Allow HTTP (insecure) connections
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: Some("us-east-1".to_string()),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            prefix: None,
            allow_http: false,
        }
    }
}

impl S3Config {
    /// Configuration pointing at a local MinIO instance.
    pub fn emulator(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: Some(MINIO_ENDPOINT.to_string()),
            access_key_id: Some("minioadmin".to_string()),
            secret_access_key: Some("minioadmin".to_string()),
            allow_http: true,
            ..Default::default()
        }
    }
}

/// Build an S3 client from configuration.
pub(crate) fn build_client(config: &S3Config) -> Result<AmazonS3> {
    let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }

    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
        // Custom endpoints (MinIO, Ceph) expect path-style requests
        builder = builder.with_virtual_hosted_style_request(false);
    }

    if let Some(access_key) = &config.access_key_id {
        builder = builder.with_access_key_id(access_key);
    }

    if let Some(secret_key) = &config.secret_access_key {
        builder = builder.with_secret_access_key(secret_key);
    }

    if config.allow_http {
        builder = builder.with_allow_http(true);
    }

    let store = builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create S3 client: {}", e)))?;

    info!(
        "Created S3 client for bucket: {}, prefix: {:?}, endpoint: {:?}",
        config.bucket, config.prefix, config.endpoint
    );

    Ok(store)
}
