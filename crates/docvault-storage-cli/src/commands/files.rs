use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use docvault_storage_core::{DownloadOptions, FileInfo, StorageStrategy, UploadOptions};
use serde_json::json;
use tracing::info;

use super::{format_bytes, open, print_structured, OutputFormat};

pub async fn upload(
    config: Option<&str>,
    file: &str,
    key: Option<&str>,
    mime_type: &str,
    checksum: bool,
    metadata: &[String],
) -> Result<()> {
    let orchestrator = open(config, None).await?;

    let key = match key {
        Some(key) => key.to_string(),
        None => Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Cannot derive a storage key from {}", file))?,
    };

    let mut options = UploadOptions::default();
    if checksum {
        options = options.with_checksum();
    }
    for entry in metadata {
        let (k, v) = parse_metadata(entry)?;
        options = options.with_metadata(k, v);
    }

    let content = Bytes::from(
        tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file))?,
    );
    info!("Uploading {} ({})", key, format_bytes(content.len() as u64));

    let payload = FileInfo::new(key, content, mime_type);
    let routed = orchestrator.upload_routed(&payload, &options).await?;
    println!("{}", routed.value);
    info!("Stored on backend {}", routed.backend);
    Ok(())
}

pub async fn download(
    config: Option<&str>,
    path: &str,
    output: Option<&str>,
    verify: bool,
) -> Result<()> {
    let orchestrator = open(config, None).await?;
    let options = if verify {
        DownloadOptions::verified()
    } else {
        DownloadOptions::default()
    };

    let routed = orchestrator.download_routed(path, &options).await?;
    info!(
        "Downloaded {} ({}) from backend {}",
        path,
        format_bytes(routed.value.len() as u64),
        routed.backend
    );

    match output {
        Some(output) => {
            tokio::fs::write(output, &routed.value)
                .await
                .with_context(|| format!("Failed to write {}", output))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&routed.value)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

pub async fn delete(config: Option<&str>, path: &str) -> Result<()> {
    let orchestrator = open(config, None).await?;
    orchestrator.delete(path).await?;
    println!("Deleted {}", path);
    Ok(())
}

pub async fn list(config: Option<&str>, prefix: Option<&str>, format: &str) -> Result<()> {
    let orchestrator = open(config, None).await?;
    let files = orchestrator.list_files(prefix).await?;

    match OutputFormat::from(format) {
        OutputFormat::Text => {
            if files.is_empty() {
                println!("No files found");
            }
            for file in &files {
                println!(
                    "{:>12}  {}  {}",
                    format_bytes(file.size),
                    file.last_modified.format("%Y-%m-%d %H:%M:%S"),
                    file.path
                );
            }
        }
        structured => {
            let rows: Vec<_> = files
                .iter()
                .map(|file| {
                    json!({
                        "name": file.name,
                        "path": file.path,
                        "size": file.size,
                        "mime_type": file.mime_type,
                        "last_modified": file.last_modified.to_rfc3339(),
                        "metadata": file.metadata,
                    })
                })
                .collect();
            print_structured(&rows, structured)?;
        }
    }
    Ok(())
}

pub async fn stats(config: Option<&str>, format: &str) -> Result<()> {
    let orchestrator = open(config, None).await?;
    let stats = orchestrator.get_storage_stats().await?;

    match OutputFormat::from(format) {
        OutputFormat::Text => {
            println!("Backend:        {}", stats.backend);
            println!("Files:          {}", stats.file_count);
            println!("Used:           {}", format_bytes(stats.used_bytes));
            println!("Average size:   {}", format_bytes(stats.average_file_size));
            println!("Largest file:   {}", format_bytes(stats.largest_file_size));
        }
        structured => print_structured(&stats, structured)?,
    }
    Ok(())
}

pub async fn url(config: Option<&str>, path: &str, expires_in: u64) -> Result<()> {
    let orchestrator = open(config, None).await?;
    let url = orchestrator
        .generate_download_url(path, Duration::from_secs(expires_in))
        .await?;
    println!("{}", url);
    Ok(())
}

fn parse_metadata(entry: &str) -> Result<(&str, &str)> {
    entry
        .split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| anyhow!("Invalid metadata '{}', expected KEY=VALUE", entry))
}
