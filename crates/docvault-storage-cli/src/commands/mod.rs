pub mod backends;
pub mod files;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use docvault_storage_core::{PrometheusMetrics, StorageOrchestrator, StorageSettings};
use serde::Serialize;
use tracing::debug;

/// Output format for report-style commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "yaml" | "yml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }
}

/// Load settings from a YAML file, or from the environment when no file is given.
pub async fn load_settings(config: Option<&str>) -> Result<StorageSettings> {
    match config {
        Some(path) => {
            debug!("Loading settings from {}", path);
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path))?;
            Ok(StorageSettings::from_yaml_str(&contents)?)
        }
        None => Ok(StorageSettings::from_env()?),
    }
}

/// Build the orchestrator for one command invocation.
pub async fn open(
    config: Option<&str>,
    metrics: Option<Arc<PrometheusMetrics>>,
) -> Result<StorageOrchestrator> {
    let settings = load_settings(config).await?;
    Ok(settings.build_orchestrator(metrics)?)
}

/// Print a serializable value as JSON or YAML.
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
