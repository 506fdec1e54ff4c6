use anyhow::{bail, Result};
use docvault_storage_core::HealthStatus;
use tracing::info;

use super::{open, print_structured, OutputFormat};

pub async fn run(config: Option<&str>, format: &str) -> Result<()> {
    let orchestrator = open(config, None).await?;

    info!("Probing {} backend(s)", orchestrator.backend_ids().len());
    let report = orchestrator.health_report().await;

    match OutputFormat::from(format) {
        OutputFormat::Text => {
            println!("Overall: {}", status_label(report.status));
            for backend in &report.backends {
                println!(
                    "  {:<8} {:<10} {:>6} ms  {}",
                    backend.backend,
                    status_label(backend.status),
                    backend.response_time_ms,
                    backend.message.as_deref().unwrap_or("")
                );
            }
        }
        structured => print_structured(&report, structured)?,
    }

    if report.status == HealthStatus::Unhealthy {
        bail!("No storage backend is usable");
    }
    Ok(())
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    }
}
