use anyhow::Result;
use serde_json::json;

use super::{load_settings, print_structured, OutputFormat};

pub async fn run(config: Option<&str>, format: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let backends = settings.resolve_backends()?;

    match OutputFormat::from(format) {
        OutputFormat::Text => {
            println!(
                "{:<4} {:<8} {:<8} {:<9} ENDPOINT",
                "PRI", "ID", "KIND", "FALLBACK"
            );
            for backend in &backends {
                println!(
                    "{:<4} {:<8} {:<8} {:<9} {}",
                    backend.priority,
                    backend.id,
                    backend.kind(),
                    if backend.fallback_eligible { "yes" } else { "no" },
                    backend.connection.describe()
                );
            }
        }
        structured => {
            let rows: Vec<_> = backends
                .iter()
                .map(|backend| {
                    json!({
                        "id": backend.id,
                        "priority": backend.priority,
                        "kind": backend.kind(),
                        "fallback_eligible": backend.fallback_eligible,
                        "endpoint": backend.connection.describe(),
                        "retry_attempts": backend.retry.max_attempts,
                        "circuit_breaker_threshold": backend.circuit_breaker.failure_threshold,
                        "circuit_breaker_timeout_ms": backend.circuit_breaker.reset_timeout.as_millis() as u64,
                        "max_file_size": backend.limits.max_file_size,
                    })
                })
                .collect();
            print_structured(&rows, structured)?;
        }
    }

    Ok(())
}
