use std::sync::Arc;

use anyhow::Result;
use docvault_storage_core::{PrometheusMetrics, StorageOperation};
use serde_json::json;

use super::open;

/// Probe every backend once, then print what the run recorded.
pub async fn run(config: Option<&str>, format: &str) -> Result<()> {
    let metrics = Arc::new(PrometheusMetrics::new());
    let orchestrator = open(config, Some(metrics.clone())).await?;
    orchestrator.health_report().await;

    match format.to_lowercase().as_str() {
        "json" => {
            let outcomes: Vec<_> = StorageOperation::ALL
                .iter()
                .flat_map(|op| orchestrator.recorded_outcomes(*op))
                .collect();
            let circuits: Vec<_> = orchestrator
                .circuit_states()
                .into_iter()
                .map(|(backend, state)| json!({ "backend": backend, "state": state.as_str() }))
                .collect();
            let dump = json!({
                "elapsed_ms": metrics.elapsed().as_millis() as u64,
                "circuits": circuits,
                "outcomes": outcomes,
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => print!("{}", metrics.encode()),
    }
    Ok(())
}
