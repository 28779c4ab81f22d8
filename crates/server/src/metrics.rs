//! Prometheus metrics for the service process.
//!
//! Core component metrics are registered alongside gauges refreshed by the
//! health check (download client reachability, remaining rate budget per
//! release source).

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use harvester_core::{QueueSnapshot, SearchRouter};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Process start time as a unix timestamp.
pub static START_TIME: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvester_start_time_seconds",
        "Unix time the service started",
    )
    .unwrap()
});

/// Whether a download client answered the last poll (1) or not (0).
pub static CLIENT_UP: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "harvester_download_client_up",
            "Whether the download client answered the last poll",
        ),
        &["client"],
    )
    .unwrap()
});

/// Requests left in the current rate window.
pub static SOURCE_BUDGET_REMAINING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "harvester_source_budget_remaining",
            "Requests left in the current rate limit window",
        ),
        &["source"],
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    let local: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(START_TIME.clone()),
        Box::new(CLIENT_UP.clone()),
        Box::new(SOURCE_BUDGET_REMAINING.clone()),
    ];

    for metric in local.into_iter().chain(harvester_core::metrics::all_metrics()) {
        if let Err(e) = registry.register(metric) {
            warn!(error = %e, "Failed to register metric");
        }
    }
}

/// Refresh the health gauges from the latest queue snapshot and the
/// router's rate windows.
pub fn collect_health(router: &SearchRouter, clients: &[String], snapshot: Option<&QueueSnapshot>) {
    for client in clients {
        let up = snapshot.map(|s| s.is_reachable(client)).unwrap_or(false);
        CLIENT_UP.with_label_values(&[client.as_str()]).set(i64::from(up));
    }

    for source in router.source_names() {
        let status = router.rate_status(&source);
        SOURCE_BUDGET_REMAINING
            .with_label_values(&[source.as_str()])
            .set(i64::from(status.remaining));
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output was not UTF-8")
}

/// Write the text exposition for a node exporter textfile collector.
///
/// Writes to a sibling temp file and renames it so the collector never
/// reads a partial file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let text = encode_metrics()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move metrics to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_core_metrics() {
        START_TIME.set(1_700_000_000);
        harvester_core::metrics::SEARCHES_TOTAL
            .with_label_values(&["direct"])
            .inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("harvester_start_time_seconds"));
        assert!(text.contains("harvester_searches_total"));
    }

    #[test]
    fn test_write_textfile_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.prom");
        std::fs::write(&path, "stale").unwrap();

        write_textfile(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("harvester_start_time_seconds"));
        assert!(!dir.path().join("harvester.prom.tmp").exists());
    }
}
