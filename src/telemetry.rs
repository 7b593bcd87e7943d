// src/telemetry.rs
use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::orchestrator::PipelineReport;

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "triage_items_fetched_total",
            "Items returned by fetch adapters."
        );
        describe_counter!(
            "triage_items_filtered_total",
            "Items excluded by the time/confidence filter."
        );
        describe_counter!(
            "triage_items_deduped_total",
            "Items dropped as historical or in-batch duplicates."
        );
        describe_counter!(
            "triage_items_kept_total",
            "Items that survived every gate and were persisted."
        );
        describe_counter!(
            "triage_source_errors_total",
            "Fetch failures recorded against sources."
        );
        describe_counter!(
            "triage_sources_skipped_total",
            "Sources skipped because they were in recovery or the run was cancelled."
        );
        describe_histogram!("triage_run_ms", "Pipeline run time in milliseconds.");
        describe_gauge!("triage_last_run_ts", "Unix ts when the pipeline last ran.");
    });
}

/// Push one run's counts into the global recorder (no-op without one).
pub fn record_run(report: &PipelineReport) {
    ensure_metrics_described();
    counter!("triage_items_fetched_total").increment(report.total_fetched as u64);
    counter!("triage_items_filtered_total").increment(report.stages.filter_excluded as u64);
    counter!("triage_items_deduped_total").increment(report.stages.dedup.dropped as u64);
    counter!("triage_items_kept_total").increment(report.items.len() as u64);
    counter!("triage_source_errors_total").increment(report.sources_failed as u64);
    counter!("triage_sources_skipped_total").increment(report.sources_skipped as u64);
    histogram!("triage_run_ms").record(report.elapsed_ms as f64);
    gauge!("triage_last_run_ts").set(report.started_at.timestamp() as f64);
}

/// Prometheus recorder installed as the global `metrics` sink.
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
