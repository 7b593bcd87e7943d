//! content-triage binary entrypoint.
//! Loads config, wires the fixture adapters and the JSON state store, then runs
//! the pipeline once (or on `[run].interval_secs`) and prints each report as JSON.

use std::sync::Arc;
use std::time::Duration;

use content_triage::telemetry::Metrics;
use content_triage::{AdapterRegistry, JsonFileStore, Orchestrator, TriageConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs on stderr by default; `TRIAGE_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("content_triage=info,triage=info,warn"));

    let json = std::env::var("TRIAGE_LOG_JSON").ok().as_deref() == Some("1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

async fn run_once(orch: &Orchestrator, metrics: Option<&Metrics>) -> anyhow::Result<()> {
    let report = orch.run().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(m) = metrics {
        println!("{}", m.render());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TriageConfig::load()?;
    if cfg.sources.is_empty() {
        warn!("no [[sources]] configured; runs will produce no content");
    }

    let metrics = if std::env::var("TRIAGE_PRINT_METRICS").ok().as_deref() == Some("1") {
        match Metrics::install() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "metrics recorder not installed");
                None
            }
        }
    } else {
        None
    };

    let store = Arc::new(JsonFileStore::open(&cfg.run.state_path)?);
    let adapters = AdapterRegistry::from_fixture_dir(&cfg.run.fixtures_dir);
    let orch = Orchestrator::from_config(&cfg, adapters, store)?;

    let Some(secs) = cfg.run.interval_secs else {
        return run_once(&orch, metrics.as_ref()).await;
    };

    info!(interval_secs = secs, sources = cfg.sources.len(), "starting interval runner");
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Tunables are re-read between runs; the source list is fixed at startup.
                match TriageConfig::load() {
                    Ok(fresh) => {
                        if let Err(e) = orch.reconfigure(&fresh.run_settings()) {
                            warn!(error = %e, "config reload rejected, keeping previous settings");
                        }
                    }
                    Err(e) => warn!(error = %e, "config reload failed, keeping previous settings"),
                }
                run_once(&orch, metrics.as_ref()).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}
