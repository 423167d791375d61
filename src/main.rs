//! `event-collector` binary.
//!
//! Loads configuration, installs logging and the optional Prometheus
//! exporter, then serves until Ctrl+C.

mod cli;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use event_collector::{
    config::CollectorConfig,
    metrics::Metrics,
    server::CollectorServer,
    sink::LoggingSink,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "collector failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CollectorConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let metrics = install_metrics(&config)?;
    let server = CollectorServer::bind(&config, metrics, Arc::new(LoggingSink))?;
    tracing::info!(
        addr = ?server.local_addr(),
        routes = config.routes.len(),
        "collector starting"
    );
    server.run().await?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics(config: &CollectorConfig) -> Result<Arc<dyn Metrics>, Box<dyn std::error::Error>> {
    if let Some(addr) = config.metrics.listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "prometheus exporter listening");
    }
    Ok(Arc::new(event_collector::metrics::RecorderMetrics))
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(config: &CollectorConfig) -> Result<Arc<dyn Metrics>, Box<dyn std::error::Error>> {
    if config.metrics.listen.is_some() {
        tracing::warn!("metrics listener configured but metrics support is disabled");
    }
    Ok(Arc::new(event_collector::metrics::NoopMetrics))
}
