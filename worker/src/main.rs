mod config;
mod metrics;
mod scheduler;
mod throttle;
mod worker;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("worker=debug")),
        )
        .init();

    let cfg = WorkerConfig::from_args(&args);

    match args.worker_id {
        Some(id) => worker::run_single(Arc::new(cfg), id).await,
        None => {
            if (cfg.send_metrics || cfg.throttle.enabled) && !metrics_supported() {
                warn!("sysinfo no soporta esta plataforma: sin métricas ni throttle");
            }
            info!("config: {:?}", cfg);
            worker::supervise(&cfg).await
        }
    }
}

fn metrics_supported() -> bool {
    use sysinfo::{System, SystemExt};
    System::IS_SUPPORTED
}
